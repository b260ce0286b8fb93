use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use visync::audio::decode::{AudioDecoder, MediaDecoder};
use visync::audio::playback::{AudioOutput, ClockedOutput};
use visync::avatar::Avatar;
use visync::avatar::animation::ArmsDownCorrector;
use visync::avatar::binder::MorphBinder;
use visync::avatar::character::Character;
use visync::cli::{Cli, Commands, ConfigAction};
use visync::config::Config;
use visync::engine::synth::{self, Prerecorded, SpeechSynthesizer};
use visync::engine::{EventSender, Orchestrator, SpeakOutcome};
use visync::lipsync::LipsyncAnalyzer;
use visync::output::{format_binding_report, format_viseme_track, render_event};

/// Events buffered between the engine and the terminal renderer.
const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Speak {
            text,
            character,
            wav,
            voice,
            speed,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let options = SpeakOptions {
                character,
                wav,
                voice,
                speed,
                json,
                quiet: cli.quiet,
                verbose: cli.verbose,
            };
            run_speak(config, &text, options).await?;
        }
        Commands::Analyze {
            audio,
            tick,
            all,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_analyze(&config, &audio, tick, all, json)?;
        }
        Commands::Bind { character, json } => {
            run_bind(&character, json)?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "visync", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Log to stderr, filtered by `VISYNC_LOG` or the `-q`/`-v` flags.
fn init_tracing(quiet: bool, verbose: u8) {
    let default_level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_env("VISYNC_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("visync={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

/// Load configuration from custom path or default location.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

struct SpeakOptions {
    character: Option<PathBuf>,
    wav: Option<PathBuf>,
    voice: Option<String>,
    speed: Option<f32>,
    json: bool,
    quiet: bool,
    verbose: u8,
}

async fn run_speak(mut config: Config, text: &str, options: SpeakOptions) -> Result<()> {
    if let Some(speed) = options.speed {
        config.playback.speed = speed;
    }

    let character = match &options.character {
        Some(path) => Character::load(path)
            .with_context(|| format!("Failed to load character {}", path.display()))?,
        None => Character::new("default"),
    };
    let avatar = Avatar::load(
        character,
        &config.lipsync,
        &config.animation,
        &ArmsDownCorrector,
    );

    let synthesizer: Option<Arc<dyn SpeechSynthesizer>> = match &options.wav {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Some(Arc::new(Prerecorded::new(bytes)))
        }
        None => synth::from_config(&config.synthesis)?,
    };

    let (events, rx) = EventSender::bounded(EVENT_BUFFER);
    let verbose = options.verbose;
    let quiet = options.quiet;
    let renderer = std::thread::spawn(move || {
        for event in rx.iter() {
            if !quiet {
                render_event(&event, verbose);
            }
        }
    });

    let mut orchestrator = Orchestrator::new(config, avatar, audio_output())?.with_event_sender(events);
    if let Some(synthesizer) = synthesizer {
        orchestrator = orchestrator.with_synthesizer(synthesizer);
    }
    let orchestrator = Arc::new(orchestrator);
    orchestrator.start_render_loop();

    let interrupt = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.cancel();
            }
        })
    };

    let mut request = orchestrator.request(text);
    if let Some(voice) = &options.voice {
        request = request.with_voice(voice);
    }

    // Print only the newly revealed suffix of the transcript.
    let mut shown = 0usize;
    let outcome = orchestrator
        .speak_request(request, |prefix| {
            if !options.json && prefix.len() > shown {
                print!("{}", &prefix[shown..]);
                std::io::stdout().flush().ok();
                shown = prefix.len();
            }
        })
        .await;
    if !options.json {
        println!();
    }

    interrupt.abort();
    // Every orchestrator handle must be gone before the renderer can finish.
    interrupt.await.ok();
    orchestrator.shutdown();
    drop(orchestrator);
    if renderer.join().is_err() {
        tracing::warn!("event renderer panicked");
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        SpeakOutcome::Completed(report) => {
            if !options.quiet && !report.issues.is_empty() {
                eprintln!(
                    "{} {} issue(s) while speaking:",
                    "Warning:".yellow(),
                    report.issues.len()
                );
                for issue in &report.issues {
                    eprintln!("  {} {}", "-".dimmed(), issue.message);
                }
            }
        }
        SpeakOutcome::Cancelled { .. } => {
            if !options.quiet {
                eprintln!("{}", "Cancelled".yellow());
            }
        }
    }
    Ok(())
}

/// The default audio device, or a silent clocked output if there is none.
fn audio_output() -> Arc<dyn AudioOutput> {
    #[cfg(feature = "cpal-audio")]
    {
        match visync::audio::device::CpalOutput::new() {
            Ok(output) => return Arc::new(output),
            Err(e) => tracing::warn!("{}; continuing without sound", e),
        }
    }
    Arc::new(ClockedOutput::new())
}

fn run_analyze(config: &Config, path: &Path, tick: Duration, all: bool, json: bool) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let audio = MediaDecoder::new().decode(&bytes)?;
    let mut analyzer = LipsyncAnalyzer::new(&config.analysis, &config.lipsync)?;
    let samples = analyzer.analyze_track(&audio, tick);

    if json {
        println!("{}", serde_json::to_string_pretty(&samples)?);
    } else {
        println!(
            "{} {:.2}s at {} Hz, {} ticks",
            path.display().bold(),
            audio.duration().as_secs_f64(),
            audio.sample_rate(),
            samples.len()
        );
        print!("{}", format_viseme_track(&samples, all));
    }
    Ok(())
}

fn run_bind(path: &Path, json: bool) -> Result<()> {
    let character = Character::load(path)
        .with_context(|| format!("Failed to load character {}", path.display()))?;
    let binding = MorphBinder::new().bind(&character);

    if json {
        println!("{}", serde_json::to_string_pretty(&binding)?);
    } else {
        println!(
            "{} ({} meshes, {} channels)",
            character.name.bold(),
            character.meshes.len(),
            character.channel_count()
        );
        print!("{}", format_binding_report(&binding));
    }
    Ok(())
}

/// Handle config subcommand actions.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Get { key } => {
            let config = load_config(custom_path)?;
            match config.get_value_by_path(&key) {
                Ok(value) => println!("{}", value),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        ConfigAction::List => {
            let config = load_config(custom_path)?;
            print!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }
    Ok(())
}

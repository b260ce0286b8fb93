//! Terminal rendering for engine events, viseme tracks and binding reports.

use crate::avatar::binder::{BindingStatus, MatchKind, MorphBinding};
use crate::engine::events::{Degradation, EngineEvent};
use crate::lipsync::TrackSample;
use crate::lipsync::viseme::Viseme;
use std::fmt::Write as _;
use std::io::{self, Write};

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

const BAR_WIDTH: usize = 20;

/// Print one event to stderr, if it is visible at `verbose`.
pub fn render_event(event: &EngineEvent, verbose: u8) {
    if let Some(line) = format_event(event, verbose) {
        eprintln!("{line}");
        io::stderr().flush().ok();
    }
}

/// Text for one event, or `None` when it is hidden at this verbosity.
///
/// Degradations always show; status and state changes need `-v`;
/// viseme changes need `-vv`. Transcript updates are never rendered here,
/// the caller prints them to stdout.
pub fn format_event(event: &EngineEvent, verbose: u8) -> Option<String> {
    match event {
        EngineEvent::Degraded { condition, .. } => Some(format_degradation(condition)),
        EngineEvent::Status { message, .. } if verbose >= 1 => {
            Some(format!("{DIM}{message}{RESET}"))
        }
        EngineEvent::StateChanged { state } if verbose >= 1 => {
            Some(format!("{DIM}[avatar] {state}{RESET}"))
        }
        EngineEvent::Finished {
            request_id,
            cancelled,
        } if verbose >= 1 => {
            let how = if *cancelled { "cancelled" } else { "finished" };
            Some(format!("{DIM}request {request_id} {how}{RESET}"))
        }
        EngineEvent::Viseme {
            viseme, intensity, ..
        } if verbose >= 2 => Some(format!(
            "{DIM}[viseme]{RESET} {:<3} {}",
            viseme.symbol(),
            intensity_bar(*intensity)
        )),
        _ => None,
    }
}

fn format_degradation(condition: &Degradation) -> String {
    match condition {
        Degradation::BindingGap { missing } => format!(
            "{YELLOW}Warning:{RESET} no morph channel for {}",
            join_symbols(missing)
        ),
        Degradation::AnimationOnly => format!(
            "{YELLOW}Warning:{RESET} character has no viseme channels, lips will not move"
        ),
        Degradation::TextOnly => {
            format!("{YELLOW}Warning:{RESET} no speech provider configured, text only")
        }
        Degradation::SynthesisFailed { message } => {
            format!("{RED}Speech synthesis failed:{RESET} {message}")
        }
        Degradation::DecodeFailed { message } => {
            format!("{RED}Could not decode speech audio:{RESET} {message}")
        }
        Degradation::PlaybackFailed { message } => {
            format!("{RED}Audio playback failed:{RESET} {message}")
        }
    }
}

fn join_symbols(visemes: &[Viseme]) -> String {
    visemes
        .iter()
        .map(|v| v.symbol())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Horizontal bar for an intensity in `[0, 1]`.
pub fn intensity_bar(intensity: f32) -> String {
    let filled = (intensity.clamp(0.0, 1.0) * BAR_WIDTH as f32).round() as usize;
    format!(
        "{}{}",
        "█".repeat(filled),
        "░".repeat(BAR_WIDTH - filled)
    )
}

/// One line per analysed tick: time, viseme, intensity and volume.
///
/// Consecutive ticks with the same viseme are collapsed unless `all` is set.
pub fn format_viseme_track(samples: &[TrackSample], all: bool) -> String {
    let mut out = String::new();
    let mut previous: Option<Viseme> = None;
    for sample in samples {
        let viseme = sample.classification.viseme;
        if !all && previous == Some(viseme) {
            continue;
        }
        previous = Some(viseme);
        writeln!(
            out,
            "{:>8.3}s  {:<3}  {}  {:.2}  {DIM}vol {:.3}{RESET}",
            sample.position.as_secs_f64(),
            viseme.symbol(),
            intensity_bar(sample.classification.intensity),
            sample.classification.intensity,
            sample.frame.volume,
        ).ok();
    }
    out
}

/// Per-viseme table of resolved channels plus the blink and jaw channels.
pub fn format_binding_report(binding: &MorphBinding) -> String {
    let mut out = String::new();
    for viseme in Viseme::ALL {
        match binding.target(viseme) {
            Some(target) => {
                writeln!(
                    out,
                    "  {GREEN}✓{RESET} {:<4} {} {DIM}(mesh {}, {}, x{:.2}){RESET}",
                    viseme.symbol(),
                    target.name,
                    target.mesh,
                    match_label(target.kind),
                    target.scale,
                ).ok();
            }
            None => {
                writeln!(out, "  {RED}✗{RESET} {:<4} {DIM}unbound{RESET}", viseme.symbol()).ok();
            }
        }
    }
    for (label, target) in [
        ("blinkL", &binding.blink_left),
        ("blinkR", &binding.blink_right),
        ("jaw", &binding.jaw),
    ] {
        match target {
            Some(target) => {
                writeln!(out, "  {GREEN}✓{RESET} {label:<6} {}", target.name).ok();
            }
            None => {
                writeln!(out, "  {DIM}- {label:<6} none{RESET}").ok();
            }
        }
    }
    let summary = match binding.status() {
        BindingStatus::Complete => format!("{GREEN}complete{RESET}"),
        BindingStatus::Partial { missing } => {
            format!("{YELLOW}partial{RESET} ({} missing)", missing.len())
        }
        BindingStatus::AnimationOnly => format!("{RED}animation only{RESET}"),
    };
    writeln!(
        out,
        "{}/{} visemes bound, {summary}",
        binding.bound_count(),
        Viseme::COUNT
    ).ok();
    out
}

fn match_label(kind: MatchKind) -> &'static str {
    match kind {
        MatchKind::Exact => "exact",
        MatchKind::CaseInsensitive => "case-insensitive",
        MatchKind::Partial => "partial",
        MatchKind::Variant => "variant",
    }
}

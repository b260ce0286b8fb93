//! Character descriptions loaded from disk, bound and driven by decoded audio.

use std::io::Cursor;
use std::time::Duration;
use visync::audio::decode::{AudioDecoder, MediaDecoder};
use visync::avatar::Avatar;
use visync::avatar::animation::{AnimationState, ArmsDownCorrector, Motion};
use visync::avatar::binder::{BindingStatus, MatchKind, MorphBinder};
use visync::avatar::character::Character;
use visync::config::Config;
use visync::lipsync::LipsyncAnalyzer;
use visync::lipsync::viseme::Viseme;

/// An ARKit-style export: no `viseme_*` channels, T-posed arms.
const EXPORTED: &str = r#"{
    "name": "kiosk",
    "meshes": [
        {
            "name": "Wolf3D_Head",
            "channels": [
                "mouthClose", "mouthPucker", "mouthFunnel", "mouthLowerDown",
                "jawOpen", "mouthUpperUp", "mouthFrown", "mouthRoll",
                "mouthSmile", "eyeBlinkLeft", "eyeBlinkRight"
            ]
        }
    ],
    "bones": [
        { "name": "Hips" },
        { "name": "LeftShoulder" },
        { "name": "LeftArm" },
        { "name": "LeftForeArm" },
        { "name": "LeftHand" },
        { "name": "LeftHandThumb1" },
        { "name": "RightShoulder" },
        { "name": "RightArm" },
        { "name": "RightForeArm" },
        { "name": "RightHand" }
    ],
    "clips": { "idle": "Idle" }
}"#;

fn load_exported() -> Character {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kiosk.json");
    std::fs::write(&path, EXPORTED).unwrap();
    Character::load(&path).unwrap()
}

fn tone_wav(seconds: f64, rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = (seconds * f64::from(rate)).round() as usize;
        for i in 0..frames {
            let t = i as f64 / f64::from(rate);
            let value: f64 = (1..=30)
                .map(|h| (2.0 * std::f64::consts::PI * 150.0 * f64::from(h) * t).sin())
                .sum::<f64>()
                * 0.03;
            let sample = (value * f64::from(i16::MAX)) as i16;
            writer.write_sample(sample).unwrap();
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[test]
fn test_exported_character_binds_by_candidate_names() {
    let character = load_exported();
    let binding = MorphBinder::new().bind(&character);

    assert_eq!(binding.bound_count(), Viseme::COUNT);
    assert_eq!(binding.status(), BindingStatus::Complete);
    let aa = binding.target(Viseme::Aa).unwrap();
    assert_eq!(aa.name, "jawOpen");
    assert_eq!(aa.kind, MatchKind::Exact);
    assert_eq!(binding.target(Viseme::Sil).unwrap().name, "mouthClose");
    assert!(binding.can_blink());
    assert_eq!(binding.jaw.as_ref().map(|t| t.name.as_str()), Some("jawOpen"));
}

#[test]
fn test_loading_lowers_t_posed_arms() {
    let config = Config::default();
    let avatar = Avatar::load(
        load_exported(),
        &config.lipsync,
        &config.animation,
        &ArmsDownCorrector,
    );
    let character = avatar.character();

    assert_eq!(character.bone("LeftArm").unwrap().rotation, [0.3, 0.0, -1.0]);
    assert_eq!(character.bone("RightArm").unwrap().rotation, [0.3, 0.0, 1.0]);
    assert_eq!(character.bone("LeftForeArm").unwrap().rotation, [-0.4, 0.0, 0.0]);
    assert_eq!(character.bone("RightHand").unwrap().rotation, [-0.3, 0.0, 0.0]);
    // Fingers and the hips keep their authored pose
    assert_eq!(character.bone("LeftHandThumb1").unwrap().rotation, [0.0; 3]);
    assert_eq!(character.bone("Hips").unwrap().rotation, [0.0; 3]);

    assert_eq!(avatar.state(), AnimationState::Idle);
    assert_eq!(
        avatar.animation().active_motion(),
        &Motion::Clip("Idle".to_string())
    );
}

#[test]
fn test_state_changes_fall_back_to_idle_clip() {
    let config = Config::default();
    let mut avatar = Avatar::load(
        load_exported(),
        &config.lipsync,
        &config.animation,
        &ArmsDownCorrector,
    );

    assert!(avatar.set_state(AnimationState::Talking));
    assert!(!avatar.set_state(AnimationState::Talking));
    assert_eq!(
        avatar.animation().active_motion(),
        &Motion::Clip("Idle".to_string())
    );
    assert_eq!(avatar.animation().fades_started(), 1);
}

#[test]
fn test_decoded_stereo_wav_drives_the_mouth() {
    let bytes = tone_wav(0.6, 44_100);
    let decoder = MediaDecoder::new();
    assert_eq!(decoder.probe(&bytes).unwrap(), Duration::from_millis(600));
    let audio = decoder.decode(&bytes).unwrap();
    assert_eq!(audio.sample_rate(), 44_100);
    assert_eq!(audio.duration(), Duration::from_millis(600));

    let config = Config::default();
    let mut analyzer = LipsyncAnalyzer::new(&config.analysis, &config.lipsync).unwrap();
    let mut avatar = Avatar::load(
        load_exported(),
        &config.lipsync,
        &config.animation,
        &ArmsDownCorrector,
    );

    let track = analyzer.analyze_track(&audio, Duration::from_millis(20));
    assert_eq!(track.len(), 30);
    let voiced = track
        .iter()
        .find(|s| s.classification.viseme != Viseme::Sil && s.classification.intensity > 0.05)
        .expect("voiced tick");
    avatar.apply(voiced.classification);
    assert!(!avatar.is_at_rest());

    avatar.zero_morphs();
    assert!(avatar.is_at_rest());
}

//! Character-by-character transcript reveal, paced to the audio.

use crate::config::TranscriptConfig;
use crate::engine::session::CancelSignal;
use std::time::Duration;
use tokio::time::Instant;

/// Delay between two revealed characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealPace {
    per_char: Duration,
}

impl RevealPace {
    pub fn new(per_char: Duration) -> Self {
        Self { per_char }
    }

    /// Fixed pace used when the audio duration is unknown.
    pub fn fallback(speed: f32, config: &TranscriptConfig) -> Self {
        Self::new(at_speed(
            Duration::from_millis(config.default_char_delay_ms),
            speed,
        ))
    }

    /// Spread `text` over `duration` of audio played at `speed`.
    ///
    /// Falls back to the default pace when the duration is unknown or zero.
    pub fn for_duration(
        text: &str,
        duration: Option<Duration>,
        speed: f32,
        config: &TranscriptConfig,
    ) -> Self {
        let chars = text.chars().count();
        match duration {
            Some(duration) if !duration.is_zero() && chars > 0 => {
                let wall = at_speed(duration, speed);
                let per_char = wall / u32::try_from(chars).unwrap_or(u32::MAX);
                Self::new(per_char.max(Duration::from_millis(config.min_char_delay_ms)))
            }
            _ => Self::fallback(speed, config),
        }
    }

    pub fn per_char(&self) -> Duration {
        self.per_char
    }

    /// Time to reveal all of `text`.
    pub fn total(&self, text: &str) -> Duration {
        self.per_char * u32::try_from(text.chars().count()).unwrap_or(u32::MAX)
    }
}

/// Wall-clock length of `duration` of audio played at `speed`.
fn at_speed(duration: Duration, speed: f32) -> Duration {
    let speed = if speed.is_finite() && speed > 0.0 {
        f64::from(speed)
    } else {
        1.0
    };
    Duration::from_nanos((duration.as_nanos() as f64 / speed).round() as u64)
}

/// Publish growing prefixes of `text` to `on_update`.
///
/// The empty prefix goes out first; after that one character per tick,
/// scheduled against absolute deadlines so delays do not accumulate drift.
/// Returns false if `cancel` fired before the whole text was shown.
pub async fn reveal<F>(text: &str, pace: RevealPace, cancel: &CancelSignal, mut on_update: F) -> bool
where
    F: FnMut(&str),
{
    if cancel.is_cancelled() {
        return false;
    }
    on_update("");

    let start = Instant::now();
    let mut deadline = start;
    for (index, ch) in text.char_indices() {
        deadline += pace.per_char;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep_until(deadline) => {}
        }
        on_update(&text[..index + ch.len_utf8()]);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::session::cancel_pair;

    fn config() -> TranscriptConfig {
        TranscriptConfig::default()
    }

    #[test]
    fn test_pace_matches_audio_duration() {
        let pace = RevealPace::for_duration("Hello", Some(Duration::from_millis(1200)), 1.0, &config());
        assert_eq!(pace.per_char(), Duration::from_millis(240));
        assert_eq!(pace.total("Hello"), Duration::from_millis(1200));
    }

    #[test]
    fn test_pace_scales_with_speed() {
        let pace = RevealPace::for_duration("Hello", Some(Duration::from_millis(1200)), 2.0, &config());
        assert_eq!(pace.per_char(), Duration::from_millis(120));
        let fallback = RevealPace::fallback(2.0, &config());
        assert_eq!(fallback.per_char(), Duration::from_millis(4));
    }

    #[test]
    fn test_pace_is_clamped_to_minimum() {
        let text = "a".repeat(1000);
        let pace = RevealPace::for_duration(&text, Some(Duration::from_millis(500)), 1.0, &config());
        assert_eq!(pace.per_char(), Duration::from_millis(4));
    }

    #[test]
    fn test_unknown_duration_uses_default() {
        let pace = RevealPace::for_duration("Hello", None, 1.0, &config());
        assert_eq!(pace.per_char(), Duration::from_millis(8));
        let zero = RevealPace::for_duration("Hello", Some(Duration::ZERO), 1.0, &config());
        assert_eq!(zero, pace);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveal_publishes_every_prefix() {
        let (_trigger, signal) = cancel_pair();
        let mut seen = Vec::new();
        let start = Instant::now();
        let done = reveal("héllo", RevealPace::new(Duration::from_millis(10)), &signal, |p| {
            seen.push(p.to_string())
        })
        .await;
        assert!(done);
        assert_eq!(seen, vec!["", "h", "hé", "hél", "héll", "héllo"]);
        assert_eq!(start.elapsed(), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveal_stops_on_cancel() {
        let (trigger, signal) = cancel_pair();
        let mut last = String::new();
        let reveal_task = reveal("a long sentence", RevealPace::new(Duration::from_millis(100)), &signal, |p| {
            last = p.to_string()
        });
        let cancel_later = async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        };
        let (done, ()) = tokio::join!(reveal_task, cancel_later);
        assert!(!done);
        assert_eq!(last, "a ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_text_reveals_immediately() {
        let (_trigger, signal) = cancel_pair();
        let mut seen = Vec::new();
        assert!(reveal("", RevealPace::new(Duration::from_millis(10)), &signal, |p| seen.push(p.to_string())).await);
        assert_eq!(seen, vec![String::new()]);
    }
}

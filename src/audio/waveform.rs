//! # Waveform Synthesis
//!
//! Voice notes carry a 64-sample amplitude envelope that clients draw as bars.
//! Without decoding the audio we synthesize a plausible envelope from the duration:
//! two stacked sine waves whose frequency grows with the duration, a little noise,
//! and a fade towards both ends.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// Number of envelope samples attached to a voice note.
pub const WAVEFORM_LEN: usize = 64;

const BASE_AMPLITUDE: f64 = 35.0;
const NOISE_SPAN: f64 = 15.0;
const BASELINE: f64 = 50.0;
/// Durations past this stop increasing the wave frequency.
const FREQUENCY_CAP_SECS: u32 = 120;

/// Build the envelope for a note of `duration_seconds`.
///
/// Deterministic: the generator is seeded from the duration alone, so the same
/// duration always yields the same bytes. Every value is in `0..=100`.
pub fn synthesize(duration_seconds: u32) -> [u8; WAVEFORM_LEN] {
    let mut rng = StdRng::seed_from_u64(duration_seconds as u64);
    let frequency = duration_seconds.min(FREQUENCY_CAP_SECS) as f64 / 30.0;

    let mut waveform = [0u8; WAVEFORM_LEN];
    for (i, sample) in waveform.iter_mut().enumerate() {
        let pos = i as f64 / WAVEFORM_LEN as f64;

        let mut value = BASE_AMPLITUDE * (pos * PI * frequency * 8.0).sin();
        value += (BASE_AMPLITUDE / 2.0) * (pos * PI * frequency * 16.0).sin();
        value += (rng.gen::<f64>() - 0.5) * NOISE_SPAN;

        // fade in and out
        value *= 0.7 + 0.3 * (pos * PI).sin();
        value += BASELINE;

        *sample = value.clamp(0.0, 100.0) as u8;
    }

    waveform
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_shape_and_range() {
        for duration in [0, 1, 30, 300, 10_000] {
            let waveform = synthesize(duration);
            assert_eq!(waveform.len(), WAVEFORM_LEN);
            assert!(
                waveform.iter().all(|&v| v <= 100),
                "duration {} produced out of range values",
                duration
            );
        }
    }

    #[test]
    fn test_waveform_is_deterministic() {
        for duration in [1, 7, 45, 300] {
            assert_eq!(synthesize(duration), synthesize(duration));
        }
    }

    #[test]
    fn test_zero_duration_is_flat_noise_around_baseline() {
        // no sine contribution at frequency 0, only noise scaled by the fade
        let waveform = synthesize(0);
        assert!(waveform.iter().all(|&v| (42..=57).contains(&v)));
    }

    #[test]
    fn test_long_durations_share_the_frequency_cap() {
        let a = synthesize(200);
        let b = synthesize(300);
        // Same wave, different noise seeds: bytes differ but stay close
        let max_gap = a
            .iter()
            .zip(b.iter())
            .map(|(&x, &y)| (x as i16 - y as i16).abs())
            .max()
            .unwrap_or(0);
        assert!(max_gap <= 15, "gap {}", max_gap);
    }
}

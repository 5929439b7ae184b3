//! Short synthesized cue played when a reply begins.

use super::frame::{AudioFrame, SAMPLE_RATE};

const CHIME_SECS: f32 = 0.2;
const CHIME_HZ: f32 = 800.0;
const CHIME_GAIN: f32 = 0.1;
const CHIME_DECAY: f32 = 10.0;

/// A 0.2 s, 800 Hz sine with an exponential decay (`0.1·sin(2πft)·e^(-10t)`).
pub fn reply_chime() -> AudioFrame {
    let len = (CHIME_SECS * SAMPLE_RATE as f32) as usize;
    let samples = (0..len)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            CHIME_GAIN * (2.0 * std::f32::consts::PI * CHIME_HZ * t).sin() * (-CHIME_DECAY * t).exp()
        })
        .collect();
    AudioFrame::new(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chime_shape() {
        let chime = reply_chime();
        assert_eq!(chime.len(), 4_800);
        assert!(chime.samples().iter().all(|s| s.abs() <= CHIME_GAIN));
        // Decays: the tail is much quieter than the head.
        let head = crate::audio::energy::rms(&chime.samples()[..480]);
        let tail = crate::audio::energy::rms(&chime.samples()[4_320..]);
        assert!(tail < head / 4.0);
    }
}

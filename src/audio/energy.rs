//! Signal energy used by every speech-boundary decision.

/// Root-mean-square energy of `samples`: `sqrt(mean(s²))`.
///
/// An empty slice has zero energy.
///
/// ```
/// use voice_duplex::audio::energy::rms;
///
/// assert_eq!(rms(&[0.0; 64]), 0.0);
/// assert!((rms(&[-0.3; 64]) - 0.3).abs() < 1e-6);
/// ```
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_sq: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    mean_sq.sqrt()
}

/// Returns `true` when the RMS of `samples` is strictly above `threshold`.
pub fn is_above(samples: &[f32], threshold: f32) -> bool {
    rms(samples) > threshold
}

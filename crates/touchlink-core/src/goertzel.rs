//! Single-bin Goertzel tone energy.
//!
//! Evaluates one DFT bin over a block of samples with a second-order
//! recurrence, which is all a detector listening for a single peer tone
//! needs. The result is the estimated amplitude of the tone, so a full-scale
//! sine reads 1.0 and a half-scale sine reads 0.5.

use std::f32::consts::TAU;

/// Estimated amplitude of `frequency` in `samples`, clamped to [0, 1].
///
/// Accurate when the block spans a whole number of tone cycles, which is
/// how detection windows are sized.
pub fn tone_energy(samples: &[f32], frequency: f32, sample_rate: f32) -> f32 {
    if samples.is_empty() || frequency <= 0.0 || sample_rate <= 0.0 {
        return 0.0;
    }

    let omega = TAU * frequency / sample_rate;
    let coeff = 2.0 * omega.cos();
    let (mut s1, mut s2) = (0.0_f32, 0.0_f32);
    for &x in samples {
        let s0 = x + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }

    let power = (s1 * s1 + s2 * s2 - coeff * s1 * s2).max(0.0);
    let amplitude = 2.0 * power.sqrt() / samples.len() as f32;
    if amplitude.is_finite() {
        amplitude.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Fill `out` with a sine of `amplitude` starting at sample index `offset`.
pub fn synthesize_sine(
    out: &mut [f32],
    frequency: f32,
    amplitude: f32,
    sample_rate: f32,
    offset: u64,
) {
    let step = TAU * frequency / sample_rate;
    for (i, sample) in out.iter_mut().enumerate() {
        let n = offset.wrapping_add(i as u64) as f64;
        // Phase in f64 so long-running offsets do not lose precision.
        let phase = (n * f64::from(step)).rem_euclid(std::f64::consts::TAU) as f32;
        *sample += amplitude * phase.sin();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const FS: f32 = 44_100.0;

    fn sine(frequency: f32, amplitude: f32, len: usize) -> Vec<f32> {
        let mut out = vec![0.0; len];
        synthesize_sine(&mut out, frequency, amplitude, FS, 0);
        out
    }

    /// Samples spanning exactly `cycles` periods of `frequency`.
    fn window(frequency: f32, cycles: u32) -> usize {
        (cycles as f32 * FS / frequency).round() as usize
    }

    #[test]
    fn test_detects_matching_tone_amplitude() {
        let n = window(12_274.0, 306);
        let block = sine(12_274.0, 0.5, n);
        assert_abs_diff_eq!(tone_energy(&block, 12_274.0, FS), 0.5, epsilon = 0.02);
    }

    #[test]
    fn test_rejects_neighbouring_tone() {
        let n = window(12_274.0, 306);
        let block = sine(14_643.0, 0.5, n);
        let energy = tone_energy(&block, 12_274.0, FS);
        assert!(energy < 0.01, "cross-talk energy {energy}");
    }

    #[test]
    fn test_mixture_separates() {
        let n = window(10_077.0, 250);
        // A second tone sitting exactly on bin 400 of this block.
        let other = 400.0 * FS / n as f32;
        let mut block = sine(10_077.0, 0.2, n);
        synthesize_sine(&mut block, other, 0.4, FS, 0);
        assert_abs_diff_eq!(tone_energy(&block, 10_077.0, FS), 0.2, epsilon = 0.02);
        assert_abs_diff_eq!(tone_energy(&block, other, FS), 0.4, epsilon = 0.02);
    }

    #[test]
    fn test_silence_and_degenerate_inputs() {
        assert_eq!(tone_energy(&[0.0; 512], 1_000.0, FS), 0.0);
        assert_eq!(tone_energy(&[], 1_000.0, FS), 0.0);
        assert_eq!(tone_energy(&[0.5; 16], 0.0, FS), 0.0);
    }

    #[test]
    fn test_energy_clamped_to_unit_range() {
        let n = window(1_000.0, 20);
        let block = sine(1_000.0, 4.0, n);
        assert_eq!(tone_energy(&block, 1_000.0, FS), 1.0);
    }

    #[test]
    fn test_synthesis_is_phase_continuous() {
        let mut first = vec![0.0; 100];
        let mut second = vec![0.0; 100];
        synthesize_sine(&mut first, 440.0, 1.0, FS, 0);
        synthesize_sine(&mut second, 440.0, 1.0, FS, 100);
        let whole = sine(440.0, 1.0, 200);
        assert_abs_diff_eq!(second[0], whole[100], epsilon = 1e-4);
        assert_abs_diff_eq!(first[99], whole[99], epsilon = 1e-4);
    }
}

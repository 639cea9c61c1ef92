//! Time-domain to frequency-domain conversion
//!
//! Spectra are orthonormally scaled and centred (zero frequency in the
//! middle), so a time axis in microseconds yields a frequency axis in MHz.

use crate::error::NqrResult;
use crate::measurement_error;
use num_complex::Complex;
use num_traits::Zero;
use rustfft::FftPlanner;
use std::cell::RefCell;

thread_local! {
    static PLANNER: RefCell<FftPlanner<f64>> = RefCell::new(FftPlanner::new());
}

/// Frequency-domain representation of a measurement
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Frequency axis in MHz, ascending
    pub fdx: Vec<f64>,
    /// Complex spectrum aligned with `fdx`
    pub fdy: Vec<Complex<f64>>,
}

/// Forward transform of a time-domain signal
///
/// `tdx` is in microseconds and must have at least two points;
/// `frequency_shift_hz` is added to the resulting axis.
pub fn forward(tdx: &[f64], tdy: &[Complex<f64>], frequency_shift_hz: f64) -> NqrResult<Spectrum> {
    if tdx.len() < 2 {
        return Err(measurement_error!("need at least 2 time points, got {}", tdx.len()));
    }

    let dwell_time = tdx[1] - tdx[0];
    if !(dwell_time.is_finite() && dwell_time > 0.0) {
        return Err(measurement_error!("dwell time must be positive, got {}", dwell_time));
    }

    let shift_mhz = frequency_shift_hz / 1e6;
    let mut fdx = fftfreq(tdx.len(), dwell_time);
    fftshift(&mut fdx);
    for f in &mut fdx {
        *f += shift_mhz;
    }

    let mut fdy = tdy.to_vec();
    fft_in_place(&mut fdy, false);
    fftshift(&mut fdy);

    Ok(Spectrum { fdx, fdy })
}

/// Inverse of [`forward`] on the amplitude series
pub fn inverse(fdy: &[Complex<f64>]) -> Vec<Complex<f64>> {
    let mut tdy = fdy.to_vec();
    ifftshift(&mut tdy);
    fft_in_place(&mut tdy, true);
    tdy
}

/// Sample frequencies for an `n` point transform with spacing `d`
pub fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    let scale = 1.0 / (n as f64 * d);
    let positive = (n + 1) / 2;

    (0..n)
        .map(|i| {
            if i < positive {
                i as f64 * scale
            } else {
                (i as f64 - n as f64) * scale
            }
        })
        .collect()
}

/// Move the zero-frequency bin to the centre
pub fn fftshift<T>(values: &mut [T]) {
    let half = values.len() / 2;
    values.rotate_right(half);
}

/// Undo [`fftshift`]
pub fn ifftshift<T>(values: &mut [T]) {
    let half = values.len() / 2;
    values.rotate_left(half);
}

fn fft_in_place(buffer: &mut [Complex<f64>], inverse: bool) {
    if buffer.is_empty() {
        return;
    }

    let len = buffer.len();
    PLANNER.with(|planner| {
        let mut planner = planner.borrow_mut();
        let fft = if inverse {
            planner.plan_fft_inverse(len)
        } else {
            planner.plan_fft_forward(len)
        };

        let mut scratch = vec![Complex::zero(); fft.get_inplace_scratch_len()];
        fft.process_with_scratch(buffer, &mut scratch);
    });

    // Orthonormal scaling keeps forward and inverse symmetric
    let norm = 1.0 / (len as f64).sqrt();
    for value in buffer.iter_mut() {
        *value *= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn time_axis(n: usize, dwell_us: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dwell_us).collect()
    }

    #[test]
    fn test_fftfreq_even_and_odd() {
        assert_eq!(fftfreq(4, 1.0), vec![0.0, 0.25, -0.5, -0.25]);
        assert_eq!(fftfreq(5, 1.0), vec![0.0, 0.2, 0.4, -0.4, -0.2]);
    }

    #[test]
    fn test_shift_roundtrip_odd_length() {
        let mut values = vec![0, 1, 2, 3, 4];
        fftshift(&mut values);
        assert_eq!(values, vec![3, 4, 0, 1, 2]);
        ifftshift(&mut values);
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_forward_axis_is_ascending_mhz() {
        let tdx = time_axis(8, 0.5); // 2 MHz sampling
        let tdy = vec![Complex::new(1.0, 0.0); 8];
        let spectrum = forward(&tdx, &tdy, 0.0).unwrap();

        assert_eq!(spectrum.fdx.len(), 8);
        assert!((spectrum.fdx[0] + 1.0).abs() < 1e-12);
        assert!(spectrum.fdx.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_tone_lands_in_expected_bin() {
        let n = 64;
        let dwell = 0.1; // µs
        let tone_mhz = 1.25;
        let tdx = time_axis(n, dwell);
        let tdy: Vec<Complex<f64>> = tdx
            .iter()
            .map(|&t| Complex::from_polar(1.0, 2.0 * PI * tone_mhz * t))
            .collect();

        let spectrum = forward(&tdx, &tdy, 0.0).unwrap();
        let peak = spectrum
            .fdy
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i)
            .unwrap();

        assert!((spectrum.fdx[peak] - tone_mhz).abs() < 1e-9);
        // Orthonormal scaling: a unit tone carries sqrt(N) in its bin
        assert!((spectrum.fdy[peak].norm() - (n as f64).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_frequency_shift_offsets_axis() {
        let tdx = time_axis(16, 1.0);
        let tdy = vec![Complex::new(0.5, -0.5); 16];
        let plain = forward(&tdx, &tdy, 0.0).unwrap();
        let shifted = forward(&tdx, &tdy, 250_000.0).unwrap();

        for (a, b) in plain.fdx.iter().zip(&shifted.fdx) {
            assert!((b - a - 0.25).abs() < 1e-12);
        }
        assert_eq!(plain.fdy, shifted.fdy);
    }

    #[test]
    fn test_inverse_recovers_signal() {
        let tdx = time_axis(33, 0.2);
        let tdy: Vec<Complex<f64>> = (0..33)
            .map(|i| Complex::new((i as f64 * 0.3).cos(), (i as f64 * 0.7).sin()))
            .collect();

        let spectrum = forward(&tdx, &tdy, 0.0).unwrap();
        let recovered = inverse(&spectrum.fdy);

        for (a, b) in tdy.iter().zip(&recovered) {
            assert!((a - b).norm() < 1e-10);
        }
    }

    #[test]
    fn test_forward_rejects_bad_axis() {
        let tdy = vec![Complex::new(1.0, 0.0); 2];
        assert!(forward(&[0.0], &tdy[..1], 0.0).is_err());
        assert!(forward(&[1.0, 1.0], &tdy, 0.0).is_err());
    }
}

//! Digital IIR design and stateful direct-form II transposed filtering.
//!
//! Band-pass sections are Butterworth designs built the classic zpk way: analog
//! low-pass prototype, low-pass → band-pass transform, bilinear transform with
//! frequency prewarping. The notch is the standard second-order design whose
//! -3 dB bandwidth is `freq / q`.
use std::f64::consts::PI;

use rustfft::num_complex::Complex64;

use crate::dsp::EngineError;

/// Normalised transfer function `b(z) / a(z)` with `a[0] == 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct IirCoefficients {
    b: Vec<f64>,
    a: Vec<f64>,
}

impl IirCoefficients {
    pub fn new(mut b: Vec<f64>, mut a: Vec<f64>) -> Result<Self, EngineError> {
        let a0 = a.first().copied().unwrap_or(0.0);
        if b.is_empty() || a0 == 0.0 || !a0.is_finite() {
            return Err(EngineError::FilterDesign(
                "denominator must start with a finite non-zero coefficient".into(),
            ));
        }
        let n = a.len().max(b.len());
        b.resize(n, 0.0);
        a.resize(n, 0.0);
        for v in b.iter_mut().chain(a.iter_mut()) {
            *v /= a0;
        }
        if b.iter().chain(&a).any(|v| !v.is_finite()) {
            return Err(EngineError::FilterDesign("non-finite coefficients".into()));
        }
        Ok(Self { b, a })
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    pub fn a(&self) -> &[f64] {
        &self.a
    }

    /// Length of the state vector.
    pub fn order(&self) -> usize {
        self.b.len() - 1
    }

    /// State matching the steady-state step response; scale by the first sample to
    /// start a channel without a transient.
    pub fn zi_template(&self) -> Vec<f64> {
        let order = self.order();
        if order == 0 {
            return Vec::new();
        }
        let b0 = self.b[0];
        let b_tail: f64 = self.b[1..].iter().sum();
        let a_tail: f64 = self.a[1..].iter().sum();
        let mut zi = vec![0.0; order];
        zi[0] = (b_tail - b0 * a_tail) / (1.0 + a_tail);
        let mut asum = 1.0;
        let mut csum = 0.0;
        for k in 1..order {
            asum += self.a[k];
            csum += self.b[k] - self.a[k] * b0;
            zi[k] = asum * zi[0] - csum;
        }
        zi
    }

    /// Filter `input`, carrying `zi` forward. `zi.len()` must equal [`Self::order`].
    pub fn filter_chunk(&self, input: &[f64], zi: &mut [f64]) -> Vec<f64> {
        debug_assert_eq!(zi.len(), self.order());
        let order = self.order();
        let mut output = Vec::with_capacity(input.len());
        for &x in input {
            let y = self.b[0] * x + zi.first().copied().unwrap_or(0.0);
            for k in 0..order {
                let carried = if k + 1 < order { zi[k + 1] } else { 0.0 };
                zi[k] = self.b[k + 1] * x - self.a[k + 1] * y + carried;
            }
            output.push(y);
        }
        output
    }

    /// Complex response at `freq_hz`.
    pub fn response(&self, freq_hz: f64, sample_rate_hz: f64) -> Complex64 {
        let w = 2.0 * PI * freq_hz / sample_rate_hz;
        let eval = |coeffs: &[f64]| {
            coeffs
                .iter()
                .enumerate()
                .fold(Complex64::new(0.0, 0.0), |acc, (k, &c)| {
                    acc + Complex64::from_polar(c, -w * k as f64)
                })
        };
        eval(&self.b) / eval(&self.a)
    }
}

/// Expand `prod(x - r)` into coefficients, highest power first.
fn poly(roots: &[Complex64]) -> Vec<Complex64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for &r in roots {
        let mut next = coeffs.clone();
        next.push(Complex64::new(0.0, 0.0));
        for i in 1..next.len() {
            next[i] -= r * coeffs[i - 1];
        }
        coeffs = next;
    }
    coeffs
}

fn check_sample_rate(sample_rate_hz: f64) -> Result<f64, EngineError> {
    if sample_rate_hz <= 0.0 || !sample_rate_hz.is_finite() {
        return Err(EngineError::InvalidSampleRate);
    }
    Ok(sample_rate_hz * 0.5)
}

/// Butterworth band-pass of prototype order `order` (the result has `2 * order` poles).
pub fn butter_bandpass(
    order: usize,
    low_hz: f64,
    high_hz: f64,
    sample_rate_hz: f64,
) -> Result<IirCoefficients, EngineError> {
    let nyquist = check_sample_rate(sample_rate_hz)?;
    if order == 0 {
        return Err(EngineError::FilterDesign("order must be at least 1".into()));
    }
    if !(low_hz > 0.0 && low_hz < high_hz && high_hz < nyquist) {
        return Err(EngineError::FilterDesign(format!(
            "band {low_hz}-{high_hz} Hz must satisfy 0 < low < high < {nyquist} Hz"
        )));
    }
    // Digital design at normalised fs = 2, so fs2 = 4 in the bilinear transform.
    let fs2 = 4.0;
    let warp = |hz: f64| fs2 * (PI * (hz / nyquist) / 2.0).tan();
    let (w_low, w_high) = (warp(low_hz), warp(high_hz));
    let bandwidth = w_high - w_low;
    let center = (w_low * w_high).sqrt();

    let n = order as f64;
    let prototype: Vec<Complex64> = (0..order)
        .map(|i| {
            let m = -(n - 1.0) + 2.0 * i as f64;
            -Complex64::from_polar(1.0, PI * m / (2.0 * n))
        })
        .collect();

    let mut poles = Vec::with_capacity(2 * order);
    for &p in &prototype {
        let scaled = p * bandwidth / 2.0;
        let offset = (scaled * scaled - center * center).sqrt();
        poles.push(scaled + offset);
        poles.push(scaled - offset);
    }
    let analog_gain = bandwidth.powi(order as i32);

    let two = Complex64::new(fs2, 0.0);
    let digital_poles: Vec<Complex64> = poles.iter().map(|&p| (two + p) / (two - p)).collect();
    // Analog zeros at s = 0 map to z = 1; the excess degree lands at z = -1.
    let mut digital_zeros = vec![Complex64::new(1.0, 0.0); order];
    digital_zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(order));
    let zeros_term = Complex64::new(fs2.powi(order as i32), 0.0);
    let poles_term = poles
        .iter()
        .fold(Complex64::new(1.0, 0.0), |acc, &p| acc * (two - p));
    let gain = analog_gain * (zeros_term / poles_term).re;

    let b = poly(&digital_zeros).into_iter().map(|c| c.re * gain).collect();
    let a = poly(&digital_poles).into_iter().map(|c| c.re).collect();
    IirCoefficients::new(b, a)
}

/// Second-order notch at `freq_hz` with quality factor `q`.
pub fn iir_notch(
    freq_hz: f64,
    q: f64,
    sample_rate_hz: f64,
) -> Result<IirCoefficients, EngineError> {
    let nyquist = check_sample_rate(sample_rate_hz)?;
    if !(freq_hz > 0.0 && freq_hz < nyquist) {
        return Err(EngineError::FilterDesign(format!(
            "notch {freq_hz} Hz must lie in (0, {nyquist}) Hz"
        )));
    }
    if q <= 0.0 || !q.is_finite() {
        return Err(EngineError::FilterDesign(format!("notch q must be positive, got {q}")));
    }
    let w0 = freq_hz / nyquist;
    let bandwidth = w0 / q * PI;
    let w0 = w0 * PI;
    let beta = (bandwidth / 2.0).tan();
    let gain = 1.0 / (1.0 + beta);
    let cos_w0 = w0.cos();
    IirCoefficients::new(
        vec![gain, -2.0 * gain * cos_w0, gain],
        vec![1.0, -2.0 * gain * cos_w0, 2.0 * gain - 1.0],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, fs: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn bandpass_passes_center_and_rejects_edges() {
        let fs = 250.0;
        let bp = butter_bandpass(2, 5.0, 35.0, fs).unwrap();
        assert_eq!(bp.order(), 4);
        assert!(bp.response(0.0, fs).norm() < 1e-9);
        assert!(bp.response(fs / 2.0, fs).norm() < 1e-9);
        // Butterworth edges sit at -3 dB.
        assert!((bp.response(5.0, fs).norm() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((bp.response(35.0, fs).norm() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(bp.response(13.0, fs).norm() > 0.95);
    }

    #[test]
    fn notch_kills_its_frequency_only() {
        let fs = 250.0;
        let notch = iir_notch(60.0, 30.0, fs).unwrap();
        assert_eq!(notch.order(), 2);
        assert!(notch.response(60.0, fs).norm() < 1e-9);
        assert!((notch.response(0.0, fs).norm() - 1.0).abs() < 1e-9);
        assert!(notch.response(40.0, fs).norm() > 0.99);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(matches!(
            butter_bandpass(2, 5.0, 70.0, 125.0),
            Err(EngineError::FilterDesign(_))
        ));
        assert!(butter_bandpass(2, 20.0, 10.0, 250.0).is_err());
        assert!(butter_bandpass(0, 5.0, 35.0, 250.0).is_err());
        assert!(iir_notch(60.0, 30.0, 100.0).is_err());
        assert!(iir_notch(50.0, 0.0, 250.0).is_err());
        assert!(matches!(
            iir_notch(50.0, 30.0, 0.0),
            Err(EngineError::InvalidSampleRate)
        ));
    }

    #[test]
    fn scaled_template_starts_in_steady_state() {
        let fs = 250.0;
        let level = 42.0;
        let notch = iir_notch(60.0, 30.0, fs).unwrap();
        let mut zi: Vec<f64> = notch.zi_template().iter().map(|z| z * level).collect();
        let out = notch.filter_chunk(&[level; 64], &mut zi);
        assert!(out.iter().all(|y| (y - level).abs() < 1e-9));

        let bp = butter_bandpass(2, 5.0, 35.0, fs).unwrap();
        let mut zi: Vec<f64> = bp.zi_template().iter().map(|z| z * level).collect();
        let out = bp.filter_chunk(&[level; 64], &mut zi);
        assert!(out.iter().all(|y| y.abs() < 1e-9));
    }

    #[test]
    fn chunked_filtering_matches_single_pass() {
        let fs = 250.0;
        let bp = butter_bandpass(2, 5.0, 35.0, fs).unwrap();
        let signal: Vec<f64> = sine(10.0, fs, 500)
            .iter()
            .zip(sine(60.0, fs, 500))
            .map(|(a, b)| a + 0.5 * b)
            .collect();

        let mut zi_full = bp.zi_template();
        let full = bp.filter_chunk(&signal, &mut zi_full);

        let mut zi = bp.zi_template();
        let mut chunked = bp.filter_chunk(&signal[..137], &mut zi);
        chunked.extend(bp.filter_chunk(&signal[137..140], &mut zi));
        chunked.extend(bp.filter_chunk(&signal[140..], &mut zi));

        assert_eq!(full.len(), chunked.len());
        for (a, b) in full.iter().zip(&chunked) {
            assert!((a - b).abs() < 1e-12);
        }
        for (a, b) in zi_full.iter().zip(&zi) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn normalizes_leading_denominator() {
        let coeffs = IirCoefficients::new(vec![2.0], vec![2.0, 1.0]).unwrap();
        assert_eq!(coeffs.b(), &[1.0, 0.0]);
        assert_eq!(coeffs.a(), &[1.0, 0.5]);
        assert!(IirCoefficients::new(vec![1.0], vec![0.0, 1.0]).is_err());
    }
}

//! Fractional delay interpolators used by the timing recovery loop.
//!
//! Every interpolator produces the value at a fractional offset mu in [0,1] after a basepoint sample.
//! The input slice is indexed up to and including sample n, which is the sample after the basepoint.
//! Each kind needs a different number of samples behind n which is given by [`Interpolator::lookback`].

use crate::error::{PlSyncError, PlSyncResult};
use num::complex::Complex32;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolatorKind {
    /// Polyphase root raised cosine filter bank which also performs matched filtering.
    Polyphase,
    Linear,
    /// Piecewise parabolic Farrow structure with alpha=0.5.
    Quadratic,
    /// Cubic Lagrange Farrow structure.
    Cubic,
}

/// Bank of sub-filters from a root raised cosine prototype sampled at nb_subfilters times the input rate.
pub struct PolyphaseBank {
    prototype: Vec<f32>,
    nb_subfilters: usize,
    nb_taps: usize,
}

pub enum Interpolator {
    Linear,
    Quadratic,
    Cubic,
    Polyphase(PolyphaseBank),
}

// Farrow coefficient for piecewise parabolic interpolation
const ALPHA: f32 = 0.5;

impl Interpolator {
    /// Creates an interpolator. The filter parameters are only used by the polyphase bank.
    pub fn new(kind: InterpolatorKind, sps: usize, rolloff: f32, rrc_delay: usize, nb_subfilters: usize) -> PlSyncResult<Self> {
        match kind {
            InterpolatorKind::Linear => Ok(Self::Linear),
            InterpolatorKind::Quadratic => Ok(Self::Quadratic),
            InterpolatorKind::Cubic => Ok(Self::Cubic),
            InterpolatorKind::Polyphase => Ok(Self::Polyphase(PolyphaseBank::new(sps, rolloff, rrc_delay, nb_subfilters)?)),
        }
    }

    pub fn kind(&self) -> InterpolatorKind {
        match self {
            Self::Linear => InterpolatorKind::Linear,
            Self::Quadratic => InterpolatorKind::Quadratic,
            Self::Cubic => InterpolatorKind::Cubic,
            Self::Polyphase(_) => InterpolatorKind::Polyphase,
        }
    }

    /// Number of samples before n that the interpolant depends on.
    pub fn lookback(&self) -> usize {
        match self {
            Self::Linear => 1,
            Self::Quadratic | Self::Cubic => 3,
            Self::Polyphase(bank) => bank.nb_taps,
        }
    }

    /// Interpolates at a fractional offset mu after the basepoint sample.
    /// The Farrow structures are centred on the interval between x[n-2] and x[n-1].
    pub fn interpolate(&self, x: &[Complex32], n: usize, mu: f32) -> Complex32 {
        debug_assert!(n >= self.lookback(), "Interpolant at {} requires {} samples of lookback", n, self.lookback());
        match self {
            Self::Linear => x[n] * mu + x[n - 1] * (1.0 - mu),
            Self::Quadratic => {
                let mu2 = mu * mu;
                let h = [
                    ALPHA * mu2 - ALPHA * mu,
                    -ALPHA * mu2 + (ALPHA + 1.0) * mu,
                    -ALPHA * mu2 + (ALPHA - 1.0) * mu + 1.0,
                    ALPHA * mu2 - ALPHA * mu,
                ];
                farrow(x, n, &h)
            },
            Self::Cubic => {
                let mu2 = mu * mu;
                let mu3 = mu2 * mu;
                let h = [
                    mu3 / 6.0 - mu / 6.0,
                    -mu3 / 2.0 + mu2 / 2.0 + mu,
                    mu3 / 2.0 - mu2 - mu / 2.0 + 1.0,
                    -mu3 / 6.0 + mu2 / 2.0 - mu / 3.0,
                ];
                farrow(x, n, &h)
            },
            Self::Polyphase(bank) => bank.filter(x, n, mu),
        }
    }
}

/// Applies the coefficients for x(m+2), x(m+1), x(m), x(m-1) with the basepoint m = n-2.
fn farrow(x: &[Complex32], n: usize, h: &[f32; 4]) -> Complex32 {
    x[n] * h[0] + x[n - 1] * h[1] + x[n - 2] * h[2] + x[n - 3] * h[3]
}

impl PolyphaseBank {
    pub fn new(sps: usize, rolloff: f32, rrc_delay: usize, nb_subfilters: usize) -> PlSyncResult<Self> {
        if sps == 0 {
            return Err(PlSyncError::InvalidPolyphaseBank("samples per symbol"));
        }
        if rrc_delay == 0 {
            return Err(PlSyncError::InvalidPolyphaseBank("filter delay"));
        }
        if nb_subfilters == 0 {
            return Err(PlSyncError::InvalidPolyphaseBank("number of sub-filters"));
        }
        if !(rolloff > 0.0 && rolloff <= 1.0) {
            return Err(PlSyncError::InvalidRolloff(rolloff));
        }

        let mut prototype = design_rrc(rolloff, 2 * rrc_delay, sps * nb_subfilters);
        // Normalise such that the sub-filter at zero offset has unit energy
        let energy: f32 = prototype.iter().step_by(nb_subfilters).map(|h| h * h).sum();
        let scale = energy.sqrt().recip();
        prototype.iter_mut().for_each(|h| *h *= scale);

        Ok(Self {
            prototype,
            nb_subfilters,
            nb_taps: 2 * rrc_delay * sps + 1,
        })
    }

    pub fn nb_subfilters(&self) -> usize {
        self.nb_subfilters
    }

    /// Taps of the i-th sub-filter.
    pub fn subfilter(&self, i: usize) -> impl Iterator<Item = &f32> + '_ {
        self.prototype.iter().skip(i).step_by(self.nb_subfilters)
    }

    fn filter(&self, x: &[Complex32], n: usize, mu: f32) -> Complex32 {
        let i = (mu * self.nb_subfilters as f32).round() as usize;
        // An offset of one whole sample is the zero offset sub-filter at the next sample
        let (i, n) = if i >= self.nb_subfilters { (0, n + 1) } else { (i, n) };
        self.subfilter(i)
            .enumerate()
            .map(|(k, &h)| x[n - 1 - k] * h)
            .sum()
    }
}

/// Root raised cosine impulse response spanning a number of symbols.
/// The peak is at the centre tap and the result is normalised to unit energy.
pub fn design_rrc(rolloff: f32, span_symbols: usize, samples_per_symbol: usize) -> Vec<f32> {
    let rolloff = rolloff as f64;
    let length = span_symbols * samples_per_symbol + 1;
    let delay = (length - 1) / 2;
    let ts = 1.0 / samples_per_symbol as f64;

    let mut taps: Vec<f64> = (0..length)
        .map(|i| {
            let t = (i as f64 - delay as f64) * ts;
            if t.abs() < 1e-10 {
                1.0 - rolloff + 4.0 * rolloff / PI
            } else if ((4.0 * rolloff * t).abs() - 1.0).abs() < 1e-10 {
                let a = (1.0 + 2.0 / PI) * (PI / (4.0 * rolloff)).sin();
                let b = (1.0 - 2.0 / PI) * (PI / (4.0 * rolloff)).cos();
                rolloff / 2.0_f64.sqrt() * (a + b)
            } else {
                let pi_t = PI * t;
                let four_alpha_t = 4.0 * rolloff * t;
                let num = (pi_t * (1.0 - rolloff)).sin() + four_alpha_t * (pi_t * (1.0 + rolloff)).cos();
                num / (pi_t * (1.0 - four_alpha_t * four_alpha_t))
            }
        })
        .collect();

    let norm = taps.iter().map(|h| h * h).sum::<f64>().sqrt();
    taps.iter_mut().for_each(|h| *h /= norm);
    taps.into_iter().map(|h| h as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(length: usize) -> Vec<Complex32> {
        (0..length).map(|i| Complex32::new(i as f32, -2.0 * i as f32)).collect()
    }

    #[test]
    fn farrow_interpolators_pass_through_samples() {
        let x: Vec<Complex32> = (0..8).map(|i| Complex32::new((i * i) as f32, 1.0)).collect();
        for interp in [Interpolator::Quadratic, Interpolator::Cubic] {
            assert_eq!(interp.interpolate(&x, 5, 0.0), x[3]);
            assert!((interp.interpolate(&x, 5, 1.0) - x[4]).norm() < 1e-5);
        }
        assert_eq!(Interpolator::Linear.interpolate(&x, 5, 0.0), x[4]);
        assert_eq!(Interpolator::Linear.interpolate(&x, 5, 1.0), x[5]);
    }

    #[test]
    fn interpolators_are_exact_on_ramps() {
        let x = ramp(16);
        for interp in [Interpolator::Linear, Interpolator::Quadratic, Interpolator::Cubic] {
            // Farrow structures lag the linear interpolator by one sample
            let base = match interp.kind() {
                InterpolatorKind::Linear => 9.0,
                _ => 8.0,
            };
            for mu in [0.0f32, 0.25, 0.5, 0.9] {
                let y = interp.interpolate(&x, 10, mu);
                let t = base + mu;
                assert!((y - Complex32::new(t, -2.0 * t)).norm() < 1e-4, "{:?} mu={} y={}", interp.kind(), mu, y);
            }
        }
    }

    #[test]
    fn cubic_is_exact_on_cubic_polynomials() {
        let f = |t: f32| 0.1 * t * t * t - t * t + 3.0;
        let x: Vec<Complex32> = (0..10).map(|i| Complex32::new(f(i as f32), 0.0)).collect();
        for mu in [0.1f32, 0.5, 0.7] {
            let y = Interpolator::Cubic.interpolate(&x, 6, mu);
            assert!((y.re - f(4.0 + mu)).abs() < 1e-3, "mu={} y={} expected={}", mu, y.re, f(4.0 + mu));
        }
    }

    #[test]
    fn rrc_is_symmetric_and_normalised() {
        let taps = design_rrc(0.2, 10, 4);
        assert_eq!(taps.len(), 41);
        let energy: f32 = taps.iter().map(|h| h * h).sum();
        assert!((energy - 1.0).abs() < 1e-5);
        for i in 0..taps.len() {
            assert!((taps[i] - taps[taps.len() - 1 - i]).abs() < 1e-6);
        }
        let (i_max, _) = taps.iter().enumerate().fold((0, f32::MIN), |acc, (i, &h)| if h > acc.1 { (i, h) } else { acc });
        assert_eq!(i_max, 20);
    }

    #[test]
    fn rrc_handles_singular_points() {
        // With a rolloff of 0.25 the sample at t=1/(4*0.25)=1 symbol hits the singular point
        let taps = design_rrc(0.25, 4, 4);
        assert!(taps.iter().all(|h| h.is_finite()));
    }

    #[test]
    fn polyphase_subfilter_zero_has_unit_energy() {
        let bank = PolyphaseBank::new(2, 0.2, 5, 128).unwrap();
        let energy: f32 = bank.subfilter(0).map(|h| h * h).sum();
        assert!((energy - 1.0).abs() < 1e-5);
        assert_eq!(bank.subfilter(0).count(), 21);
        let interp = Interpolator::Polyphase(bank);
        assert_eq!(interp.lookback(), 21);
    }

    #[test]
    fn polyphase_matched_filter_recovers_pulse_peak() {
        let sps = 4;
        let delay = 5;
        let tx = design_rrc(0.2, 2 * delay, sps);
        let interp = Interpolator::new(InterpolatorKind::Polyphase, sps, 0.2, delay, 128).unwrap();
        // Single unit symbol shaped by the transmit filter
        let mut x = vec![Complex32::default(); 200];
        for (i, &h) in tx.iter().enumerate() {
            x[50 + i] = Complex32::new(h, 0.0);
        }
        // Peak of the cascade lies at 50 + 2*delay*sps and the interpolant at mu=0 is x[n-1]
        let n = 50 + 2 * delay * sps + 1;
        let peak = interp.interpolate(&x, n, 0.0);
        assert!((peak.re - 1.0).abs() < 1e-3, "peak={}", peak);
        // Zero crossings one symbol either side
        assert!(interp.interpolate(&x, n + sps, 0.0).norm() < 5e-2);
        assert!(interp.interpolate(&x, n - sps, 0.0).norm() < 5e-2);
        // mu=1 is the same as mu=0 at the next sample
        assert_eq!(interp.interpolate(&x, n - 1, 1.0), peak);
    }

    #[test]
    fn polyphase_rejects_invalid_parameters() {
        assert_eq!(PolyphaseBank::new(2, 0.2, 5, 0).err(), Some(PlSyncError::InvalidPolyphaseBank("number of sub-filters")));
        assert_eq!(PolyphaseBank::new(2, 0.0, 5, 32).err(), Some(PlSyncError::InvalidRolloff(0.0)));
        assert_eq!(PolyphaseBank::new(2, 1.5, 5, 32).err(), Some(PlSyncError::InvalidRolloff(1.5)));
    }
}

use crate::error::{PlSyncError, PlSyncResult};
use crate::interpolators::{Interpolator, InterpolatorKind};
use num::complex::Complex32;
use serde::{Serialize, Deserialize};
use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolSyncSettings {
    /// Samples per symbol of the input. Must be an even integer.
    pub sps: f32,
    /// Loop noise bandwidth normalised to the sample rate.
    pub loop_bw: f32,
    /// Zero runs the loop open which turns it into a plain downsampler.
    pub damping_factor: f32,
    pub rolloff: f32,
    /// Delay in symbols of the polyphase matched filter.
    pub rrc_delay: usize,
    pub nb_subfilters: usize,
    pub interpolator: InterpolatorKind,
}

impl Default for SymbolSyncSettings {
    fn default() -> Self {
        Self {
            sps: 2.0,
            loop_bw: 0.01,
            damping_factor: 1.0,
            rolloff: 0.2,
            rrc_delay: 5,
            nb_subfilters: 128,
            interpolator: InterpolatorKind::Polyphase,
        }
    }
}

/// Symbol timing recovery with a Gardner timing error detector.
///
/// A modulo-1 counter decrements by the symbol period in samples on every input sample.
/// Each underflow is a strobe where an interpolant is produced at the fractional offset mu.
/// Rather than stepping the counter per sample, the number of samples until the next underflow is
/// computed directly from the loop filter output.
pub struct SymbolSync {
    settings: SymbolSyncSettings,
    sps: usize,
    interpolator: Interpolator,
    k1: f32,
    k2: f32,
    // loop state
    cnt: f32,
    mu: f32,
    vi: f32,
    last_xi: Complex32,
    is_started: bool,
    // history of input samples with the position of the next strobe
    buffer: Vec<Complex32>,
    buffer_start: i64,
    offset: usize,
    strobe_indexes: Vec<i64>,
}

impl SymbolSync {
    pub fn new(settings: SymbolSyncSettings) -> PlSyncResult<Self> {
        let sps = settings.sps;
        if !(sps >= 2.0 && sps.fract() == 0.0 && (sps as usize) % 2 == 0) {
            return Err(PlSyncError::InvalidSamplesPerSymbol(sps));
        }
        if settings.loop_bw <= 0.0 || !settings.loop_bw.is_finite() {
            return Err(PlSyncError::InvalidLoopBandwidth(settings.loop_bw));
        }
        if settings.damping_factor < 0.0 || !settings.damping_factor.is_finite() {
            return Err(PlSyncError::InvalidDampingFactor(settings.damping_factor));
        }
        if !(settings.rolloff > 0.0 && settings.rolloff <= 1.0) {
            return Err(PlSyncError::InvalidRolloff(settings.rolloff));
        }

        let interpolator = Interpolator::new(
            settings.interpolator, sps as usize,
            settings.rolloff, settings.rrc_delay, settings.nb_subfilters,
        )?;
        let (k1, k2) = calculate_loop_gains(sps, settings.loop_bw, settings.damping_factor, settings.rolloff);
        log::debug!("Symbol sync with {:?} interpolator and loop gains K1={:.4e} K2={:.4e}", settings.interpolator, k1, k2);

        let lookback = interpolator.lookback();
        Ok(Self {
            settings,
            sps: sps as usize,
            interpolator,
            k1,
            k2,
            cnt: 1.0 - 1.0/sps,
            mu: 0.0,
            vi: 0.0,
            last_xi: Complex32::default(),
            is_started: false,
            buffer: vec![Complex32::default(); lookback],
            buffer_start: -(lookback as i64),
            offset: lookback + 1,
            strobe_indexes: Vec::new(),
        })
    }

    /// Consumes input samples and produces symbols until either the input is exhausted or the output is full.
    /// Samples that cannot be used yet are held internally so the caller never supplies lookback.
    pub fn process(&mut self, input: &[Complex32], output: &mut [Complex32]) -> (usize, usize) {
        self.strobe_indexes.clear();

        // Only buffer what the requested number of strobes could need
        let capacity = self.offset + (output.len() + 3) * self.sps;
        let nb_consumed = input.len().min(capacity.saturating_sub(self.buffer.len()));
        self.buffer.extend_from_slice(&input[..nb_consumed]);

        if !self.is_started {
            if self.offset + 1 >= self.buffer.len() {
                return (nb_consumed, 0);
            }
            self.last_xi = self.interpolator.interpolate(&self.buffer, self.offset, 0.0);
            self.offset += self.sps;
            self.is_started = true;
        }

        let half_sps = self.sps / 2;
        let nominal = 1.0 / self.settings.sps;
        let mut nb_produced = 0;
        // NOTE: Polyphase interpolants at mu=1 read one sample past the strobe
        while nb_produced < output.len() && self.offset + 1 < self.buffer.len() {
            let xi = self.interpolator.interpolate(&self.buffer, self.offset, self.mu);
            let x_zc = self.interpolator.interpolate(&self.buffer, self.offset - half_sps, self.mu);
            output[nb_produced] = xi;
            nb_produced += 1;
            self.strobe_indexes.push(self.buffer_start + self.offset as i64);

            let error = x_zc.re * (self.last_xi.re - xi.re) + x_zc.im * (self.last_xi.im - xi.im);
            self.last_xi = xi;

            // proportional and integral arms
            self.vi += self.k2 * error;
            let mut w1 = nominal + self.k1 * error + self.vi;
            let mut w2 = nominal + self.vi;
            // A strobe can only advance by a positive step of at most one symbol per sample
            let is_valid_step = |w: f32| w > 0.0 && w <= 1.0;
            if !is_valid_step(w1) || !is_valid_step(w2) {
                log::warn!(
                    "Symbol timing loop diverged with error {:.3e} and steps {:.3e}/{:.3e}, resetting integral arm",
                    error, w1, w2,
                );
                self.vi = 0.0;
                w1 = nominal;
                w2 = nominal;
            }

            let jump = ((self.cnt - w1) / w2).floor() as i64 + 2;
            if jump > 1 {
                let cb = self.cnt - w1 - (jump - 2) as f32 * w2;
                self.mu = cb / w2;
                self.cnt = cb - w2 + 1.0;
            } else {
                self.mu = self.cnt / w1;
                self.cnt = self.cnt - w1 + 1.0;
            }
            self.mu = self.mu.clamp(0.0, 1.0);
            self.offset += jump.max(1) as usize;
        }

        // Drop samples that no future interpolant can reach
        let nb_keep = half_sps + self.interpolator.lookback();
        let nb_drain = self.offset.saturating_sub(nb_keep).min(self.buffer.len());
        self.buffer.drain(..nb_drain);
        self.buffer_start += nb_drain as i64;
        self.offset -= nb_drain;

        (nb_consumed, nb_produced)
    }

    /// Absolute input sample index of each symbol produced by the last call to process.
    pub fn strobe_indexes(&self) -> &[i64] {
        self.strobe_indexes.as_slice()
    }

    pub fn settings(&self) -> &SymbolSyncSettings {
        &self.settings
    }

    pub fn interpolator(&self) -> &Interpolator {
        &self.interpolator
    }

    pub fn fractional_offset(&self) -> f32 {
        self.mu
    }

    /// Deviation of the symbol period tracked by the integral arm.
    pub fn rate_offset(&self) -> f32 {
        self.vi
    }
}

fn calculate_loop_gains(sps: f32, loop_bw: f32, damping: f32, rolloff: f32) -> (f32, f32) {
    if damping == 0.0 {
        return (0.0, 0.0);
    }
    let bn_t = loop_bw / sps;
    let theta = bn_t / (damping + 1.0/(4.0*damping));
    let denom = 1.0 + 2.0*damping*theta + theta*theta;
    let kp_k0_k1 = 4.0*damping*theta / denom;
    let kp_k0_k2 = 4.0*theta*theta / denom;

    // slope of the Gardner S-curve at the origin for a raised cosine pulse
    let k0 = -1.0;
    let c = (PI*rolloff/2.0).sin() / (4.0*PI*(1.0 - rolloff*rolloff/4.0));
    let kp = 8.0*c * (2.0*PI/1000.0).sin() / (2.0/1000.0);

    (kp_k0_k1 / (kp*k0), kp_k0_k2 / (kp*k0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{NoiseSource, shape_symbols};

    fn ramp(length: usize) -> Vec<Complex32> {
        (0..length).map(|i| Complex32::new(i as f32, 0.0)).collect()
    }

    fn open_loop(sps: f32) -> SymbolSyncSettings {
        SymbolSyncSettings {
            sps,
            damping_factor: 0.0,
            interpolator: InterpolatorKind::Linear,
            ..SymbolSyncSettings::default()
        }
    }

    fn run(sync: &mut SymbolSync, x: &[Complex32], block_size: usize) -> (Vec<Complex32>, Vec<i64>) {
        let mut y = Vec::new();
        let mut strobes = Vec::new();
        let mut out = vec![Complex32::default(); 64];
        for block in x.chunks(block_size) {
            let mut block = block;
            while !block.is_empty() {
                let (nb_read, nb_written) = sync.process(block, &mut out);
                y.extend_from_slice(&out[..nb_written]);
                strobes.extend_from_slice(sync.strobe_indexes());
                block = &block[nb_read..];
            }
        }
        (y, strobes)
    }

    fn qpsk_evm(y: &[Complex32]) -> f32 {
        let scale = y.iter().map(|v| v.norm()).sum::<f32>() / y.len() as f32;
        let s = std::f32::consts::FRAC_1_SQRT_2;
        let error: f32 = y.iter()
            .map(|v| {
                let v = v / scale;
                let ideal = Complex32::new(s.copysign(v.re), s.copysign(v.im));
                (v - ideal).norm_sqr()
            })
            .sum();
        (error / y.len() as f32).sqrt()
    }

    #[test]
    fn open_loop_is_downsampler() {
        for sps in [2usize, 4, 8] {
            let mut sync = SymbolSync::new(open_loop(sps as f32)).unwrap();
            let (y, strobes) = run(&mut sync, &ramp(400), 400);
            assert!(y.len() >= 400/sps - 3, "sps={} produced={}", sps, y.len());
            // first symbol is dropped and the interpolant lies between the strobe and the preceding sample
            for (i, v) in y.iter().enumerate() {
                assert_eq!(v.re, ((i + 1) * sps) as f32, "sps={} i={}", sps, i);
            }
            for w in strobes.windows(2) {
                assert_eq!(w[1] - w[0], sps as i64);
            }
            assert_eq!(strobes[0], (sps + 1) as i64);
        }
    }

    #[test]
    fn output_is_independent_of_block_size() {
        let mut noise = NoiseSource::new(3);
        let mut symbols = vec![Complex32::default(); 300];
        noise.random_symbols(&mut symbols);
        let x = shape_symbols(&symbols, 2, 4, 1, 0.2, 10, false);

        let settings = SymbolSyncSettings::default();
        let (y0, s0) = run(&mut SymbolSync::new(settings).unwrap(), &x, x.len());
        let (y1, s1) = run(&mut SymbolSync::new(settings).unwrap(), &x, 7);
        let (y2, s2) = run(&mut SymbolSync::new(settings).unwrap(), &x, 128);
        assert_eq!(y0, y1);
        assert_eq!(y0, y2);
        assert_eq!(s0, s1);
        assert_eq!(s0, s2);
    }

    #[test]
    fn output_is_bounded_by_output_buffer() {
        let mut sync = SymbolSync::new(open_loop(2.0)).unwrap();
        let x = ramp(1000);
        let mut out = [Complex32::default(); 8];
        let (nb_read, nb_written) = sync.process(&x, &mut out);
        assert!(nb_read < x.len());
        assert!(nb_written <= out.len());
        assert_eq!(sync.strobe_indexes().len(), nb_written);
    }

    #[test]
    fn recovers_symbols_with_every_interpolator() {
        let mut noise = NoiseSource::new(17);
        let mut symbols = vec![Complex32::default(); 800];
        noise.random_symbols(&mut symbols);

        let cases = [
            // the polyphase bank is the receive filter so it gets transmit filtered samples
            (InterpolatorKind::Polyphase, 2, false, 0.25),
            (InterpolatorKind::Linear, 4, true, 0.3),
            (InterpolatorKind::Quadratic, 4, true, 0.25),
            (InterpolatorKind::Cubic, 4, true, 0.25),
        ];
        for (kind, sps, is_raised_cosine, max_evm) in cases {
            // timing offset of 3/8 of a sample
            let x = shape_symbols(&symbols, sps, 8, 3, 0.2, 10, is_raised_cosine);
            let settings = SymbolSyncSettings {
                sps: sps as f32,
                loop_bw: 0.01 * sps as f32,
                interpolator: kind,
                ..SymbolSyncSettings::default()
            };
            let mut sync = SymbolSync::new(settings).unwrap();
            let (y, _) = run(&mut sync, &x, 256);
            assert!(y.len() > 700, "{:?} produced {} symbols", kind, y.len());
            let evm = qpsk_evm(&y[300..700]);
            assert!(evm < max_evm, "{:?} evm={}", kind, evm);
        }
    }

    #[test]
    fn tracks_sample_rate_offset() {
        let mut noise = NoiseSource::new(23);
        let mut symbols = vec![Complex32::default(); 1200];
        noise.random_symbols(&mut symbols);
        // 4 samples per symbol resampled to 4.005 by linear interpolation of a finely oversampled signal
        let fine = shape_symbols(&symbols, 4, 8, 0, 0.2, 10, true);
        let step = 8.0 * 4.0 / 4.005;
        let x: Vec<Complex32> = (0..)
            .map(|i| i as f64 * step)
            .take_while(|&t| (t as usize) + 1 < fine.len())
            .map(|t| {
                let i = t as usize;
                let mu = (t - i as f64) as f32;
                fine[i] * (1.0 - mu) + fine[i + 1] * mu
            })
            .collect();

        let settings = SymbolSyncSettings {
            sps: 4.0,
            loop_bw: 0.04,
            interpolator: InterpolatorKind::Cubic,
            ..SymbolSyncSettings::default()
        };
        let mut sync = SymbolSync::new(settings).unwrap();
        let (y, _) = run(&mut sync, &x, 500);
        assert!(y.len() > 1100);
        let evm = qpsk_evm(&y[600..1100]);
        assert!(evm < 0.25, "evm={}", evm);
        // integral arm absorbs the longer symbol period
        assert!(sync.rate_offset() < 0.0, "vi={}", sync.rate_offset());
    }

    #[test]
    fn large_input_does_not_run_away() {
        let mut noise = NoiseSource::new(29);
        let mut symbols = vec![Complex32::default(); 10_000];
        noise.random_symbols(&mut symbols);
        let x: Vec<Complex32> = shape_symbols(&symbols, 2, 1, 0, 0.2, 10, false)
            .iter()
            .map(|v| v * 1000.0)
            .collect();

        let mut sync = SymbolSync::new(SymbolSyncSettings::default()).unwrap();
        let (y, strobes) = run(&mut sync, &x, 4096);
        let expected = x.len() / 2;
        assert!(y.len().abs_diff(expected) < expected / 50, "produced {} symbols from {} samples", y.len(), x.len());
        assert!(strobes.windows(2).all(|w| w[1] > w[0]));
        assert!(sync.rate_offset().is_finite());
    }

    #[test]
    fn rejects_invalid_settings() {
        let base = SymbolSyncSettings::default();
        for sps in [0.0, 1.0, 2.5, 3.0, -2.0] {
            let settings = SymbolSyncSettings { sps, ..base };
            assert_eq!(SymbolSync::new(settings).err(), Some(PlSyncError::InvalidSamplesPerSymbol(sps)));
        }
        let settings = SymbolSyncSettings { loop_bw: 0.0, ..base };
        assert_eq!(SymbolSync::new(settings).err(), Some(PlSyncError::InvalidLoopBandwidth(0.0)));
        let settings = SymbolSyncSettings { damping_factor: -1.0, ..base };
        assert_eq!(SymbolSync::new(settings).err(), Some(PlSyncError::InvalidDampingFactor(-1.0)));
        let settings = SymbolSyncSettings { rolloff: 1.2, ..base };
        assert_eq!(SymbolSync::new(settings).err(), Some(PlSyncError::InvalidRolloff(1.2)));
        let settings = SymbolSyncSettings { nb_subfilters: 0, ..base };
        assert!(matches!(SymbolSync::new(settings), Err(PlSyncError::InvalidPolyphaseBank(_))));
        // sub-filters are irrelevant for the other interpolators
        let settings = SymbolSyncSettings { nb_subfilters: 0, interpolator: InterpolatorKind::Cubic, ..base };
        assert!(SymbolSync::new(settings).is_ok());
    }

    #[test]
    fn open_loop_has_zero_gains() {
        assert_eq!(calculate_loop_gains(2.0, 0.01, 0.0, 0.2), (0.0, 0.0));
        let (k1, k2) = calculate_loop_gains(2.0, 0.01, 1.0, 0.2);
        assert!(k1 < 0.0 && k2 < 0.0);
        assert!(k1.abs() > k2.abs());
    }

    #[test]
    fn settings_from_partial_json() {
        let settings: SymbolSyncSettings = serde_json::from_str(r#"{ "sps": 4.0, "interpolator": "Cubic" }"#).unwrap();
        assert_eq!(settings.sps, 4.0);
        assert_eq!(settings.interpolator, InterpolatorKind::Cubic);
        assert_eq!(settings.loop_bw, SymbolSyncSettings::default().loop_bw);
        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(serde_json::from_str::<SymbolSyncSettings>(&json).unwrap(), settings);
    }
}

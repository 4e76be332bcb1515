use num::complex::Complex32;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

/// Seeded complex Gaussian noise.
pub struct NoiseSource {
    rng: StdRng,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// Box-Muller transform of two uniform samples.
    pub fn gaussian(&mut self) -> (f32, f32) {
        let u1: f32 = self.rng.gen_range(f32::EPSILON..1.0);
        let u2: f32 = self.rng.gen_range(0.0..1.0);
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f32::consts::PI * u2;
        (r * theta.cos(), r * theta.sin())
    }

    /// Adds noise with a given total power per complex sample.
    pub fn add_awgn(&mut self, x: &mut [Complex32], power: f32) {
        let sigma = (power / 2.0).sqrt();
        for v in x.iter_mut() {
            let (a, b) = self.gaussian();
            *v += Complex32::new(a * sigma, b * sigma);
        }
    }

    pub fn random_symbols(&mut self, x: &mut [Complex32]) {
        let (a, b) = (std::f32::consts::FRAC_1_SQRT_2, -std::f32::consts::FRAC_1_SQRT_2);
        for v in x.iter_mut() {
            let re = if self.rng.gen::<bool>() { a } else { b };
            let im = if self.rng.gen::<bool>() { a } else { b };
            *v = Complex32::new(re, im);
        }
    }
}

/// Applies a normalised frequency offset and initial phase.
pub fn rotate(x: &mut [Complex32], freq: f64, phase: f64) {
    for (i, v) in x.iter_mut().enumerate() {
        let theta = 2.0 * std::f64::consts::PI * freq * (i as f64) + phase;
        *v *= Complex32::from_polar(1.0, theta as f32);
    }
}

/// Shapes unit impulses with root raised cosine filters at sps*oversample
/// then decimates by the oversampling factor starting at a sub-sample offset.
/// A second filter pass gives a raised cosine response with zero ISI at the symbol centres.
pub fn shape_symbols(
    symbols: &[Complex32], sps: usize, oversample: usize, offset: usize,
    rolloff: f32, span: usize, is_raised_cosine: bool,
) -> Vec<Complex32> {
    let rate = sps * oversample;
    let taps = crate::interpolators::design_rrc(rolloff, span, rate);
    let mut y = vec![Complex32::default(); symbols.len() * rate + 2 * taps.len()];
    for (i, &s) in symbols.iter().enumerate() {
        for (k, &h) in taps.iter().enumerate() {
            y[i * rate + k] += s * h;
        }
    }
    if is_raised_cosine {
        let mut z = vec![Complex32::default(); y.len()];
        for (i, &v) in y.iter().enumerate().filter(|(_, v)| v.norm_sqr() > 0.0) {
            for (k, &h) in taps.iter().enumerate() {
                if let Some(z) = z.get_mut(i + k) {
                    *z += v * h;
                }
            }
        }
        y = z;
    }
    y.iter().skip(offset).step_by(oversample).copied().collect()
}

/// Builds a scrambled frame with a header, data slots and pilot blocks.
pub fn build_plframe(
    pls: &dvbs2_core::pls_info::PlsInfo, descrambler: &crate::pl_descrambler::PlDescrambler, data: &[Complex32],
) -> Vec<Complex32> {
    use dvbs2_core::pl_parameters::{SOF_LEN, PLHEADER_LEN, SLOT_LEN, SOF_BIG_ENDIAN, SQRT2_2};
    use dvbs2_core::pls_info::PayloadSymbol;
    assert!(data.len() == pls.nb_data_symbols(), "Frame requires {} data symbols", pls.nb_data_symbols());

    let mut frame = vec![Complex32::default(); pls.plframe_len];
    crate::pi2_bpsk::map_bpsk(SOF_BIG_ENDIAN, &mut frame[..SOF_LEN]);
    crate::pl_signalling::PlscEncoder::new().encode(pls.plsc, &mut frame[SOF_LEN..PLHEADER_LEN]);
    for (i, y) in frame[PLHEADER_LEN..].iter_mut().enumerate() {
        let x = match pls.classify(i) {
            PayloadSymbol::Data { slot, index } => data[slot * SLOT_LEN + index],
            PayloadSymbol::Pilot { .. } => Complex32::new(SQRT2_2, SQRT2_2),
            PayloadSymbol::Header => unreachable!("Payload symbol {} classified as header", i),
        };
        *y = descrambler.scramble(x, i);
    }
    frame
}

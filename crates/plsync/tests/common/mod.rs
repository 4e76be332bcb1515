#![allow(dead_code)]

use dvbs2_core::pl_parameters::{SOF_LEN, PLHEADER_LEN, SLOT_LEN, SOF_BIG_ENDIAN, SQRT2_2};
use dvbs2_core::pls_info::{PlsInfo, PayloadSymbol};
use num::complex::Complex32;
use plsync::pi2_bpsk::map_bpsk;
use plsync::pl_descrambler::PlDescrambler;
use plsync::pl_signalling::PlscEncoder;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

/// Transmitted frames with their data symbols.
pub struct Transmission {
    pub samples: Vec<Complex32>,
    pub frames: Vec<(PlsInfo, Vec<Complex32>)>,
    /// Index of the first header symbol of each frame.
    pub sof_indexes: Vec<usize>,
}

pub struct Transmitter {
    rng: StdRng,
    encoder: PlscEncoder,
    scrambler: PlDescrambler,
}

impl Transmitter {
    pub fn new(seed: u64, gold_code: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            encoder: PlscEncoder::new(),
            scrambler: PlDescrambler::new(gold_code).unwrap(),
        }
    }

    pub fn qpsk(&mut self, length: usize) -> Vec<Complex32> {
        (0..length)
            .map(|_| {
                let re = if self.rng.gen::<bool>() { SQRT2_2 } else { -SQRT2_2 };
                let im = if self.rng.gen::<bool>() { SQRT2_2 } else { -SQRT2_2 };
                Complex32::new(re, im)
            })
            .collect()
    }

    pub fn plframe(&mut self, pls: &PlsInfo, data: &[Complex32]) -> Vec<Complex32> {
        let mut frame = vec![Complex32::default(); pls.plframe_len];
        map_bpsk(SOF_BIG_ENDIAN, &mut frame[..SOF_LEN]);
        self.encoder.encode(pls.plsc, &mut frame[SOF_LEN..PLHEADER_LEN]);
        for (i, y) in frame[PLHEADER_LEN..].iter_mut().enumerate() {
            let x = match pls.classify(i) {
                PayloadSymbol::Data { slot, index } => data[slot * SLOT_LEN + index],
                PayloadSymbol::Pilot { .. } => Complex32::new(SQRT2_2, SQRT2_2),
                PayloadSymbol::Header => unreachable!(),
            };
            *y = self.scrambler.scramble(x, i);
        }
        frame
    }

    /// Random symbols followed by frames and a tail of random symbols.
    pub fn transmit(&mut self, frames: &[PlsInfo], nb_lead: usize, nb_tail: usize) -> Transmission {
        let mut samples = self.qpsk(nb_lead);
        let mut tx_frames = Vec::new();
        let mut sof_indexes = Vec::new();
        for pls in frames {
            let data = self.qpsk(pls.nb_data_symbols());
            sof_indexes.push(samples.len());
            samples.extend(self.plframe(pls, &data));
            tx_frames.push((*pls, data));
        }
        samples.extend(self.qpsk(nb_tail));
        Transmission { samples, frames: tx_frames, sof_indexes }
    }

    pub fn add_awgn(&mut self, x: &mut [Complex32], power: f32) {
        let sigma = (power / 2.0).sqrt();
        for v in x.iter_mut() {
            // Box-Muller
            let u1: f32 = self.rng.gen_range(f32::EPSILON..1.0);
            let u2: f32 = self.rng.gen_range(0.0..1.0);
            let r = (-2.0 * u1.ln()).sqrt() * sigma;
            let theta = 2.0 * std::f32::consts::PI * u2;
            *v += Complex32::new(r * theta.cos(), r * theta.sin());
        }
    }
}

pub fn apply_freq_offset(x: &mut [Complex32], freq: f64, phase: f64) {
    for (i, v) in x.iter_mut().enumerate() {
        let theta = 2.0 * std::f64::consts::PI * freq * (i as f64) + phase;
        *v *= Complex32::from_polar(1.0, theta as f32);
    }
}

/// Fraction of QPSK symbols whose quadrant differs.
pub fn symbol_error_rate(y: &[Complex32], x: &[Complex32]) -> f32 {
    assert_eq!(y.len(), x.len());
    let nb_errors = y.iter().zip(x)
        .filter(|(a, b)| (a.re > 0.0) != (b.re > 0.0) || (a.im > 0.0) != (b.im > 0.0))
        .count();
    nb_errors as f32 / y.len() as f32
}

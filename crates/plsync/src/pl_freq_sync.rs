//! Carrier frequency offset estimation from the known symbols of each frame.
//!
//! There are three estimators which differ in their range and accuracy.
//! - Coarse: Weighted phase increments of the autocorrelation of the modulation-removed header.
//!           Covers the full normalised range of [-0.5,+0.5] but is noisy since it only uses 26 or 90 symbols.
//! - Fine (pilots): Phase increments between the header and each pilot block which are 1476 symbols apart.
//!                  Only unambiguous for offsets within +-1/(2*1476).
//! - Fine (pilotless): Phase increment between consecutive headers.
//!                     Only unambiguous for offsets within +-1/(2*frame_length).
//!
//! All offsets are normalised to the symbol rate.

use crate::error::{PlSyncError, PlSyncResult};
use crate::pi2_bpsk::map_bpsk;
use crate::pl_signalling::PlscEncoder;
use dvbs2_core::pl_parameters::{
    SOF_LEN, PLHEADER_LEN, PILOT_BLK_LEN, PILOT_BLK_PERIOD, MAX_PILOT_BLKS, N_PLSC_CODEWORDS, SOF_BIG_ENDIAN,
};
use dvbs2_core::pls_info::pilot_blk_offset;
use itertools::izip;
use num::complex::{Complex32, Complex64};
use std::f64::consts::PI;

/// Offsets smaller than this can be estimated by the pilot aided fine estimator.
pub const FINE_FOFFSET_CORR_RANGE: f64 = 1.0 / (2.0 * PILOT_BLK_PERIOD as f64);

pub struct FreqSync {
    /// Number of headers whose autocorrelations are averaged for each coarse estimate.
    period: usize,
    i_frame: usize,
    coarse_foffset: f64,
    fine_foffset: f64,
    is_coarse_corrected: bool,
    is_fine_ready: bool,
    /// Conjugate of the expected header for every PLSC.
    plheader_conj: Vec<Complex32>,
    mod_removed: [Complex32; PLHEADER_LEN],
    pp_plheader: [Complex32; PLHEADER_LEN],
    // Autocorrelation accumulated over the period at lags 0..=L, lag zero unused
    autocorr: [Complex64; PLHEADER_LEN],
    is_autocorr_full: bool,
    weights_full: Vec<f64>,
    weights_sof: Vec<f64>,
    /// Phase of the header followed by the phase of each pilot block.
    pilot_angles: [f32; MAX_PILOT_BLKS + 1],
}

impl FreqSync {
    pub fn new(period: usize) -> PlSyncResult<Self> {
        if period == 0 {
            return Err(PlSyncError::InvalidEstimationPeriod);
        }

        Ok(Self {
            period,
            i_frame: 0,
            coarse_foffset: 0.0,
            fine_foffset: 0.0,
            is_coarse_corrected: false,
            is_fine_ready: false,
            plheader_conj: calculate_plheader_conj(),
            mod_removed: [Complex32::default(); PLHEADER_LEN],
            pp_plheader: [Complex32::default(); PLHEADER_LEN],
            autocorr: [Complex64::default(); PLHEADER_LEN],
            is_autocorr_full: false,
            weights_full: calculate_weights(PLHEADER_LEN - 1),
            weights_sof: calculate_weights(SOF_LEN - 1),
            pilot_angles: [0.0; MAX_PILOT_BLKS + 1],
        })
    }

    fn expected_conj(&self, plsc: u8) -> &[Complex32] {
        let i = (plsc as usize) % N_PLSC_CODEWORDS;
        &self.plheader_conj[i * PLHEADER_LEN..(i + 1) * PLHEADER_LEN]
    }

    fn remove_modulation(&mut self, x: &[Complex32], plsc: u8, length: usize) {
        let i = (plsc as usize) % N_PLSC_CODEWORDS;
        let expected = &self.plheader_conj[i * PLHEADER_LEN..i * PLHEADER_LEN + length];
        for (y, x, e) in izip!(self.mod_removed.iter_mut(), x, expected) {
            *y = x * e;
        }
    }

    /// Accumulates the autocorrelation of the modulation-removed header.
    /// Uses the full header if the PLSC is known, otherwise only the SOF.
    /// Returns true once a new estimate is available after `period` headers.
    pub fn estimate_coarse(&mut self, header: &[Complex32], is_full: bool, plsc: u8) -> bool {
        assert!(header.len() == PLHEADER_LEN, "Header has {} symbols instead of {}", header.len(), PLHEADER_LEN);

        // Restart the average if the header portion changed since the lags are not comparable
        if is_full != self.is_autocorr_full {
            self.autocorr.fill(Complex64::default());
            self.i_frame = 0;
            self.is_autocorr_full = is_full;
        }

        let n = if is_full { PLHEADER_LEN } else { SOF_LEN };
        let l = n - 1;
        self.remove_modulation(header, plsc, n);

        let r = &self.mod_removed[..n];
        for m in 1..=l {
            let sum: Complex64 = izip!(&r[m..], r)
                .map(|(a, b)| {
                    let v = a * b.conj();
                    Complex64::new(v.re as f64, v.im as f64)
                })
                .sum();
            self.autocorr[m] += sum;
        }

        self.i_frame += 1;
        if self.i_frame < self.period {
            return false;
        }
        self.i_frame = 0;

        // Angle differences with the angle at lag 0 taken as zero
        let weights = if is_full { &self.weights_full } else { &self.weights_sof };
        let mut prev_angle = 0.0;
        let mut weighted_sum = 0.0;
        for (m, w) in (1..=l).zip(weights.iter()) {
            let angle = self.autocorr[m].arg();
            weighted_sum += w * wrap_phase(angle - prev_angle);
            prev_angle = angle;
        }

        self.coarse_foffset = (weighted_sum / (2.0 * PI)).clamp(-0.5, 0.5);
        self.autocorr.fill(Complex64::default());
        self.is_coarse_corrected = self.coarse_foffset.abs() < FINE_FOFFSET_CORR_RANGE;
        log::debug!(
            "Coarse frequency offset: {:.4e} (corrected={}, full={})",
            self.coarse_foffset, self.is_coarse_corrected, is_full,
        );
        true
    }

    /// Phase of the SOF which is known before the PLSC is decoded.
    pub fn estimate_sof_phase(&self, header: &[Complex32]) -> f32 {
        assert!(header.len() >= SOF_LEN, "Header has {} symbols which is less than the SOF", header.len());
        let sum: Complex32 = izip!(&header[..SOF_LEN], self.expected_conj(0)).map(|(x, e)| x * e).sum();
        sum.arg()
    }

    /// Phase of the whole header given its decoded PLSC.
    pub fn estimate_plheader_phase(&mut self, header: &[Complex32], plsc: u8) -> f32 {
        assert!(header.len() == PLHEADER_LEN, "Header has {} symbols instead of {}", header.len(), PLHEADER_LEN);
        self.remove_modulation(header, plsc, PLHEADER_LEN);
        let sum: Complex32 = self.mod_removed.iter().sum();
        sum.arg()
    }

    /// Phase of a descrambled pilot block.
    /// Pilots are unmodulated (1+j)/sqrt(2) symbols so pi/4 is removed from the average phase.
    pub fn estimate_pilot_phase(&mut self, block: &[Complex32], i_blk: usize) -> f32 {
        assert!(block.len() == PILOT_BLK_LEN, "Pilot block has {} symbols instead of {}", block.len(), PILOT_BLK_LEN);
        assert!(i_blk < MAX_PILOT_BLKS, "Pilot block {} exceeds the maximum of {}", i_blk, MAX_PILOT_BLKS);
        let sum: Complex32 = block.iter().sum();
        let phase = wrap_phase_f32(sum.arg() - std::f32::consts::FRAC_PI_4);
        self.pilot_angles[i_blk + 1] = phase;
        phase
    }

    /// Fine estimate from the phase drift across the pilot blocks of a frame.
    ///
    /// The reference phase is taken from the last 36 symbols of the header so that it is
    /// exactly one pilot period before the first pilot block.
    /// ```text
    /// | SOF+PLSC[..54] | PLSC[54..] | SLOT*16 | PILOT | SLOT*16 | PILOT | ...
    ///                  |<------- 1476 ------->|<------- 1476 ------>|
    /// ```
    /// The payload must already be descrambled.
    pub fn estimate_fine_pilot_mode(&mut self, header: &[Complex32], payload: &[Complex32], nb_pilot_blks: usize, plsc: u8) -> bool {
        assert!(header.len() == PLHEADER_LEN, "Header has {} symbols instead of {}", header.len(), PLHEADER_LEN);
        assert!(nb_pilot_blks <= MAX_PILOT_BLKS, "Too many pilot blocks {}", nb_pilot_blks);
        if nb_pilot_blks == 0 {
            return false;
        }
        let payload_len = pilot_blk_offset(nb_pilot_blks - 1) + PILOT_BLK_LEN;
        assert!(payload.len() >= payload_len, "Payload has {} symbols but {} pilot blocks require {}", payload.len(), nb_pilot_blks, payload_len);

        self.remove_modulation(header, plsc, PLHEADER_LEN);
        let sum: Complex32 = self.mod_removed[PLHEADER_LEN - PILOT_BLK_LEN..].iter().sum();
        self.pilot_angles[0] = sum.arg();

        for i_blk in 0..nb_pilot_blks {
            let offset = pilot_blk_offset(i_blk);
            self.estimate_pilot_phase(&payload[offset..offset + PILOT_BLK_LEN], i_blk);
        }

        let sum_diff: f64 = self.pilot_angles[..=nb_pilot_blks]
            .windows(2)
            .map(|w| wrap_phase((w[1] - w[0]) as f64))
            .sum();
        self.fine_foffset = sum_diff / (2.0 * PI * (PILOT_BLK_PERIOD * nb_pilot_blks) as f64);
        self.is_fine_ready = true;
        log::debug!("Fine frequency offset from {} pilot blocks: {:.4e}", nb_pilot_blks, self.fine_foffset);
        true
    }

    /// Fine estimate from the phase drift between two consecutive headers.
    /// Fails if the coarse offset could be aliased over the frame length.
    pub fn estimate_fine_pilotless_mode(&mut self, phase_0: f32, phase_1: f32, frame_len: usize, coarse_foffset: f64) -> bool {
        assert!(frame_len > 0, "Frame length must be non-zero");
        let max_foffset = 1.0 / (2.0 * frame_len as f64);
        if coarse_foffset.abs() >= max_foffset {
            return false;
        }
        let phase_diff = wrap_phase((phase_1 - phase_0) as f64);
        self.fine_foffset = phase_diff / (2.0 * PI * frame_len as f64);
        self.is_fine_ready = true;
        log::debug!("Fine frequency offset over {} symbols: {:.4e}", frame_len, self.fine_foffset);
        true
    }

    /// Removes the frequency offset and SOF phase from the header before the PLSC is decoded.
    ///
    /// In open loop the best available frequency estimate is removed first.
    /// In closed loop an external rotator is already removing the offset so only the phase is corrected.
    pub fn derotate_plheader(&mut self, header: &[Complex32], is_open_loop: bool) -> &[Complex32] {
        assert!(header.len() == PLHEADER_LEN, "Header has {} symbols instead of {}", header.len(), PLHEADER_LEN);
        let freq = match (is_open_loop, self.is_coarse_corrected && self.is_fine_ready) {
            (false, _) => 0.0,
            (true, true) => self.fine_foffset,
            (true, false) => self.coarse_foffset,
        };

        for (i, (y, &x)) in self.pp_plheader.iter_mut().zip(header).enumerate() {
            let theta = -2.0 * PI * freq * (i as f64);
            *y = x * Complex32::from_polar(1.0, theta as f32);
        }
        let phase = self.estimate_sof_phase(&self.pp_plheader);
        let phasor = Complex32::from_polar(1.0, -phase);
        for y in self.pp_plheader.iter_mut() {
            *y *= phasor;
        }
        &self.pp_plheader
    }

    pub fn plheader(&self) -> &[Complex32] {
        &self.pp_plheader
    }

    pub fn coarse_foffset(&self) -> f64 {
        self.coarse_foffset
    }

    pub fn fine_foffset(&self) -> f64 {
        self.fine_foffset
    }

    pub fn is_coarse_corrected(&self) -> bool {
        self.is_coarse_corrected
    }

    pub fn is_fine_ready(&self) -> bool {
        self.is_fine_ready
    }

    /// Phases of the header and pilot blocks from the last pilot aided estimate.
    pub fn pilot_angles(&self) -> &[f32] {
        &self.pilot_angles
    }
}

fn calculate_plheader_conj() -> Vec<Complex32> {
    let encoder = PlscEncoder::new();
    let mut table = vec![Complex32::default(); PLHEADER_LEN * N_PLSC_CODEWORDS];
    for (plsc, header) in table.chunks_exact_mut(PLHEADER_LEN).enumerate() {
        map_bpsk(SOF_BIG_ENDIAN, &mut header[..SOF_LEN]);
        encoder.encode(plsc as u8, &mut header[SOF_LEN..]);
        header.iter_mut().for_each(|x| *x = x.conj());
    }
    table
}

/// Parabolic window that favours the lower lags of the autocorrelation.
/// w[m] = 3*((2L+1)^2 - (2m+1)^2) / (((2L+1)^2 - 1)*(2L+1))
fn calculate_weights(l: usize) -> Vec<f64> {
    let k = (2 * l + 1) as f64;
    (0..l)
        .map(|m| {
            let j = (2 * m + 1) as f64;
            3.0 * (k * k - j * j) / ((k * k - 1.0) * k)
        })
        .collect()
}

fn wrap_phase(x: f64) -> f64 {
    if x > PI {
        x - 2.0 * PI
    } else if x < -PI {
        x + 2.0 * PI
    } else {
        x
    }
}

fn wrap_phase_f32(x: f32) -> f32 {
    wrap_phase(x as f64) as f32
}

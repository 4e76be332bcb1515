//! Physical layer synchronisation of a symbol-spaced stream.
//!
//! Ties together frame timing, PLSC decoding, frequency estimation, descrambling
//! and the control of an upstream rotator.
//! ```text
//!            +--> frame sync --> PLHEADER --> freq sync --> PLSC decoder --> frame length
//! symbols ---+                                     |
//!            +--> descrambler --> pilots ----------+--> phase correction --> data symbols
//!                                                  +--> rotator commands
//! ```

use crate::error::{PlSyncError, PlSyncResult};
use crate::pl_descrambler::PlDescrambler;
use crate::pl_frame_sync::{FrameSync, FrameSyncSettings};
use crate::pl_freq_sync::FreqSync;
use crate::pl_signalling::{DecodeConfidence, DemapMode, PlsFilter, PlscDecoder};
use crate::rotator::RotatorCommand;
use dvbs2_core::pl_parameters::{SOF_LEN, PLHEADER_LEN, PILOT_BLK_LEN, MAX_PLFRAME_PAYLOAD};
use dvbs2_core::pls_info::{PlsInfo, PayloadSymbol};
use num::complex::Complex32;
use serde::{Serialize, Deserialize};
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Acknowledgements closer than this to the last one are duplicates.
const MIN_ACK_INTERVAL: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlSyncSettings {
    /// Gold code of the physical layer scrambler.
    pub gold_code: u32,
    /// Number of headers averaged by each coarse frequency estimate.
    pub freq_est_period: usize,
    /// Oversampling ratio at the rotator upstream of the matched filter.
    /// Used to convert symbol offsets into sample offsets when scheduling frequency corrections.
    pub sps: f32,
    /// Set of PLSC datawords that the decoder will consider.
    pub pls_filter: PlsFilter,
    /// Use soft decisions when decoding the PLSC coherently.
    pub soft_decoding: bool,
    /// Warn if the calibrated delay to the rotator exceeds this many symbols.
    pub tag_delay_tolerance: i64,
    pub frame_sync: FrameSyncSettings,
}

impl Default for PlSyncSettings {
    fn default() -> Self {
        Self {
            gold_code: 0,
            freq_est_period: 20,
            sps: 2.0,
            pls_filter: PlsFilter::default(),
            soft_decoding: false,
            tag_delay_tolerance: 300,
            frame_sync: FrameSyncSettings::default(),
        }
    }
}

/// Start of a frame in the output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStart {
    /// Absolute index of the first data symbol of the frame in the output stream.
    pub output_offset: u64,
    /// Absolute index of the first header symbol in the input stream.
    pub sof_index: i64,
    pub modcod: u8,
    pub is_short_fecframe: bool,
    pub has_pilots: bool,
    pub plsc: u8,
    /// Frames found while unlocked produce no data symbols.
    pub is_locked: bool,
    pub demap_mode: DemapMode,
    pub confidence: DecodeConfidence,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlSyncEvent {
    FrameStart(FrameStart),
    /// Frequency correction for the rotator upstream of the symbol synchroniser.
    RotatorCommand(RotatorCommand),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlSyncCounters {
    pub nb_sof: u64,
    /// Frames whose header arrived while locked.
    pub nb_frames: u64,
    /// Headers that arrived while searching for lock.
    pub nb_rejected: u64,
    pub nb_dummy: u64,
}

/// Rotator frequency in cycles per symbol and the symbol at which it took effect.
#[derive(Debug, Clone, Copy, Default)]
struct RotatorFreq {
    freq: f64,
    symbol_offset: i64,
}

/// Frequency corrections take effect at the start of the frame after the one being decoded.
/// The estimate from frame i-1 is therefore added to the rotator frequency used during frame i-1.
#[derive(Debug, Default)]
struct RotatorControl {
    /// Calibrated offset between the symbol where a change was scheduled and where it was acknowledged.
    tag_delay: i64,
    past: RotatorFreq,
    current: RotatorFreq,
    next: RotatorFreq,
    is_acknowledged: bool,
    pending_acks: VecDeque<(i64, f32)>,
}

pub struct PlSync {
    settings: PlSyncSettings,
    frame_sync: FrameSync,
    freq_sync: FreqSync,
    plsc_decoder: PlscDecoder,
    descrambler: PlDescrambler,
    rotator: RotatorControl,
    // current frame
    pls: Option<PlsInfo>,
    is_locked: bool,
    i_sym: usize,
    da_phase: f32,
    pilot_blk: [Complex32; PILOT_BLK_LEN],
    // previous frame
    last_header: [Complex32; PLHEADER_LEN],
    last_header_phase: f32,
    descrambled_payload: Vec<Complex32>,
    // stream position
    nb_symbols_read: i64,
    nb_symbols_written: u64,
    counters: PlSyncCounters,
    events: Vec<PlSyncEvent>,
}

impl PlSync {
    pub fn new(settings: PlSyncSettings) -> PlSyncResult<Self> {
        if !settings.sps.is_finite() || settings.sps <= 0.0 {
            return Err(PlSyncError::InvalidSamplesPerSymbol(settings.sps));
        }
        let frame_sync = FrameSync::new(settings.frame_sync)?;
        let freq_sync = FreqSync::new(settings.freq_est_period)?;
        let plsc_decoder = PlscDecoder::new(&settings.pls_filter)?;
        let descrambler = PlDescrambler::new(settings.gold_code)?;

        Ok(Self {
            settings,
            frame_sync,
            freq_sync,
            plsc_decoder,
            descrambler,
            rotator: RotatorControl::default(),
            pls: None,
            is_locked: false,
            i_sym: 0,
            da_phase: 0.0,
            pilot_blk: [Complex32::default(); PILOT_BLK_LEN],
            last_header: [Complex32::default(); PLHEADER_LEN],
            last_header_phase: 0.0,
            descrambled_payload: vec![Complex32::default(); MAX_PLFRAME_PAYLOAD],
            nb_symbols_read: 0,
            nb_symbols_written: 0,
            counters: PlSyncCounters::default(),
            events: Vec::new(),
        })
    }

    /// Consumes symbols and writes phase corrected data symbols of locked frames.
    /// Stops early before a data symbol that would not fit in the output.
    pub fn process(&mut self, input: &[Complex32], output: &mut [Complex32]) -> (usize, usize) {
        let mut nb_produced = 0;
        let mut nb_consumed = 0;

        for &x in input {
            let role = match self.pls {
                Some(pls) => pls.classify(self.i_sym),
                None => PayloadSymbol::Header,
            };
            let is_dummy = self.pls.map(|pls| pls.is_dummy_frame).unwrap_or(true);
            let is_output = self.is_locked && !is_dummy && matches!(role, PayloadSymbol::Data { .. });
            if is_output && nb_produced >= output.len() {
                break;
            }

            let descrambled = match role {
                PayloadSymbol::Header => x,
                _ => self.descrambler.descramble(x, self.i_sym),
            };
            self.i_sym += 1;

            if let PayloadSymbol::Pilot { block, index } = role {
                self.pilot_blk[index] = descrambled;
                if index == PILOT_BLK_LEN-1 {
                    self.da_phase = self.freq_sync.estimate_pilot_phase(&self.pilot_blk, block);
                }
            }

            let is_sof = self.frame_sync.step(x);
            let i_abs = self.nb_symbols_read;
            self.nb_symbols_read += 1;
            nb_consumed += 1;

            if is_sof {
                let output_offset = self.nb_symbols_written + nb_produced as u64;
                self.on_start_of_frame(i_abs, output_offset);
            } else if self.is_locked && !self.frame_sync.is_locked() {
                self.is_locked = false;
            }

            if is_output {
                output[nb_produced] = descrambled * Complex32::from_polar(1.0, -self.da_phase);
                nb_produced += 1;
            }
        }

        self.nb_symbols_written += nb_produced as u64;
        (nb_consumed, nb_produced)
    }

    fn on_start_of_frame(&mut self, i_detect: i64, output_offset: u64) {
        // The peak occurs on the last symbol of the header
        let abs_sof_index = i_detect - (PLHEADER_LEN as i64 - 1);
        let is_locked = self.frame_sync.is_locked();
        self.is_locked = is_locked;
        self.counters.nb_sof += 1;

        // NOTE: After a missed header the saved header belongs to an earlier frame.
        //       Estimates that pair it with the current frame would span more than one frame.
        let nb_missed_headers = self.frame_sync.nb_missed_headers();
        let is_consecutive = is_locked && nb_missed_headers == 0;

        // While locked the previous PLSC was most likely correct so its full header is used
        let last_pls = self.pls.filter(|_| is_consecutive);
        let is_new_coarse = match last_pls {
            Some(pls) => self.freq_sync.estimate_coarse(&self.last_header, true, pls.plsc),
            None => self.freq_sync.estimate_coarse(self.frame_sync.header(), false, 0),
        };

        let mut is_new_fine = false;
        if let Some(pls) = last_pls.filter(|pls| pls.has_pilots) {
            let payload = self.frame_sync.payload();
            if payload.len() >= pls.payload_len {
                let descrambled = &mut self.descrambled_payload[..pls.payload_len];
                self.descrambler.descramble_slice(&payload[..pls.payload_len], descrambled, 0);
                is_new_fine = self.freq_sync.estimate_fine_pilot_mode(&self.last_header, descrambled, pls.nb_pilot_blks, pls.plsc);
            }
        }

        let is_coarse_corrected = self.freq_sync.is_coarse_corrected();
        let demap_mode = match (is_locked && is_coarse_corrected, self.settings.soft_decoding) {
            (true, true) => DemapMode::Soft,
            (true, false) => DemapMode::Coherent,
            (false, _) => DemapMode::Differential,
        };
        let pp_header = self.freq_sync.derotate_plheader(self.frame_sync.header(), !self.rotator.is_acknowledged);
        let decoding = self.plsc_decoder.decode(&pp_header[SOF_LEN-1..], demap_mode);
        let pls = decoding.pls;

        let header_phase = self.freq_sync.estimate_plheader_phase(self.frame_sync.header(), pls.plsc);
        if let Some(last_pls) = last_pls.filter(|pls| !pls.has_pilots) {
            let coarse_foffset = self.freq_sync.coarse_foffset();
            is_new_fine = self.freq_sync.estimate_fine_pilotless_mode(
                self.last_header_phase, header_phase, last_pls.plframe_len, coarse_foffset,
            );
        }

        if is_locked {
            self.counters.nb_frames += 1;
        } else {
            self.counters.nb_rejected += 1;
        }
        if pls.is_dummy_frame {
            self.counters.nb_dummy += 1;
        } else {
            log::debug!(
                "Frame start: {{ sof: {}, modcod: {}, short: {}, pilots: {}, locked: {} }}",
                abs_sof_index, pls.modcod, pls.is_short_fecframe, pls.has_pilots, is_locked,
            );
            self.events.push(PlSyncEvent::FrameStart(FrameStart {
                output_offset,
                sof_index: abs_sof_index,
                modcod: pls.modcod,
                is_short_fecframe: pls.is_short_fecframe,
                has_pilots: pls.has_pilots,
                plsc: pls.plsc,
                is_locked,
                demap_mode: decoding.mode,
                confidence: decoding.confidence,
            }));
        }

        self.frame_sync.set_frame_len(pls.plframe_len);
        // Only symbols up to this header have been seen by this stage
        self.calibrate_tag_delay(abs_sof_index, i_detect + 1);
        if is_consecutive {
            self.control_rotator(abs_sof_index, pls.plframe_len, is_coarse_corrected, is_new_coarse, is_new_fine);
        } else if is_locked {
            log::debug!("Rotator left unchanged after {} missing headers", nb_missed_headers);
        }

        self.last_header.copy_from_slice(self.frame_sync.header());
        self.last_header_phase = header_phase;
        self.da_phase = header_phase;
        self.pls = Some(pls);
        self.i_sym = 0;
    }

    fn calibrate_tag_delay(&mut self, abs_sof_index: i64, ack_search_end: i64) {
        let rot = &mut self.rotator;
        while let Some(&(ack_offset, phase_inc)) = rot.pending_acks.front() {
            if ack_offset >= ack_search_end {
                break;
            }
            rot.pending_acks.pop_front();

            if rot.current.symbol_offset > 0 && (ack_offset - rot.current.symbol_offset) < MIN_ACK_INTERVAL {
                continue;
            }

            // The residual error is corrected on every frame so the delay is the accumulated error
            let error = abs_sof_index - ack_offset;
            rot.tag_delay += error;
            rot.current = RotatorFreq {
                freq: -(self.settings.sps as f64) * (phase_inc as f64) / (2.0*PI),
                symbol_offset: ack_offset,
            };
            rot.is_acknowledged = true;
            log::debug!(
                "Rotator acknowledged: {{ phase_inc: {:.4e}, offset: {}, expected: {}, error: {}, delay: {} }}",
                phase_inc, ack_offset, abs_sof_index, error, rot.tag_delay,
            );
            if rot.tag_delay.abs() > self.settings.tag_delay_tolerance {
                log::warn!("Rotator acknowledgement delay of {} symbols seems too high", rot.tag_delay);
            }
        }
    }

    fn control_rotator(&mut self, abs_sof_index: i64, plframe_len: usize, is_coarse_corrected: bool, is_new_coarse: bool, is_new_fine: bool) {
        let freq_adjust = match (is_coarse_corrected, is_new_coarse, is_new_fine) {
            (true, _, true) => self.freq_sync.fine_foffset(),
            (false, true, _) => self.freq_sync.coarse_foffset(),
            _ => return,
        };

        let rot = &mut self.rotator;
        let abs_next_sof_index = abs_sof_index + plframe_len as i64;
        rot.next = RotatorFreq {
            freq: rot.past.freq + freq_adjust,
            symbol_offset: abs_next_sof_index + rot.tag_delay,
        };
        if rot.current.symbol_offset < rot.past.symbol_offset || rot.next.symbol_offset < rot.current.symbol_offset {
            log::warn!(
                "Rotator schedule is out of order: {{ past: {}, current: {}, next: {} }}",
                rot.past.symbol_offset, rot.current.symbol_offset, rot.next.symbol_offset,
            );
            return;
        }

        let sps = self.settings.sps as f64;
        let command = RotatorCommand {
            phase_inc: (-2.0*PI * rot.next.freq / sps) as f32,
            sample_offset: (sps * rot.next.symbol_offset as f64).round() as i64,
        };
        log::debug!(
            "Rotator frequency {:.4e} scheduled at sample {} (coarse_corrected={})",
            rot.next.freq, command.sample_offset, is_coarse_corrected,
        );
        self.events.push(PlSyncEvent::RotatorCommand(command));
        rot.past = rot.current;
    }

    /// Reports that the rotator applied a phase increment starting from the given symbol.
    /// The symbol offset is in the input stream of this stage.
    pub fn acknowledge_rotator(&mut self, symbol_offset: i64, phase_inc: f32) {
        let i = self.rotator.pending_acks.partition_point(|&(offset, _)| offset <= symbol_offset);
        self.rotator.pending_acks.insert(i, (symbol_offset, phase_inc));
    }

    pub fn drain_events(&mut self) -> std::vec::Drain<'_, PlSyncEvent> {
        self.events.drain(..)
    }

    pub fn settings(&self) -> &PlSyncSettings {
        &self.settings
    }

    pub fn counters(&self) -> &PlSyncCounters {
        &self.counters
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    /// PLS information of the most recently decoded header.
    pub fn pls(&self) -> Option<&PlsInfo> {
        self.pls.as_ref()
    }

    /// Frequency offset in cycles per symbol that the rotator is expected to remove.
    pub fn freq_offset(&self) -> f64 {
        self.rotator.next.freq
    }

    pub fn tag_delay(&self) -> i64 {
        self.rotator.tag_delay
    }

    pub fn frame_sync(&self) -> &FrameSync {
        &self.frame_sync
    }

    pub fn freq_sync(&self) -> &FreqSync {
        &self.freq_sync
    }
}

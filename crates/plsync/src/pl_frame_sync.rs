use crate::delay_line::{DelayLine, ReversedDelayLine};
use crate::error::{PlSyncError, PlSyncResult};
use crate::linear_bucket::LinearBucket;
use crate::pi2_bpsk::map_bpsk;
use dvbs2_core::pl_parameters::{SOF_LEN, PLSC_LEN, PLHEADER_LEN, MAX_PLFRAME_PAYLOAD, SOF_BIG_ENDIAN, PLSC_SCRAMBLER};
use itertools::izip;
use num::complex::Complex32;
use serde::{Serialize, Deserialize};

/// Number of differentials between consecutive SOF symbols.
pub const SOF_CORR_LEN: usize = SOF_LEN - 1;
/// Number of differentials between the symbol pairs (2i,2i+1) of the PLSC.
pub const PLSC_CORR_LEN: usize = PLSC_LEN / 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSyncSettings {
    /// Timing metric a peak must exceed when searching for a frame.
    /// A clean unit energy header produces a metric of 57.
    pub threshold_unlocked: f32,
    /// Timing metric a peak must exceed at the expected position when locked.
    pub threshold_locked: f32,
    /// Consecutive missing headers before lock is abandoned.
    pub unlock_thresh: usize,
}

impl Default for FrameSyncSettings {
    fn default() -> Self {
        Self {
            threshold_unlocked: 30.0,
            threshold_locked: 25.0,
            unlock_thresh: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSyncState {
    /// No header has been found yet. Every symbol is a potential header.
    Searching,
    /// At least one header was found but the next one was not where the frame length said it would be.
    Found,
    /// Consecutive headers were found a frame length apart.
    /// The correlators only run over the 90 symbols preceding the expected header.
    Locked,
}

/// Locates the PLHEADER by correlating symbol differentials against the known SOF and PLSC scrambler patterns.
///
/// Using differentials makes the correlation insensitive to the carrier phase and tolerant of large frequency offsets.
/// The PLSC correlator only looks at the symbol pairs (2i,2i+1) since the interleaved Reed-Muller code
/// makes their differential identical for every codeword up to a common sign.
/// ```text
///                         +-> delay(64) -> SOF correlator  --+
/// x -> conj(x[n])*x[n-1] -+                                  +-> max(|sof+plsc|, |sof-plsc|)
///                         +-> even/odd PLSC correlator ------+
/// ```
pub struct FrameSync {
    pub settings: FrameSyncSettings,
    state: FrameSyncState,
    sym_cnt: usize,
    frame_len: usize,
    nb_misses: usize,
    nb_missed_headers: usize,
    sof_interval: usize,
    last_in: Complex32,
    timing_metric: f32,
    // correlators
    sof_taps: [Complex32; SOF_CORR_LEN],
    plsc_taps: [Complex32; PLSC_CORR_LEN],
    plsc_delay_buf: DelayLine<Complex32>,
    sof_buf: DelayLine<Complex32>,
    plsc_even_buf: DelayLine<Complex32>,
    plsc_odd_buf: DelayLine<Complex32>,
    // frame buffers
    plheader_buf: ReversedDelayLine<Complex32>,
    payload_buf: LinearBucket<Complex32>,
    is_payload_stale: bool,
}

impl FrameSync {
    pub fn new(settings: FrameSyncSettings) -> PlSyncResult<Self> {
        if settings.unlock_thresh == 0 {
            return Err(PlSyncError::FrameSync("unlock threshold must be at least one missed frame".to_string()));
        }
        if settings.threshold_unlocked <= 0.0 || settings.threshold_locked <= 0.0 {
            return Err(PlSyncError::FrameSync(format!(
                "timing metric thresholds must be positive but got unlocked={} and locked={}",
                settings.threshold_unlocked, settings.threshold_locked,
            )));
        }

        Ok(Self {
            settings,
            state: FrameSyncState::Searching,
            sym_cnt: 0,
            frame_len: 0,
            nb_misses: 0,
            nb_missed_headers: 0,
            sof_interval: 0,
            last_in: Complex32::default(),
            timing_metric: 0.0,
            sof_taps: calculate_sof_taps(),
            plsc_taps: calculate_plsc_taps(),
            plsc_delay_buf: DelayLine::new(PLSC_LEN + 1),
            sof_buf: DelayLine::new(SOF_CORR_LEN),
            plsc_even_buf: DelayLine::new(PLSC_CORR_LEN),
            plsc_odd_buf: DelayLine::new(PLSC_CORR_LEN),
            plheader_buf: ReversedDelayLine::new(PLHEADER_LEN),
            payload_buf: LinearBucket::new(MAX_PLFRAME_PAYLOAD),
            is_payload_stale: false,
        })
    }

    /// Processes one symbol and returns whether it is the last symbol of a PLHEADER.
    pub fn step(&mut self, x: Complex32) -> bool {
        if self.is_payload_stale {
            self.payload_buf.reset();
            self.is_payload_stale = false;
        }

        self.sym_cnt += 1;
        let is_payload = self.frame_len > PLHEADER_LEN && self.sym_cnt <= (self.frame_len - PLHEADER_LEN);
        if is_payload && self.state != FrameSyncState::Searching {
            self.payload_buf.push(x);
        }

        // NOTE: When locked only the 90 symbols before the expected header need to go through the correlators
        if is_payload && self.state == FrameSyncState::Locked {
            return false;
        }

        self.plheader_buf.push(x);

        let diff = x.conj() * self.last_in;
        self.last_in = x;

        // Delay the SOF differentials so both correlators peak on the same symbol
        self.plsc_delay_buf.push(diff);
        self.sof_buf.push(*self.plsc_delay_buf.oldest());

        let is_odd = (self.sym_cnt & 1) == 1;
        if is_odd {
            self.plsc_odd_buf.push(diff);
        } else {
            self.plsc_even_buf.push(diff);
        }

        if self.state == FrameSyncState::Locked && self.sym_cnt < self.frame_len {
            return false;
        }

        let sof_corr = correlate(self.sof_buf.window(), &self.sof_taps);
        let plsc_buf = if is_odd { &self.plsc_odd_buf } else { &self.plsc_even_buf };
        let plsc_corr = correlate(plsc_buf.window(), &self.plsc_taps);

        // The sign of the PLSC correlation depends on the LSB of the dataword
        let abs_sum = (sof_corr + plsc_corr).norm();
        let abs_diff = (sof_corr - plsc_corr).norm();
        self.timing_metric = abs_sum.max(abs_diff);

        let threshold = match self.state {
            FrameSyncState::Locked => self.settings.threshold_locked,
            _ => self.settings.threshold_unlocked,
        };
        let is_peak = self.timing_metric > threshold;

        if is_peak {
            self.on_peak(sof_corr, plsc_corr);
        } else if self.state == FrameSyncState::Locked {
            self.on_missed_peak();
        }
        is_peak
    }

    fn on_peak(&mut self, sof_corr: Complex32, plsc_corr: Complex32) {
        let is_expected = self.frame_len > 0 && self.sym_cnt == self.frame_len;
        let next_state = match (self.state, is_expected) {
            (FrameSyncState::Searching, _) => FrameSyncState::Found,
            (_, true) => FrameSyncState::Locked,
            (_, false) => FrameSyncState::Found,
        };

        if next_state == FrameSyncState::Locked && self.state != FrameSyncState::Locked {
            log::info!("Frame lock acquired with timing metric {:.1}", self.timing_metric);
        }
        log::debug!(
            "Frame sync peak: {{ after: {}, metric: {:.1}, sof: {:.1}, plsc: {:.1}, state: {:?} }}",
            self.sym_cnt, self.timing_metric, sof_corr, plsc_corr, next_state,
        );

        self.state = next_state;
        self.nb_missed_headers = self.nb_misses;
        self.nb_misses = 0;
        self.sof_interval = self.sym_cnt;
        self.sym_cnt = 0;
        self.is_payload_stale = true;
    }

    fn on_missed_peak(&mut self) {
        self.nb_misses += 1;
        if self.nb_misses >= self.settings.unlock_thresh {
            log::warn!(
                "Frame lock lost after {} missing headers with timing metric {:.1}",
                self.nb_misses, self.timing_metric,
            );
            self.state = FrameSyncState::Searching;
            self.nb_misses = 0;
            self.nb_missed_headers = 0;
            self.frame_len = 0;
            return;
        }

        log::debug!(
            "Missing header {}/{} with timing metric {:.1}",
            self.nb_misses, self.settings.unlock_thresh, self.timing_metric,
        );
        // Assume the header was there and expect the next one a frame later
        self.sym_cnt = 0;
        self.is_payload_stale = true;
    }

    /// Sets the length of the frame whose header was just found, including the header.
    pub fn set_frame_len(&mut self, frame_len: usize) {
        assert!(frame_len > PLHEADER_LEN, "Frame length {} must exceed the header length", frame_len);
        assert!(frame_len - PLHEADER_LEN <= MAX_PLFRAME_PAYLOAD, "Frame length {} exceeds the maximum payload", frame_len);
        self.frame_len = frame_len;
    }

    /// Forgets the current frame and starts searching again.
    pub fn unlock(&mut self) {
        self.state = FrameSyncState::Searching;
        self.sym_cnt = 0;
        self.frame_len = 0;
        self.nb_misses = 0;
        self.nb_missed_headers = 0;
        self.is_payload_stale = true;
    }

    /// The 90 symbols of the most recent header ordered from oldest to newest.
    pub fn header(&self) -> &[Complex32] {
        self.plheader_buf.window()
    }

    /// Symbols between the previous and current header.
    /// Only buffered while a frame has been found and a frame length was provided.
    pub fn payload(&self) -> &[Complex32] {
        self.payload_buf.as_slice()
    }

    pub fn sof_taps(&self) -> &[Complex32] {
        &self.sof_taps
    }

    pub fn plsc_taps(&self) -> &[Complex32] {
        &self.plsc_taps
    }

    pub fn timing_metric(&self) -> f32 {
        self.timing_metric
    }

    /// Number of symbols between the last two peaks.
    pub fn sof_interval(&self) -> usize {
        self.sof_interval
    }

    /// Headers that were assumed missing while locked just before the most recent peak.
    /// Non-zero means the previous header was not the one of the preceding frame.
    pub fn nb_missed_headers(&self) -> usize {
        self.nb_missed_headers
    }

    pub fn state(&self) -> FrameSyncState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state == FrameSyncState::Locked
    }

    pub fn is_locked_or_almost(&self) -> bool {
        self.state != FrameSyncState::Searching
    }
}

fn correlate(window: &[Complex32], taps: &[Complex32]) -> Complex32 {
    assert!(window.len() == taps.len(), "Window ({}) and taps ({}) have different lengths", window.len(), taps.len());
    izip!(window, taps).map(|(x, h)| x * h).sum()
}

/// Rounds away the floating point error of products of unit energy pi/2 BPSK symbols.
fn round_complex(x: Complex32) -> Complex32 {
    Complex32::new(x.re.round(), x.im.round())
}

/// Differentials sof[i+1]*conj(sof[i]), reversed to match the newest first correlator window.
fn calculate_sof_taps() -> [Complex32; SOF_CORR_LEN] {
    let mut sof = [Complex32::default(); SOF_LEN];
    map_bpsk(SOF_BIG_ENDIAN, &mut sof);
    let mut taps = [Complex32::default(); SOF_CORR_LEN];
    for (tap, pair) in taps.iter_mut().zip(sof.windows(2)) {
        *tap = round_complex(pair[1] * pair[0].conj());
    }
    taps.reverse();
    taps
}

/// Differentials scr[2i+1]*conj(scr[2i]) of the PLSC scrambler, reversed like the SOF taps.
fn calculate_plsc_taps() -> [Complex32; PLSC_CORR_LEN] {
    let mut scrambler = [Complex32::default(); PLSC_LEN];
    map_bpsk(PLSC_SCRAMBLER, &mut scrambler);
    let mut taps = [Complex32::default(); PLSC_CORR_LEN];
    for (tap, pair) in taps.iter_mut().zip(scrambler.chunks_exact(2)) {
        *tap = round_complex(pair[1] * pair[0].conj());
    }
    taps.reverse();
    taps
}

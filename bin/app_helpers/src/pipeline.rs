use num::complex::Complex32;
use plsync::error::PlSyncResult;
use plsync::plsync::{PlSync, PlSyncEvent, PlSyncSettings};
use plsync::rotator::{Rotator, RotatorAck};
use plsync::symbol_sync::{SymbolSync, SymbolSyncSettings};
use serde::{Serialize, Deserialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Scales input samples before synchronisation.
    /// Frame detection expects symbols of roughly unit amplitude after the matched filter.
    pub input_gain: f32,
    pub symbol_sync: SymbolSyncSettings,
    pub plsync: PlSyncSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            input_gain: 1.0,
            symbol_sync: SymbolSyncSettings::default(),
            plsync: PlSyncSettings::default(),
        }
    }
}

const SYMBOL_BUFFER_SIZE: usize = 4096;

/// Rotator, symbol timing recovery and physical layer synchronisation chained in one block.
///
/// Frequency corrections published by the frame synchroniser are scheduled on the rotator.
/// The rotator acknowledges them in samples which are translated to symbols using the strobes of the
/// timing recovery loop, so the frame synchroniser can calibrate the delay around the loop.
pub struct Pipeline {
    input_gain: f32,
    rotator: Rotator,
    symbol_sync: SymbolSync,
    plsync: PlSync,
    samples: Vec<Complex32>,
    symbols: Vec<Complex32>,
    data: Vec<Complex32>,
    pending_acks: VecDeque<RotatorAck>,
    nb_symbols: i64,
    events: Vec<PlSyncEvent>,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings) -> PlSyncResult<Self> {
        let mut plsync_settings = settings.plsync.clone();
        if plsync_settings.sps != settings.symbol_sync.sps {
            log::warn!(
                "Scheduling rotator commands with {} samples per symbol instead of {}",
                settings.symbol_sync.sps, plsync_settings.sps,
            );
            plsync_settings.sps = settings.symbol_sync.sps;
        }
        let symbol_sync = SymbolSync::new(settings.symbol_sync)?;
        let plsync = PlSync::new(plsync_settings)?;

        Ok(Self {
            input_gain: settings.input_gain,
            rotator: Rotator::default(),
            symbol_sync,
            plsync,
            samples: Vec::new(),
            symbols: vec![Complex32::default(); SYMBOL_BUFFER_SIZE],
            data: vec![Complex32::default(); SYMBOL_BUFFER_SIZE],
            pending_acks: VecDeque::new(),
            nb_symbols: 0,
            events: Vec::new(),
        })
    }

    /// Consumes all input samples and appends the data symbols of locked frames to the output.
    pub fn process(&mut self, input: &[Complex32], output: &mut Vec<Complex32>) {
        let mut samples = std::mem::take(&mut self.samples);
        samples.clear();
        samples.extend(input.iter().map(|x| x * self.input_gain));
        self.rotator.process(&mut samples);
        self.pending_acks.extend(self.rotator.drain_acknowledgements());

        let mut remaining = samples.as_slice();
        while !remaining.is_empty() {
            let (nb_read, nb_symbols) = self.symbol_sync.process(remaining, &mut self.symbols);
            remaining = &remaining[nb_read..];
            self.forward_acknowledgements();
            self.run_plsync(nb_symbols, output);
            self.nb_symbols += nb_symbols as i64;
            if nb_read == 0 && nb_symbols == 0 {
                log::warn!("Symbol synchroniser stalled with {} samples left", remaining.len());
                break;
            }
        }
        self.samples = samples;
    }

    fn forward_acknowledgements(&mut self) {
        let strobes = self.symbol_sync.strobe_indexes();
        while let Some(ack) = self.pending_acks.front() {
            // first symbol interpolated from samples after the change
            let i = strobes.partition_point(|&s| s < ack.sample_offset);
            if i >= strobes.len() {
                break;
            }
            self.plsync.acknowledge_rotator(self.nb_symbols + i as i64, ack.phase_inc);
            self.pending_acks.pop_front();
        }
    }

    fn run_plsync(&mut self, nb_symbols: usize, output: &mut Vec<Complex32>) {
        let mut symbols = &self.symbols[..nb_symbols];
        while !symbols.is_empty() {
            let (nb_read, nb_written) = self.plsync.process(symbols, &mut self.data);
            output.extend_from_slice(&self.data[..nb_written]);
            symbols = &symbols[nb_read..];
            for event in self.plsync.drain_events() {
                if let PlSyncEvent::RotatorCommand(command) = &event {
                    self.rotator.schedule(*command);
                }
                self.events.push(event);
            }
        }
    }

    /// Frame starts and rotator commands in the order they were produced.
    pub fn drain_events(&mut self) -> std::vec::Drain<'_, PlSyncEvent> {
        self.events.drain(..)
    }

    pub fn rotator(&self) -> &Rotator {
        &self.rotator
    }

    pub fn symbol_sync(&self) -> &SymbolSync {
        &self.symbol_sync
    }

    pub fn plsync(&self) -> &PlSync {
        &self.plsync
    }

    /// Total symbols produced by the timing recovery loop.
    pub fn nb_symbols(&self) -> i64 {
        self.nb_symbols
    }
}

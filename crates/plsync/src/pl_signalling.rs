use crate::error::PlSyncResult;
use crate::pi2_bpsk::{map_bpsk, demap_bpsk, demap_bpsk_diff, derotate_bpsk};
use crate::reed_muller::{ReedMuller, HardDecoding, SoftDecoding, default_euclidean_map, CODEWORD_LEN};
use dvbs2_core::pl_parameters::{PLSC_LEN, PLSC_SCRAMBLER, N_PLSC_CODEWORDS};
use dvbs2_core::pls_info::{PlsInfo, encode_plsc};
use num::complex::Complex32;
use serde::{Serialize, Deserialize};

/// How the PLSC symbols are converted into bits before Reed-Muller decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemapMode {
    /// Hard decisions on each symbol. Requires the header to be phase and frequency corrected.
    Coherent,
    /// Hard decisions on the phase change between consecutive symbols.
    /// Tolerates large frequency offsets at the cost of roughly 3dB.
    Differential,
    /// Real valued soft decisions. Requires the same corrections as coherent demapping.
    Soft,
}

/// Set of PLSC datawords that the decoder may return.
/// Bit i of `lo` accepts dataword i and bit i of `hi` accepts dataword 64+i.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlsFilter {
    pub lo: u64,
    pub hi: u64,
}

impl Default for PlsFilter {
    fn default() -> Self {
        Self { lo: u64::MAX, hi: u64::MAX }
    }
}

impl PlsFilter {
    pub fn from_datawords(datawords: &[u8]) -> Self {
        let mut filter = Self { lo: 0, hi: 0 };
        for &plsc in datawords {
            let plsc = plsc & 0x7F;
            if plsc < 64 {
                filter.lo |= 1u64 << plsc;
            } else {
                filter.hi |= 1u64 << (plsc - 64);
            }
        }
        filter
    }

    pub fn accepts(&self, plsc: u8) -> bool {
        match plsc {
            0..=63 => (self.lo >> plsc) & 1 != 0,
            64..=127 => (self.hi >> (plsc - 64)) & 1 != 0,
            _ => false,
        }
    }

    pub fn datawords(&self) -> Vec<u8> {
        (0..N_PLSC_CODEWORDS as u8).filter(|&plsc| self.accepts(plsc)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lo == 0 && self.hi == 0
    }
}

/// Decoding confidence of a PLSC. It is reported but never enforced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodeConfidence {
    Hard(HardDecoding),
    Soft(SoftDecoding),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlscDecoding {
    pub pls: PlsInfo,
    pub mode: DemapMode,
    pub confidence: DecodeConfidence,
}

/// Scrambles the codeword so that the soft decision image matches the received PLSC directly.
fn plsc_euclidean_map(codeword: u64, out: &mut [f32]) {
    default_euclidean_map(codeword ^ PLSC_SCRAMBLER, out);
}

/// Maps PLSC datawords to their scrambled pi/2 BPSK symbols.
pub struct PlscEncoder {
    reed_muller: ReedMuller,
}

impl Default for PlscEncoder {
    fn default() -> Self {
        Self { reed_muller: ReedMuller::new() }
    }
}

impl PlscEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&self, plsc: u8, out: &mut [Complex32]) {
        assert!(out.len() == PLSC_LEN, "PLSC requires {} symbols but got {}", PLSC_LEN, out.len());
        let codeword = self.reed_muller.encode(plsc);
        map_bpsk(codeword ^ PLSC_SCRAMBLER, out);
    }

    pub fn encode_modcod(&self, modcod: u8, is_short_fecframe: bool, has_pilots: bool, out: &mut [Complex32]) {
        self.encode(encode_plsc(modcod, is_short_fecframe, has_pilots), out);
    }
}

/// Recovers the PLS information from the received header.
pub struct PlscDecoder {
    reed_muller: ReedMuller,
    soft_decisions: [f32; CODEWORD_LEN],
}

impl PlscDecoder {
    pub fn new(filter: &PlsFilter) -> PlSyncResult<Self> {
        let reed_muller = ReedMuller::with_candidates(&filter.datawords(), plsc_euclidean_map)?;
        Ok(Self {
            reed_muller,
            soft_decisions: [0.0; CODEWORD_LEN],
        })
    }

    /// Decodes the PLSC.
    /// The input starts at the last SOF symbol and is followed by the 64 PLSC symbols.
    pub fn decode(&mut self, x: &[Complex32], mode: DemapMode) -> PlscDecoding {
        assert!(x.len() == PLSC_LEN + 1, "Expected the last SOF symbol and {} PLSC symbols but got {}", PLSC_LEN, x.len());
        let confidence = match mode {
            DemapMode::Soft => {
                derotate_bpsk(&x[1..], &mut self.soft_decisions);
                DecodeConfidence::Soft(self.reed_muller.decode_soft(&self.soft_decisions))
            },
            DemapMode::Coherent => {
                let rx_plsc = demap_bpsk(&x[1..]) ^ PLSC_SCRAMBLER;
                DecodeConfidence::Hard(self.reed_muller.decode_hard(rx_plsc))
            },
            DemapMode::Differential => {
                let rx_plsc = demap_bpsk_diff(x) ^ PLSC_SCRAMBLER;
                DecodeConfidence::Hard(self.reed_muller.decode_hard(rx_plsc))
            },
        };

        let plsc = match confidence {
            DecodeConfidence::Hard(res) => res.dataword,
            DecodeConfidence::Soft(res) => res.dataword,
        };
        let pls = PlsInfo::from_plsc(plsc);
        log::debug!(
            "Decoded PLSC: {{ mode: {:?}, modcod: {}, short: {}, pilots: {}, slots: {}, length: {}, confidence: {:?} }}",
            mode, pls.modcod, pls.is_short_fecframe, pls.has_pilots, pls.nb_slots, pls.plframe_len, confidence,
        );
        PlscDecoding { pls, mode, confidence }
    }
}

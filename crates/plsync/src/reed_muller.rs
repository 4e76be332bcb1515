use crate::error::{PlSyncError, PlSyncResult};
use dvbs2_core::pl_parameters::N_PLSC_CODEWORDS;
use itertools::izip;

/// Number of bits in an interleaved (64,7,32) codeword.
pub const CODEWORD_LEN: usize = 64;

/// Maps a codeword into its real valued image used for soft decision decoding.
/// The output holds one value per codeword bit starting from the most significant bit.
pub type EuclideanMap = fn(codeword: u64, out: &mut [f32]);

/// Maps bit 0 to +1 and bit 1 to -1.
pub fn default_euclidean_map(codeword: u64, out: &mut [f32]) {
    assert!(out.len() == CODEWORD_LEN, "Euclidean image requires {} values but got {}", CODEWORD_LEN, out.len());
    for (j, y) in out.iter_mut().enumerate() {
        let bit = (codeword >> (63 - j)) & 1;
        *y = 1.0 - 2.0 * (bit as f32);
    }
}

/// Result of a hard decision decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardDecoding {
    pub dataword: u8,
    /// Hamming distance to the chosen codeword.
    pub distance: u32,
    /// Hamming distance to the second closest candidate, if there is more than one candidate.
    pub runner_up_distance: Option<u32>,
}

impl HardDecoding {
    /// How many more bit errors separate the runner up from the chosen codeword.
    pub fn margin(&self) -> Option<u32> {
        self.runner_up_distance.map(|d| d - self.distance)
    }
}

/// Result of a soft decision decode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftDecoding {
    pub dataword: u8,
    /// Inner product between the soft values and the chosen codeword's image.
    pub correlation: f32,
    /// Inner product with the second best candidate, if there is more than one candidate.
    pub runner_up_correlation: Option<f32>,
}

impl SoftDecoding {
    pub fn margin(&self) -> Option<f32> {
        self.runner_up_correlation.map(|c| self.correlation - c)
    }
}

/// Interleaved (64,7,32) Reed-Muller code used by the physical layer signalling.
///
/// The 32 bit RM(1,5) codeword is built from the upper 6 bits of the dataword.
/// The least significant bit selects how it is interleaved into 64 bits.
/// ```text
/// b0 = 0: y1 y1 y2 y2 ... y32 y32
/// b0 = 1: y1 !y1 y2 !y2 ... y32 !y32
/// ```
pub struct ReedMuller {
    codewords: [u64; N_PLSC_CODEWORDS],
    /// Datawords that the decoder is allowed to return.
    candidates: Vec<u8>,
    /// Euclidean image of each candidate.
    images: Vec<f32>,
}

impl Default for ReedMuller {
    fn default() -> Self {
        let candidates: Vec<u8> = (0..N_PLSC_CODEWORDS as u8).collect();
        Self::build(candidates, default_euclidean_map)
    }
}

impl ReedMuller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts decoding to a subset of datawords and/or replaces the soft decision image.
    pub fn with_candidates(candidates: &[u8], euclidean_map: EuclideanMap) -> PlSyncResult<Self> {
        if candidates.is_empty() {
            return Err(PlSyncError::EmptyCodewordSet);
        }
        if let Some(&invalid) = candidates.iter().find(|&&x| (x as usize) >= N_PLSC_CODEWORDS) {
            return Err(PlSyncError::InvalidCodeword(invalid as usize));
        }
        let mut candidates = candidates.to_vec();
        candidates.sort_unstable();
        candidates.dedup();
        Ok(Self::build(candidates, euclidean_map))
    }

    fn build(candidates: Vec<u8>, euclidean_map: EuclideanMap) -> Self {
        let codewords = calculate_codeword_table();
        let mut images = vec![0.0f32; candidates.len() * CODEWORD_LEN];
        for (&dataword, image) in candidates.iter().zip(images.chunks_exact_mut(CODEWORD_LEN)) {
            euclidean_map(codewords[dataword as usize], image);
        }
        Self { codewords, candidates, images }
    }

    pub fn candidates(&self) -> &[u8] {
        &self.candidates
    }

    pub fn encode(&self, dataword: u8) -> u64 {
        self.codewords[(dataword & 0x7F) as usize]
    }

    /// Maximum likelihood decoding by searching for the candidate with the smallest Hamming distance.
    /// Ties go to the lowest dataword.
    pub fn decode_hard(&self, codeword: u64) -> HardDecoding {
        let mut best = (self.candidates[0], u32::MAX);
        let mut runner_up: Option<u32> = None;
        for &dataword in &self.candidates {
            let distance = (codeword ^ self.codewords[dataword as usize]).count_ones();
            if distance < best.1 {
                if best.1 != u32::MAX {
                    runner_up = Some(best.1);
                }
                best = (dataword, distance);
            } else if runner_up.map_or(true, |d| distance < d) {
                runner_up = Some(distance);
            }
        }
        HardDecoding {
            dataword: best.0,
            distance: best.1,
            runner_up_distance: runner_up,
        }
    }

    /// Maximum likelihood decoding by searching for the candidate image with the largest inner product.
    pub fn decode_soft(&self, soft: &[f32]) -> SoftDecoding {
        assert!(soft.len() == CODEWORD_LEN, "Soft decoding requires {} values but got {}", CODEWORD_LEN, soft.len());
        let mut best = (self.candidates[0], f32::NEG_INFINITY);
        let mut runner_up: Option<f32> = None;
        for (&dataword, image) in self.candidates.iter().zip(self.images.chunks_exact(CODEWORD_LEN)) {
            let correlation: f32 = izip!(soft, image).map(|(x, y)| x * y).sum();
            if correlation > best.1 {
                if best.1 != f32::NEG_INFINITY {
                    runner_up = Some(best.1);
                }
                best = (dataword, correlation);
            } else if runner_up.map_or(true, |c| correlation > c) {
                runner_up = Some(correlation);
            }
        }
        SoftDecoding {
            dataword: best.0,
            correlation: best.1,
            runner_up_correlation: runner_up,
        }
    }
}

fn calculate_codeword_table() -> [u64; N_PLSC_CODEWORDS] {
    // Rows of the RM(1,5) generator matrix
    const G: [u32; 6] = [0x5555_5555, 0x3333_3333, 0x0F0F_0F0F, 0x00FF_00FF, 0x0000_FFFF, 0xFFFF_FFFF];

    let mut table = [0u64; N_PLSC_CODEWORDS];
    for i in 0..(N_PLSC_CODEWORDS / 2) {
        // The most significant dataword bit multiplies the first row
        let code32 = G
            .iter()
            .enumerate()
            .filter(|(row, _)| i & (0x20 >> row) != 0)
            .fold(0u32, |acc, (_, g)| acc ^ g);
        table[2 * i] = bit_interleave(code32, code32);
        table[2 * i + 1] = bit_interleave(code32, !code32);
    }
    table
}

/// Interleaves two words into a 64 bit word ordered as a31 b31 ... a0 b0.
fn bit_interleave(a: u32, b: u32) -> u64 {
    (0..32).fold(0u64, |acc, i| {
        let a_bit = ((a >> i) & 1) as u64;
        let b_bit = ((b >> i) & 1) as u64;
        acc | (a_bit << (2 * i + 1)) | (b_bit << (2 * i))
    })
}

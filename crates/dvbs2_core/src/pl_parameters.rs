//! A physical layer frame (PLFRAME) consists of a header (PLHEADER) and S data slots.
//! When pilots are enabled a pilot block is inserted after every 16 slots, except after the last one.
//!
//! # Diagram
//! ```text
//! | PLFRAME                                                          |
//! | PLHEADER        | SLOT*16 | PILOT | SLOT*16 | PILOT | ... | SLOT*N |
//! | SOF(26) PLSC(64)| 1440    | 36    | 1440    | 36    | ... |        |
//! ```
//!
//! The pilot blocks repeat with a period of 16*90+36 = 1476 symbols counted from the first payload symbol.

/// Number of symbols in the start of frame (SOF) marker.
pub const SOF_LEN: usize = 26;
/// Number of symbols in the physical layer signalling code (PLSC).
pub const PLSC_LEN: usize = 64;
/// Number of symbols in the physical layer header.
pub const PLHEADER_LEN: usize = SOF_LEN + PLSC_LEN;
/// Number of symbols in a data slot.
pub const SLOT_LEN: usize = 90;
/// Number of symbols in a pilot block.
pub const PILOT_BLK_LEN: usize = 36;
/// Number of data slots between consecutive pilot blocks.
pub const SLOTS_PER_PILOT_BLK: usize = 16;
/// Number of data symbols between consecutive pilot blocks.
pub const PILOT_BLK_INTERVAL: usize = SLOTS_PER_PILOT_BLK * SLOT_LEN;
/// Distance in symbols between the starts of consecutive pilot blocks.
pub const PILOT_BLK_PERIOD: usize = PILOT_BLK_INTERVAL + PILOT_BLK_LEN;
/// Largest number of slots in a frame (QPSK normal FECFRAME).
pub const MAX_SLOTS: usize = 360;
/// Largest number of pilot blocks in a frame.
pub const MAX_PILOT_BLKS: usize = (MAX_SLOTS - 1) / SLOTS_PER_PILOT_BLK;
/// Largest number of symbols after the header (data slots and pilot blocks).
pub const MAX_PLFRAME_PAYLOAD: usize = MAX_SLOTS * SLOT_LEN + MAX_PILOT_BLKS * PILOT_BLK_LEN;
/// Largest number of symbols in a frame including the header.
pub const MAX_PLFRAME_LEN: usize = PLHEADER_LEN + MAX_PLFRAME_PAYLOAD;
/// Number of distinct PLSC datawords.
pub const N_PLSC_CODEWORDS: usize = 128;

/// Scrambling sequence applied to the 64 bit PLSC codeword before pi/2 BPSK mapping.
pub const PLSC_SCRAMBLER: u64 = 0x719D_83C9_5342_2DFA;
/// The 26 bit SOF pattern 0x18D2E82 aligned to the most significant bit of a 64 bit word.
pub const SOF_BIG_ENDIAN: u64 = 0x18D_2E82 << (64 - SOF_LEN);

/// Largest valid index for the physical layer scrambling Gold code.
pub const MAX_GOLD_CODE: u32 = 262_142;

/// Half of the square root of two, the magnitude of each axis of a unit energy pi/2 BPSK symbol.
pub const SQRT2_2: f32 = std::f32::consts::FRAC_1_SQRT_2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_lengths() {
        assert_eq!(PLHEADER_LEN, 90);
        assert_eq!(PILOT_BLK_PERIOD, 1476);
        assert_eq!(MAX_PILOT_BLKS, 22);
        assert_eq!(MAX_PLFRAME_PAYLOAD, 33_192);
        assert_eq!(MAX_PLFRAME_LEN, 33_282);
    }

    #[test]
    fn sof_occupies_top_bits() {
        assert_eq!(SOF_BIG_ENDIAN >> 38, 0x18D_2E82);
        assert_eq!(SOF_BIG_ENDIAN & ((1u64 << 38) - 1), 0);
    }
}

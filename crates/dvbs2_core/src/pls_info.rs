use crate::pl_parameters::{
    PLHEADER_LEN, SLOT_LEN, PILOT_BLK_LEN, PILOT_BLK_INTERVAL, PILOT_BLK_PERIOD, SLOTS_PER_PILOT_BLK,
};

/// Physical layer signalling information carried by the 7 bit PLSC dataword.
///
/// # Dataword layout
/// ```text
/// | b6 b5 b4 b3 b2 | b1           | b0     |
/// | MODCOD         | short FECFRAME | pilots |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlsInfo {
    /// The raw 7 bit dataword.
    pub plsc: u8,
    /// Modulation and coding index. Zero indicates a dummy frame.
    pub modcod: u8,
    /// Whether the frame carries a short (16200 bit) FECFRAME.
    pub is_short_fecframe: bool,
    /// Whether pilot blocks are inserted between slots.
    pub has_pilots: bool,
    /// Dummy frames carry no data and are never decoded downstream.
    pub is_dummy_frame: bool,
    /// Number of bits per constellation symbol. Zero for dummy frames.
    pub nb_bits_per_symbol: usize,
    /// Number of 90 symbol data slots.
    pub nb_slots: usize,
    /// Number of 36 symbol pilot blocks.
    pub nb_pilot_blks: usize,
    /// Number of symbols in the frame including the header.
    pub plframe_len: usize,
    /// Number of symbols after the header (data slots and pilot blocks).
    pub payload_len: usize,
}

/// Role of a symbol that follows a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSymbol {
    /// A data symbol at a given slot.
    Data { slot: usize, index: usize },
    /// A pilot symbol at a given pilot block.
    Pilot { block: usize, index: usize },
    /// The symbol is past the payload and belongs to the next header.
    Header,
}

impl PlsInfo {
    /// Parses a 7 bit dataword. The most significant bit of a u8 is ignored.
    pub fn from_plsc(plsc: u8) -> Self {
        let plsc = plsc & 0x7F;
        let modcod = plsc >> 2;
        let is_short_fecframe = (plsc & 0b10) != 0;
        let is_dummy_frame = modcod == 0;
        // A dummy frame cannot have pilots
        let has_pilots = (plsc & 0b01) != 0 && !is_dummy_frame;

        let (nb_bits_per_symbol, mut nb_slots) = match modcod {
            1..=11  => (2, 360),
            12..=17 => (3, 240),
            18..=23 => (4, 180),
            24..=28 => (5, 144),
            _       => (0, 36),
        };
        if is_short_fecframe && !is_dummy_frame {
            nb_slots >>= 2;
        }

        let nb_pilot_blks = match has_pilots {
            true => (nb_slots - 1) / SLOTS_PER_PILOT_BLK,
            false => 0,
        };
        let plframe_len = (nb_slots + 1) * SLOT_LEN + nb_pilot_blks * PILOT_BLK_LEN;

        Self {
            plsc,
            modcod,
            is_short_fecframe,
            has_pilots,
            is_dummy_frame,
            nb_bits_per_symbol,
            nb_slots,
            nb_pilot_blks,
            plframe_len,
            payload_len: plframe_len - PLHEADER_LEN,
        }
    }

    /// Builds the PLS info for a given modulation and frame type.
    pub fn from_modcod(modcod: u8, is_short_fecframe: bool, has_pilots: bool) -> Self {
        Self::from_plsc(encode_plsc(modcod, is_short_fecframe, has_pilots))
    }

    /// Number of data symbols in the payload, excluding pilot blocks.
    pub fn nb_data_symbols(&self) -> usize {
        self.nb_slots * SLOT_LEN
    }

    /// Locates a symbol given its index after the end of the header.
    pub fn classify(&self, i_sym: usize) -> PayloadSymbol {
        if i_sym >= self.payload_len {
            return PayloadSymbol::Header;
        }

        if !self.has_pilots {
            return PayloadSymbol::Data { slot: i_sym / SLOT_LEN, index: i_sym % SLOT_LEN };
        }

        let block = i_sym / PILOT_BLK_PERIOD;
        let offset = i_sym - block * PILOT_BLK_PERIOD;
        if offset >= PILOT_BLK_INTERVAL {
            return PayloadSymbol::Pilot { block, index: offset - PILOT_BLK_INTERVAL };
        }
        let data_index = i_sym - block * PILOT_BLK_LEN;
        PayloadSymbol::Data { slot: data_index / SLOT_LEN, index: data_index % SLOT_LEN }
    }
}

/// Packs the frame parameters into a 7 bit PLSC dataword.
pub fn encode_plsc(modcod: u8, is_short_fecframe: bool, has_pilots: bool) -> u8 {
    ((modcod & 0x1F) << 2) | ((is_short_fecframe as u8) << 1) | (has_pilots as u8)
}

/// Payload offset of the first symbol of a pilot block.
pub fn pilot_blk_offset(i_blk: usize) -> usize {
    (i_blk + 1) * PILOT_BLK_PERIOD - PILOT_BLK_LEN
}

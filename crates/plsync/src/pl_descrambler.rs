use crate::error::{PlSyncError, PlSyncResult};
use dvbs2_core::pl_parameters::{MAX_GOLD_CODE, MAX_PLFRAME_PAYLOAD};
use num::complex::Complex32;

/// Removes the physical layer scrambling from the payload of a frame.
///
/// The complex scrambling sequence is e^(j*Rn*pi/2) where Rn is built from two 18 bit LFSRs.
/// The x sequence is advanced by the Gold code n while the y sequence always starts from all ones.
/// The sequence restarts on every frame so it is generated once for the longest payload.
pub struct PlDescrambler {
    gold_code: u32,
    rn: Vec<u8>,
}

impl PlDescrambler {
    pub fn new(gold_code: u32) -> PlSyncResult<Self> {
        if gold_code > MAX_GOLD_CODE {
            return Err(PlSyncError::InvalidGoldCode(gold_code));
        }
        Ok(Self {
            gold_code,
            rn: calculate_scrambling_sequence(gold_code, MAX_PLFRAME_PAYLOAD),
        })
    }

    pub fn gold_code(&self) -> u32 {
        self.gold_code
    }

    /// Index of the scrambling phase in multiples of 90 degrees.
    pub fn rn(&self, i_sym: usize) -> u8 {
        self.rn[i_sym]
    }

    /// Descrambles a payload symbol given its index after the header.
    pub fn descramble(&self, x: Complex32, i_sym: usize) -> Complex32 {
        // Multiply by conj(e^(j*Rn*pi/2))
        match self.rn[i_sym] {
            0 => x,
            1 => Complex32::new(x.im, -x.re),
            2 => -x,
            _ => Complex32::new(-x.im, x.re),
        }
    }

    pub fn scramble(&self, x: Complex32, i_sym: usize) -> Complex32 {
        match self.rn[i_sym] {
            0 => x,
            1 => Complex32::new(-x.im, x.re),
            2 => -x,
            _ => Complex32::new(x.im, -x.re),
        }
    }

    /// Descrambles consecutive payload symbols starting at a given index.
    pub fn descramble_slice(&self, x: &[Complex32], y: &mut [Complex32], i_start: usize) {
        assert!(x.len() == y.len(), "Input ({}) and output ({}) lengths differ", x.len(), y.len());
        assert!(i_start + x.len() <= self.rn.len(), "Symbols {}..{} exceed the maximum payload", i_start, i_start + x.len());
        for (i, (&x, y)) in x.iter().zip(y.iter_mut()).enumerate() {
            *y = self.descramble(x, i_start + i);
        }
    }
}

fn parity(x: u32) -> u32 {
    x.count_ones() & 1
}

fn calculate_scrambling_sequence(gold_code: u32, length: usize) -> Vec<u8> {
    let mut x: u32 = 0x00001;
    let mut y: u32 = 0x3FFFF;

    for _ in 0..gold_code {
        let xb = parity(x & 0x0081);
        x = (x >> 1) | (xb << 17);
    }

    let mut rn = vec![0u8; length];
    for v in rn.iter_mut() {
        let xa = parity(x & 0x8050);
        let xb = parity(x & 0x0081);
        let xc = x & 1;
        x = (x >> 1) | (xb << 17);

        let ya = parity(y & 0x04A1);
        let yb = parity(y & 0xFF60);
        let yc = y & 1;
        y = (y >> 1) | (ya << 17);

        *v = (((xa ^ yb) << 1) | (xc ^ yc)) as u8;
    }
    rn
}

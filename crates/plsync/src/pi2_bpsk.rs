//! pi/2 BPSK as used by the physical layer header.
//!
//! Even and odd symbols use constellations rotated by 90 degrees relative to each other.
//! ```text
//! even: bit 0 -> (+a,+a)  bit 1 -> (-a,-a)
//! odd:  bit 0 -> (-a,+a)  bit 1 -> (+a,-a)
//! ```
//! where a = 1/sqrt(2). Bits are taken from a 64 bit word starting from the most significant bit.

use dvbs2_core::pl_parameters::SQRT2_2;
use num::complex::Complex32;

/// Rotation that moves the bit 0 point of an even/odd symbol onto the positive real axis.
const DEROTATE: [Complex32; 2] = [
    Complex32::new(SQRT2_2, -SQRT2_2),
    Complex32::new(-SQRT2_2, -SQRT2_2),
];

fn get_bit(code: u64, j: usize) -> u64 {
    (code >> (63 - j)) & 1
}

/// Maps the leading out.len() bits of a codeword to pi/2 BPSK symbols.
pub fn map_bpsk(code: u64, out: &mut [Complex32]) {
    assert!(out.len() <= 64, "Can only map up to 64 bits but got {}", out.len());
    for (j, y) in out.iter_mut().enumerate() {
        let sign = if get_bit(code, j) == 0 { 1.0 } else { -1.0 };
        *y = match j & 1 {
            0 => Complex32::new(SQRT2_2, SQRT2_2),
            _ => Complex32::new(-SQRT2_2, SQRT2_2),
        } * sign;
    }
}

/// Coherent hard decision demapping of up to 64 symbols.
pub fn demap_bpsk(x: &[Complex32]) -> u64 {
    assert!(x.len() <= 64, "Can only demap up to 64 symbols but got {}", x.len());
    x.iter().enumerate().fold(0u64, |code, (j, &v)| {
        let bit = ((v * DEROTATE[j & 1]).re < 0.0) as u64;
        code | (bit << (63 - j))
    })
}

/// Differential hard decision demapping.
///
/// The first symbol is a reference with a known bit value of zero at an odd position.
/// This is the last SOF symbol when demapping the PLSC.
/// The remaining x.len()-1 symbols are demapped.
pub fn demap_bpsk_diff(x: &[Complex32]) -> u64 {
    assert!(x.len() >= 2 && x.len() <= 65, "Differential demapping requires 2 to 65 symbols but got {}", x.len());
    let mut code = 0u64;
    let mut prev_bit = 0u64;
    for (j, pair) in x.windows(2).enumerate() {
        // Consecutive symbols with equal bits are 90 degrees apart with a sign that alternates with parity
        let diff = pair[1].conj() * pair[0];
        let bit = prev_bit ^ ((diff.im < 0.0) as u64) ^ ((j & 1) as u64);
        code |= bit << (63 - j);
        prev_bit = bit;
    }
    code
}

/// Derotates symbols onto the real axis for soft decision decoding.
/// Positive values correspond to bit 0.
pub fn derotate_bpsk(x: &[Complex32], y: &mut [f32]) {
    assert!(x.len() == y.len(), "Input ({}) and output ({}) lengths differ", x.len(), y.len());
    for (j, (&v, y)) in x.iter().zip(y.iter_mut()).enumerate() {
        *y = (v * DEROTATE[j & 1]).re;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvbs2_core::pl_parameters::{SOF_BIG_ENDIAN, SOF_LEN};

    const CODE: u64 = 0xDEAD_BEEF_0123_4567;

    #[test]
    fn coherent_demap_inverts_map() {
        let mut x = [Complex32::default(); 64];
        map_bpsk(CODE, &mut x);
        assert_eq!(demap_bpsk(&x), CODE);
        for v in &x {
            assert!((v.norm() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn last_sof_symbol_is_odd_bit_zero() {
        let mut sof = [Complex32::default(); SOF_LEN];
        map_bpsk(SOF_BIG_ENDIAN, &mut sof);
        let last = sof[SOF_LEN - 1];
        assert!((last - Complex32::new(-SQRT2_2, SQRT2_2)).norm() < 1e-6);
    }

    #[test]
    fn differential_demap_agrees_with_coherent() {
        let mut x = [Complex32::default(); 65];
        x[0] = Complex32::new(-SQRT2_2, SQRT2_2);
        map_bpsk(CODE, &mut x[1..]);
        assert_eq!(demap_bpsk_diff(&x), CODE);
    }

    #[test]
    fn differential_demap_ignores_phase_offset() {
        let mut x = [Complex32::default(); 65];
        x[0] = Complex32::new(-SQRT2_2, SQRT2_2);
        map_bpsk(CODE, &mut x[1..]);
        // Large constant phase offset plus a slow frequency offset
        for (i, v) in x.iter_mut().enumerate() {
            *v *= Complex32::from_polar(1.0, 2.0 + 0.01 * (i as f32));
        }
        assert_eq!(demap_bpsk_diff(&x), CODE);
        assert_ne!(demap_bpsk(&x[1..]), CODE);
    }

    #[test]
    fn derotated_signs_follow_bits() {
        let mut x = [Complex32::default(); 64];
        let mut y = [0.0f32; 64];
        map_bpsk(CODE, &mut x);
        derotate_bpsk(&x, &mut y);
        for (j, &v) in y.iter().enumerate() {
            let bit = get_bit(CODE, j);
            assert!((v - (1.0 - 2.0 * bit as f32)).abs() < 1e-6, "j={} v={}", j, v);
        }
    }
}

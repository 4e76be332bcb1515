use num::complex::Complex32;
use serde::{Serialize, Deserialize};

/// Encoding of interleaved IQ samples in a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 32bit little endian floats.
    F32,
    /// Offset binary bytes as produced by rtl-sdr dongles.
    U8,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::F32 => 8,
            SampleFormat::U8 => 2,
        }
    }

    /// Converts as many whole samples as fit in both buffers and returns the number of samples written.
    /// Trailing bytes of an incomplete sample are left for the caller.
    pub fn decode(&self, bytes: &[u8], out: &mut [Complex32]) -> usize {
        let total_samples = (bytes.len() / self.bytes_per_sample()).min(out.len());
        let bytes = &bytes[..total_samples*self.bytes_per_sample()];
        match self {
            SampleFormat::F32 => {
                bytes.chunks_exact(8).zip(out.iter_mut()).for_each(|(x, y)| {
                    y.re = f32::from_le_bytes([x[0], x[1], x[2], x[3]]);
                    y.im = f32::from_le_bytes([x[4], x[5], x[6], x[7]]);
                });
            },
            SampleFormat::U8 => {
                // NOTE: Scaled down so full scale maps to roughly unit amplitude
                let dc_offset = 128.0;
                let scale = 1.0 / 128.0;
                bytes.chunks_exact(2).zip(out.iter_mut()).for_each(|(x, y)| {
                    y.re = (x[0] as f32 - dc_offset) * scale;
                    y.im = (x[1] as f32 - dc_offset) * scale;
                });
            },
        }
        total_samples
    }
}

/// Appends symbols as interleaved 32bit little endian floats.
pub fn encode_f32(symbols: &[Complex32], bytes: &mut Vec<u8>) {
    bytes.reserve(symbols.len()*8);
    for x in symbols {
        bytes.extend_from_slice(&x.re.to_le_bytes());
        bytes.extend_from_slice(&x.im.to_le_bytes());
    }
}

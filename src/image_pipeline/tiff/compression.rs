//! Per-tile predictor and compression.

use std::io::Write;

use flate2::write::ZlibEncoder;
use weezl::BitOrder;
use weezl::encode::Encoder as LzwEncoder;

use crate::image_pipeline::common::error::{ConversionError, Result};
use crate::image_pipeline::tiff::types::TiffCompression;

/// Applies TIFF horizontal differencing in place.
///
/// `row_len` is in bytes, `samples_per_pixel` counts interleaved samples and
/// `sample_bytes` is 1, 2 or 4. Samples are little-endian.
pub(crate) fn apply_horizontal_predictor(
    tile: &mut [u8],
    row_len: usize,
    samples_per_pixel: usize,
    sample_bytes: usize,
) {
    let stride = samples_per_pixel * sample_bytes;
    for row in tile.chunks_exact_mut(row_len) {
        match sample_bytes {
            1 => {
                for i in (stride..row.len()).rev() {
                    row[i] = row[i].wrapping_sub(row[i - stride]);
                }
            }
            2 => {
                for i in (stride..row.len()).step_by(2).rev() {
                    let current = u16::from_le_bytes([row[i], row[i + 1]]);
                    let left = u16::from_le_bytes([row[i - stride], row[i - stride + 1]]);
                    row[i..i + 2].copy_from_slice(&current.wrapping_sub(left).to_le_bytes());
                }
            }
            4 => {
                for i in (stride..row.len()).step_by(4).rev() {
                    let current = u32::from_le_bytes([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                    let j = i - stride;
                    let left = u32::from_le_bytes([row[j], row[j + 1], row[j + 2], row[j + 3]]);
                    row[i..i + 4].copy_from_slice(&current.wrapping_sub(left).to_le_bytes());
                }
            }
            _ => {}
        }
    }
}

pub(crate) fn compress(compression: TiffCompression, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        TiffCompression::None => Ok(data.to_vec()),
        TiffCompression::Lzw => LzwEncoder::with_tiff_size_switch(BitOrder::Msb, 8)
            .encode(data)
            .map_err(|e| ConversionError::WriteFailure(format!("LZW encoding failed: {e}"))),
        TiffCompression::Deflate => {
            let deflate_error = |e: std::io::Error| {
                ConversionError::WriteFailure(format!("Deflate encoding failed: {e}"))
            };
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).map_err(deflate_error)?;
            encoder.finish().map_err(deflate_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    #[test]
    fn test_lzw_output_decodes_with_tiff_settings() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i / 7) as u8).collect();
        let packed = compress(TiffCompression::Lzw, &data).unwrap();
        let unpacked = weezl::decode::Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
            .decode(&packed)
            .unwrap();
        assert_eq!(unpacked, data);
        assert!(packed.len() < data.len());
    }

    #[test]
    fn test_deflate_is_zlib_stream() {
        let data = vec![42u8; 1000];
        let packed = compress(TiffCompression::Deflate, &data).unwrap();
        let mut unpacked = Vec::new();
        ZlibDecoder::new(packed.as_slice())
            .read_to_end(&mut unpacked)
            .unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn test_predictor_8bit_rgb() {
        let mut row = vec![10, 20, 30, 11, 22, 33, 12, 24, 36];
        apply_horizontal_predictor(&mut row, 9, 3, 1);
        assert_eq!(row, vec![10, 20, 30, 1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_predictor_16bit_wraps() {
        let mut row = Vec::new();
        for v in [5u16, 3, 65535] {
            row.extend_from_slice(&v.to_le_bytes());
        }
        apply_horizontal_predictor(&mut row, 6, 1, 2);
        let diffs: Vec<u16> = row
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(diffs, vec![5, 3u16.wrapping_sub(5), 65535 - 3]);
    }
}

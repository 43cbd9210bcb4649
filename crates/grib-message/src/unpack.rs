//! Data unpacking.
//!
//! Simple packing only: value = (R + packed * 2^E) * 10^(-D), with an
//! optional bitmap masking absent points.

use grib_common::{GribError, GribResult};

/// Unpack simple-packed data values.
///
/// Bitmap bits are MSB-first, one per data point; masked points come
/// back as NaN. `bits_per_value == 0` means a constant field at the
/// reference value.
pub fn unpack_simple(
    packed_data: &[u8],
    num_points: usize,
    bits_per_value: u8,
    reference_value: f64,
    binary_scale_factor: i32,
    decimal_scale_factor: i32,
    bitmap: Option<&[u8]>,
) -> GribResult<Vec<f64>> {
    let decimal_scale = 10f64.powi(-decimal_scale_factor);

    if bits_per_value == 0 {
        return Ok(vec![reference_value * decimal_scale; num_points]);
    }
    if bits_per_value > 32 {
        return Err(GribError::Malformed(format!(
            "unsupported bits per value: {}",
            bits_per_value
        )));
    }

    let binary_scale = 2f64.powi(binary_scale_factor);
    let bits_per_value = bits_per_value as usize;

    let mut values = Vec::with_capacity(num_points);
    let mut bit_position = 0usize;

    for i in 0..num_points {
        let present = match bitmap {
            Some(bm) => {
                let byte_idx = i / 8;
                let bit_idx = 7 - (i % 8);
                byte_idx < bm.len() && (bm[byte_idx] >> bit_idx) & 1 == 1
            }
            None => true,
        };

        if !present {
            values.push(f64::NAN);
            continue;
        }

        let packed = extract_bits(packed_data, bit_position, bits_per_value)?;
        bit_position += bits_per_value;

        values.push((reference_value + packed as f64 * binary_scale) * decimal_scale);
    }

    Ok(values)
}

/// Extract `num_bits` MSB-first bits starting at `start_bit`.
fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> GribResult<u32> {
    let mut result = 0u32;

    for i in 0..num_bits {
        let absolute_bit = start_bit + i;
        let byte_idx = absolute_bit / 8;
        let bit_idx = 7 - (absolute_bit % 8);

        if byte_idx >= data.len() {
            return Err(GribError::Malformed(
                "packed data shorter than declared point count".to_string(),
            ));
        }

        let bit = (data[byte_idx] >> bit_idx) & 1;
        result = (result << 1) | bit as u32;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bits() {
        let data = vec![0b10110101];

        assert_eq!(extract_bits(&data, 0, 2).unwrap(), 0b10);
        assert_eq!(extract_bits(&data, 2, 2).unwrap(), 0b11);
        assert_eq!(extract_bits(&data, 0, 8).unwrap(), 0b10110101);
    }

    #[test]
    fn test_extract_bits_past_end() {
        let data = vec![0xFF];
        assert!(extract_bits(&data, 4, 8).is_err());
    }

    #[test]
    fn test_unpack_8bit_values() {
        let packed = vec![100, 200];
        let values = unpack_simple(&packed, 2, 8, 0.0, 0, 0, None).unwrap();

        assert_eq!(values.len(), 2);
        assert!((values[0] - 100.0).abs() < 1e-9);
        assert!((values[1] - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_field() {
        let values = unpack_simple(&[], 5, 0, 273.15, 0, 0, None).unwrap();
        assert_eq!(values.len(), 5);
        assert!(values.iter().all(|v| (*v - 273.15).abs() < 1e-9));
    }

    #[test]
    fn test_decimal_scale_applies() {
        // D = 1 divides by 10.
        let packed = vec![50];
        let values = unpack_simple(&packed, 1, 8, 0.0, 0, 1, None).unwrap();
        assert!((values[0] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_bitmap_masks_points() {
        // 3 points, middle one masked out: bitmap bits 101.
        let packed = vec![10, 30];
        let bitmap = vec![0b10100000];
        let values = unpack_simple(&packed, 3, 8, 0.0, 0, 0, Some(&bitmap)).unwrap();

        assert!((values[0] - 10.0).abs() < 1e-9);
        assert!(values[1].is_nan());
        assert!((values[2] - 30.0).abs() < 1e-9);
    }
}

use crate::error::{QuantizeError, Result};
use crate::float8::{F8E4M3, F8E4M3_MAX};
use crate::ir::TensorData;

use super::QuantType;

/// Parameters and data produced by quantizing one array of real values.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantizedValues {
    /// Lower bound of the range the parameters were derived from, before widening.
    pub rmin: f32,
    /// Upper bound of the range the parameters were derived from, before widening.
    pub rmax: f32,
    pub zero_point: i32,
    pub scale: f32,
    /// Quantized values, stored in the element type of the target quant type.
    pub data: TensorData,
}

/// Extend `[rmin, rmax]` to contain zero and to span at least `min_real_range`, then
/// center it on zero when `symmetric`.
fn effective_range(
    rmin: f32,
    rmax: f32,
    min_real_range: Option<f32>,
    symmetric: bool,
) -> (f32, f32) {
    let rmin = rmin.min(0.0);
    let mut rmax = rmax.max(0.0);

    if let Some(min_real_range) = min_real_range {
        rmax = rmax.max(rmin + min_real_range);
    }

    if symmetric {
        let absmax = rmin.abs().max(rmax.abs());
        return (-absmax, absmax);
    }

    (rmin, rmax)
}

/// Compute `(zero_point, scale)` mapping the real range onto `[qmin, qmax]`.
///
/// A zero-width range yields a scale of `f32::EPSILON` and the neutral zero-point, so
/// dequantization never divides by zero.
pub fn compute_scale_zp(
    rmin: f32,
    rmax: f32,
    qmin: i32,
    qmax: i32,
    symmetric: bool,
    min_real_range: Option<f32>,
) -> Result<(i32, f32)> {
    if qmin > 0 || qmax < 0 {
        return Err(QuantizeError::Validation(format!(
            "qmin and qmax must meet the requirement: qmin <= 0 <= qmax while qmin:{qmin}, qmax:{qmax}"
        )));
    }

    let (rmin, rmax) = effective_range(rmin, rmax, min_real_range, symmetric);

    let dr = rmax as f64 - rmin as f64;
    let dq = qmax as f64 - qmin as f64;
    let scale = dr / dq;

    if scale < f32::MIN_POSITIVE as f64 {
        let zero_point = if symmetric {
            ((qmin + qmax) as f64 / 2.0).round_ties_even() as i32
        } else {
            0
        };
        return Ok((zero_point, f32::EPSILON));
    }

    let zero_point = (qmin as f64 - rmin as f64 / scale)
        .round_ties_even()
        .clamp(qmin as f64, qmax as f64) as i32;

    Ok((zero_point, scale as f32))
}

/// Compute `(zero_point, scale)` for float8 storage: the zero-point is always the zero
/// code and the largest magnitude maps onto the largest finite float8 value.
pub fn compute_scale_zp_float8(rmin: f32, rmax: f32, min_real_range: Option<f32>) -> (i32, f32) {
    let (_, absmax) = effective_range(rmin, rmax, min_real_range, true);
    let scale = absmax / F8E4M3_MAX;

    if scale < f32::MIN_POSITIVE {
        return (0, f32::EPSILON);
    }

    (0, scale)
}

/// Quantize `values` with the given parameters: `round(value / scale) + zero_point`,
/// saturated to `bounds` (the full range of the type when `None`).
///
/// Float8 targets pick the nearest representable float8 code of `value / scale` and
/// require a zero `zero_point`.
pub fn quantize_values(
    qtype: QuantType,
    values: &[f32],
    scale: f32,
    zero_point: i32,
    bounds: Option<(i32, i32)>,
) -> Result<TensorData> {
    if qtype.is_float8() {
        if zero_point != 0 {
            return Err(QuantizeError::UnsupportedType(format!(
                "{qtype} has no zero-point, got {zero_point}"
            )));
        }
        let data = values
            .iter()
            .map(|value| F8E4M3::from_f32(value / scale))
            .collect();
        return Ok(TensorData::Float8E4M3FN(data));
    }

    let (qmin, qmax) = match bounds {
        Some(bounds) => bounds,
        None => qtype.qrange(false, false)?,
    };
    let (low, high) = (qmin as f32, qmax as f32);
    let zero_point = zero_point as f32;
    let codes = values
        .iter()
        .map(|value| ((value / scale).round_ties_even() + zero_point).clamp(low, high));

    let data = match qtype {
        QuantType::QInt8 => TensorData::Int8(codes.map(|code| code as i8).collect()),
        QuantType::QUInt8 => TensorData::Uint8(codes.map(|code| code as u8).collect()),
        QuantType::QInt16 => TensorData::Int16(codes.map(|code| code as i16).collect()),
        QuantType::QUInt16 => TensorData::Uint16(codes.map(|code| code as u16).collect()),
        QuantType::QFloat8E4M3FN => unreachable!("float8 handled above"),
    };

    Ok(data)
}

/// Zero-point values stored in the element type of `qtype`.
pub fn zero_point_data(qtype: QuantType, zero_points: &[i32]) -> TensorData {
    match qtype {
        QuantType::QInt8 => TensorData::Int8(zero_points.iter().map(|zp| *zp as i8).collect()),
        QuantType::QUInt8 => TensorData::Uint8(zero_points.iter().map(|zp| *zp as u8).collect()),
        QuantType::QInt16 => TensorData::Int16(zero_points.iter().map(|zp| *zp as i16).collect()),
        QuantType::QUInt16 => {
            TensorData::Uint16(zero_points.iter().map(|zp| *zp as u16).collect())
        }
        QuantType::QFloat8E4M3FN => TensorData::Float8E4M3FN(
            zero_points
                .iter()
                .map(|zp| F8E4M3::from_f32(*zp as f32))
                .collect(),
        ),
    }
}

/// Inverse mapping: `(code - zero_point) * scale`.
pub fn dequantize_values(data: &TensorData, scale: f32, zero_point: i32) -> Vec<f32> {
    let zero_point = zero_point as f32;
    data.to_f32_vec()
        .into_iter()
        .map(|code| (code - zero_point) * scale)
        .collect()
}

/// Compute quantization parameters for `values` and quantize them.
///
/// The range is `[rmin_override ?? min(values), rmax_override ?? max(values)]`. For
/// integer types `reduce_range` halves the quantized range used both for the parameters
/// and for saturating the data; float8 does not support it.
pub fn quantize_data(
    values: &[f32],
    qtype: QuantType,
    symmetric: bool,
    reduce_range: bool,
    min_real_range: Option<f32>,
    rmin_override: Option<f32>,
    rmax_override: Option<f32>,
) -> Result<QuantizedValues> {
    let rmin = rmin_override.unwrap_or_else(|| {
        values
            .iter()
            .copied()
            .reduce(f32::min)
            .unwrap_or(0.0)
    });
    let rmax = rmax_override.unwrap_or_else(|| {
        values
            .iter()
            .copied()
            .reduce(f32::max)
            .unwrap_or(0.0)
    });

    if qtype.is_float8() {
        if reduce_range {
            return Err(QuantizeError::UnsupportedType(format!(
                "Unsupported option reduce_range=true for {qtype}"
            )));
        }

        let (zero_point, scale) = compute_scale_zp_float8(rmin, rmax, min_real_range);
        let data = quantize_values(qtype, values, scale, zero_point, None)?;

        if let TensorData::Float8E4M3FN(codes) = &data {
            if codes.iter().any(|code| code.is_nan()) {
                return Err(QuantizeError::UnsupportedType(format!(
                    "One of the quantized values is NaN for data in [{rmin}, {rmax}]"
                )));
            }
        }

        return Ok(QuantizedValues {
            rmin,
            rmax,
            zero_point,
            scale,
            data,
        });
    }

    let (qmin, qmax) = qtype.qrange(reduce_range, symmetric)?;
    let (zero_point, scale) = compute_scale_zp(rmin, rmax, qmin, qmax, symmetric, min_real_range)?;
    let data = quantize_values(qtype, values, scale, zero_point, Some((qmin, qmax)))?;

    Ok(QuantizedValues {
        rmin,
        rmax,
        zero_point,
        scale,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() <= f32::EPSILON * expected.abs().max(1.0),
            "{actual} != {expected}"
        );
    }

    #[test]
    fn symmetric_int8() {
        let q = quantize_data(&[1.0, -1.0, 0.5], QuantType::QInt8, true, false, None, None, None)
            .unwrap();

        assert_eq!(q.zero_point, 0);
        assert_close(q.scale, 1.0 / 127.0);
        let TensorData::Int8(codes) = &q.data else {
            panic!("expected int8 data, got {:?}", q.data);
        };
        assert_eq!(codes[..2], [127, -127]);
    }

    #[test]
    fn asymmetric_uint8() {
        let q = quantize_data(&[0.0, 1.0], QuantType::QUInt8, false, false, None, None, None)
            .unwrap();

        assert_eq!(q.zero_point, 0);
        assert_close(q.scale, 1.0 / 255.0);
        assert_eq!(q.data, TensorData::Uint8(vec![0, 255]));
    }

    #[test]
    fn asymmetric_uint8_negative_range() {
        let q = quantize_data(&[-1.0, 3.0], QuantType::QUInt8, false, false, None, None, None)
            .unwrap();

        assert_close(q.scale, 4.0 / 255.0);
        assert_eq!(q.zero_point, 64);
        assert_eq!(q.data, TensorData::Uint8(vec![0, 255]));
    }

    #[rstest]
    #[case(QuantType::QInt8, vec![0.0, 0.0], 0)]
    #[case(QuantType::QInt8, vec![-3.0, -1.0], 0)]
    #[case(QuantType::QUInt8, vec![0.0, 0.0, 0.0], 127)]
    #[case(QuantType::QUInt8, vec![-4.0, -0.5], 127)]
    #[case(QuantType::QInt16, vec![2.0, 7.5], 0)]
    #[case(QuantType::QUInt16, vec![-2.0], 32767)]
    fn symmetric_zero_point_is_neutral(
        #[case] qtype: QuantType,
        #[case] values: Vec<f32>,
        #[case] expected: i32,
    ) {
        let q = quantize_data(&values, qtype, true, false, None, None, None).unwrap();
        assert_eq!(q.zero_point, expected);
        assert!(q.scale > 0.0);
    }

    #[test]
    fn zero_width_range_uses_epsilon_scale() {
        let q = quantize_data(&[0.0; 4], QuantType::QUInt8, false, false, None, None, None)
            .unwrap();

        assert_eq!(q.scale, f32::EPSILON);
        assert_eq!(q.zero_point, 0);
        assert_eq!(q.data, TensorData::Uint8(vec![0; 4]));
    }

    #[test]
    fn reduce_range_halves_scale_and_saturation_bound() {
        let full = quantize_data(&[-1.0, 1.0], QuantType::QInt8, true, false, None, None, None)
            .unwrap();
        let reduced = quantize_data(&[-1.0, 1.0], QuantType::QInt8, true, true, None, None, None)
            .unwrap();

        assert_close(full.scale, 1.0 / 127.0);
        assert_close(reduced.scale, 1.0 / 64.0);
        assert_eq!(reduced.data, TensorData::Int8(vec![-64, 64]));

        // An explicit narrower range forces saturation at the reduced bound.
        let clipped = quantize_data(
            &[-1.0, 1.0],
            QuantType::QUInt8,
            false,
            true,
            None,
            Some(0.0),
            Some(0.5),
        )
        .unwrap();
        assert_eq!(clipped.data, TensorData::Uint8(vec![0, 127]));
    }

    #[test]
    fn range_overrides_and_min_real_range_widen_the_range() {
        let q = quantize_data(
            &[0.0, 0.001],
            QuantType::QUInt8,
            false,
            false,
            Some(0.51),
            None,
            None,
        )
        .unwrap();
        assert_close(q.scale, 0.51 / 255.0);

        let q = quantize_data(&[0.5], QuantType::QUInt8, false, false, None, None, Some(2.55))
            .unwrap();
        assert_close(q.scale, 0.01);
        assert_eq!(q.rmax, 2.55);
    }

    #[test]
    fn dequantized_values_are_within_half_a_step() {
        let values = [-2.7, -1.3, -0.01, 0.0, 0.4, 1.9, 3.3];
        for (qtype, symmetric) in [
            (QuantType::QInt8, true),
            (QuantType::QInt8, false),
            (QuantType::QUInt8, false),
            (QuantType::QInt16, true),
            (QuantType::QUInt16, false),
        ] {
            let q = quantize_data(&values, qtype, symmetric, false, None, None, None).unwrap();
            let restored = dequantize_values(&q.data, q.scale, q.zero_point);

            for (value, restored) in values.iter().zip(restored) {
                assert!(
                    (value - restored).abs() <= q.scale / 2.0 + 1e-6,
                    "{qtype} symmetric={symmetric}: {value} restored as {restored}"
                );
            }
        }
    }

    #[test]
    fn float8_uses_zero_code_and_max_magnitude_scale() {
        let q = quantize_data(
            &[1.0, -2.0, 0.5],
            QuantType::QFloat8E4M3FN,
            true,
            false,
            None,
            None,
            None,
        )
        .unwrap();

        assert_eq!(q.zero_point, 0);
        assert_close(q.scale, 2.0 / 448.0);
        let TensorData::Float8E4M3FN(codes) = &q.data else {
            panic!("expected float8 data, got {:?}", q.data);
        };
        assert_eq!(codes[1].to_f32(), -448.0);
        assert_eq!(codes[0].to_f32(), 224.0);
    }

    #[test]
    fn float8_rejects_reduce_range() {
        let result = quantize_data(
            &[1.0],
            QuantType::QFloat8E4M3FN,
            true,
            true,
            None,
            None,
            None,
        );
        assert!(matches!(result, Err(QuantizeError::UnsupportedType(_))));
    }

    #[test]
    fn explicit_parameters_saturate_to_full_range() {
        let data = quantize_values(QuantType::QInt8, &[10.0, -10.0, 0.26], 0.01, 3, None).unwrap();
        assert_eq!(data, TensorData::Int8(vec![127, -128, 29]));
    }

    #[test]
    fn zero_points_use_storage_type() {
        assert_eq!(
            zero_point_data(QuantType::QUInt16, &[1, 2]),
            TensorData::Uint16(vec![1, 2])
        );
        assert_eq!(
            zero_point_data(QuantType::QFloat8E4M3FN, &[0]),
            TensorData::Float8E4M3FN(vec![F8E4M3::ZERO])
        );
    }
}

//! FLOAT8E4M3FN storage.
//!
//! One sign bit, four exponent bits (bias 7) and three mantissa bits. The format has no
//! infinities: `S.1111.111` is NaN and the largest finite magnitude is 448.
//! Conversion from `f32` rounds to nearest-even and saturates, which is what
//! `QuantizeLinear` does with `saturate=1`.

use core::fmt;

/// Largest finite FLOAT8E4M3FN magnitude.
pub const F8E4M3_MAX: f32 = 448.0;

const NAN_BITS: u8 = 0x7F;
const MAX_BITS: u8 = 0x7E;
const SIGN_MASK: u8 = 0x80;

/// A FLOAT8E4M3FN value stored as its raw byte.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct F8E4M3(u8);

impl F8E4M3 {
    /// Positive zero.
    pub const ZERO: Self = Self(0);

    /// Build a value from its raw bit pattern.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bit pattern.
    pub const fn to_bits(self) -> u8 {
        self.0
    }

    /// True for the two NaN encodings.
    pub const fn is_nan(self) -> bool {
        self.0 & !SIGN_MASK == NAN_BITS
    }

    /// Nearest representable value, saturating to ±448.
    pub fn from_f32(value: f32) -> Self {
        let bits = value.to_bits();
        let sign = ((bits >> 24) as u8) & SIGN_MASK;

        if value.is_nan() {
            return Self(sign | NAN_BITS);
        }

        let abs = value.abs();
        if abs >= F8E4M3_MAX {
            return Self(sign | MAX_BITS);
        }

        let exponent = ((bits >> 23) & 0xFF) as i32 - 127;
        if exponent < -6 {
            // Subnormal: value = m * 2^-9. m == 8 spills into the smallest normal,
            // whose encoding is also 8.
            let mantissa = (abs * 512.0).round_ties_even() as u8;
            return Self(sign | mantissa);
        }

        let fraction = bits & 0x7F_FFFF;
        let mut mantissa = fraction >> 20;
        let remainder = fraction & 0xF_FFFF;
        let half = 0x8_0000;
        if remainder > half || (remainder == half && mantissa & 1 == 1) {
            mantissa += 1;
        }

        let mut biased = (exponent + 7) as u32;
        if mantissa == 8 {
            mantissa = 0;
            biased += 1;
        }

        let code = (biased << 3) | mantissa;
        if code > MAX_BITS as u32 {
            return Self(sign | MAX_BITS);
        }

        Self(sign | code as u8)
    }

    /// Widen to `f32`.
    pub fn to_f32(self) -> f32 {
        if self.is_nan() {
            return f32::NAN;
        }

        let sign = if self.0 & SIGN_MASK != 0 { -1.0 } else { 1.0 };
        let exponent = ((self.0 >> 3) & 0x0F) as i32;
        let mantissa = (self.0 & 0x07) as f32;

        if exponent == 0 {
            return sign * mantissa / 512.0;
        }

        sign * (1.0 + mantissa / 8.0) * 2f32.powi(exponent - 7)
    }
}

impl From<f32> for F8E4M3 {
    fn from(value: f32) -> Self {
        Self::from_f32(value)
    }
}

impl From<F8E4M3> for f32 {
    fn from(value: F8E4M3) -> Self {
        value.to_f32()
    }
}

impl fmt::Debug for F8E4M3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F8E4M3({:#04x} = {})", self.0, self.to_f32())
    }
}

impl fmt::Display for F8E4M3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, 0x00)]
    #[case(1.0, 0x38)]
    #[case(-1.0, 0xB8)]
    #[case(0.5, 0x30)]
    #[case(448.0, 0x7E)]
    #[case(-448.0, 0xFE)]
    #[case(0.001953125, 0x01)]
    #[case(0.015625, 0x08)]
    fn encodes_exact_values(#[case] value: f32, #[case] bits: u8) {
        let encoded = F8E4M3::from_f32(value);
        assert_eq!(encoded.to_bits(), bits);
        assert_eq!(encoded.to_f32(), value);
    }

    #[test]
    fn saturates_out_of_range() {
        assert_eq!(F8E4M3::from_f32(1000.0).to_f32(), 448.0);
        assert_eq!(F8E4M3::from_f32(f32::NEG_INFINITY).to_f32(), -448.0);
    }

    #[test]
    fn rounds_half_to_even() {
        // 1.0625 lies halfway between 1.0 (mantissa 000) and 1.125 (mantissa 001).
        assert_eq!(F8E4M3::from_f32(1.0625).to_f32(), 1.0);
        // 1.1875 lies halfway between 1.125 (001) and 1.25 (010).
        assert_eq!(F8E4M3::from_f32(1.1875).to_f32(), 1.25);
    }

    #[test]
    fn nan_is_preserved() {
        assert!(F8E4M3::from_f32(f32::NAN).is_nan());
        assert!(F8E4M3::from_bits(0xFF).to_f32().is_nan());
    }

    #[test]
    fn every_finite_code_decodes_and_reencodes() {
        for bits in 0u8..=255 {
            let value = F8E4M3::from_bits(bits);
            if value.is_nan() {
                continue;
            }
            let back = F8E4M3::from_f32(value.to_f32());
            // Negative zero collapses onto itself, everything else is a bijection.
            assert_eq!(back.to_f32(), value.to_f32(), "code {bits:#04x}");
        }
    }
}

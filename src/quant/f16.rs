//! IEEE-754 binary16 <-> binary32 conversion.
//!
//! Block scales (`BlockQ40::d`, `BlockQ80::d`) are stored as raw `u16` bit
//! patterns rather than the `half` crate's `f16` type so that `BlockQ40`/
//! `BlockQ80` stay `#[repr(C)]` plain-old-data that can be read straight off
//! the wire; these two functions are the only place the bit pattern gets
//! widened to do arithmetic with it.

use half::f16;

/// Widen a binary16 bit pattern to `f32`, round-to-nearest-even, preserving
/// denormals, NaN payload bits and infinities.
pub fn f16_to_f32(bits: u16) -> f32 {
    f16::from_bits(bits).to_f32()
}

/// Narrow an `f32` to a binary16 bit pattern, round-to-nearest-even,
/// saturating to +-inf on overflow.
pub fn f32_to_f16(value: f32) -> u16 {
    f16::from_f32(value).to_bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_common_values() {
        for v in [0.0_f32, 1.0, -1.0, 0.5, 3.14159, 1e-4, -1e-4] {
            let back = f16_to_f32(f32_to_f16(v));
            assert!((back - v).abs() < 1e-3, "{v} -> {back}");
        }
    }

    #[test]
    fn preserves_zero_sign() {
        assert_eq!(f16_to_f32(f32_to_f16(0.0)).to_bits(), 0.0_f32.to_bits());
        assert_eq!(f16_to_f32(f32_to_f16(-0.0)).to_bits(), (-0.0_f32).to_bits());
    }

    #[test]
    fn saturates_on_overflow() {
        assert_eq!(f16_to_f32(f32_to_f16(1e30)), f32::INFINITY);
        assert_eq!(f16_to_f32(f32_to_f16(-1e30)), f32::NEG_INFINITY);
    }

    #[test]
    fn preserves_nan() {
        assert!(f16_to_f32(f32_to_f16(f32::NAN)).is_nan());
    }

    #[test]
    fn preserves_denormals() {
        let tiny = 2.0_f32.powi(-20);
        let back = f16_to_f32(f32_to_f16(tiny));
        assert!(back > 0.0 && back < 2.0_f32.powi(-13));
    }
}

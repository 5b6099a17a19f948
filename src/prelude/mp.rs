//! The multi-precision interface.
//!
//! The core queries `DIGITS` for LONG-sizety primitive modes (it decides
//! print widths and the width enquiries) and delegates their arithmetic
//! here. This build satisfies the interface with fixed-width stand-ins, a
//! double-width integer and a machine real, so the signatures and rounding
//! conventions hold without an external engine behind them. A storage SIZE
//! query is not carried: the typed-slot value model keeps every value in
//! one slot, see DESIGN.md.

use crate::mode::{ModeId, ModeShape, ModeTable, Primitive};

/// Decimal digits a value of this mode is guaranteed to carry.
pub fn digits(modes: &ModeTable, mode: ModeId) -> u32 {
    match modes.shape(mode) {
        ModeShape::Standard { prim, sizety } => match (prim, *sizety) {
            (Primitive::Int, 0) => 9,
            (Primitive::Int, _) => 18,
            (Primitive::Real, _) => 15,
            (Primitive::Bits, 0) => 32,
            (Primitive::Bits, _) => 64,
            _ => 0,
        },
        _ => 0,
    }
}

/// Delegated LONG INT arithmetic; `None` signals overflow.
pub fn long_add(a: i64, b: i64) -> Option<i64> {
    a.checked_add(b)
}

pub fn long_sub(a: i64, b: i64) -> Option<i64> {
    a.checked_sub(b)
}

pub fn long_mul(a: i64, b: i64) -> Option<i64> {
    a.checked_mul(b)
}

pub fn long_over(a: i64, b: i64) -> Option<i64> {
    if b == 0 { None } else { a.checked_div(b) }
}

pub fn long_mod(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    // Algol 68 MOD is never negative.
    let remainder = a.checked_rem(b)?;
    Some(if remainder < 0 {
        remainder + b.abs()
    } else {
        remainder
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_reflect_the_sizety() {
        let modes = ModeTable::new();
        assert_eq!(digits(&modes, modes.int_mode), 9);
        assert_eq!(digits(&modes, modes.long_int_mode), 18);
        assert_eq!(digits(&modes, modes.bits_mode), 32);
        assert_eq!(digits(&modes, modes.string_mode), 0);
    }

    #[test]
    fn long_mod_is_never_negative() {
        assert_eq!(long_mod(-7, 3), Some(2));
        assert_eq!(long_mod(7, -3), Some(1));
        assert_eq!(long_mod(7, 0), None);
    }

    #[test]
    fn overflow_is_signalled_not_wrapped() {
        assert_eq!(long_add(i64::MAX, 1), None);
        assert_eq!(long_mul(i64::MAX / 2, 3), None);
    }
}

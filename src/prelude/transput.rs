//! Unformatted transput: conversions between values and their text.
//!
//! The default print format for a whole number is sign plus digits, right
//! justified in a field of `INT_WIDTH + 1` characters. Reals print in the
//! shortest exponent form that converts back to the same value, which is
//! what the round-trip laws need.

use crate::genie::Value;
use crate::mode::{ModeId, ModeShape, ModeTable, Primitive};

use super::mp;

/// Decimal digits of the widest INT value.
pub const INT_WIDTH: usize = 10;
/// Significant decimal digits of a REAL.
pub const REAL_WIDTH: usize = 15;

/// Field width of a LONG whole number: the multi-precision layer's digit
/// count, one more for the widest value, one more for the sign.
pub fn long_width(modes: &ModeTable, mode: ModeId) -> usize {
    mp::digits(modes, mode) as usize + 2
}

/// Parse the text of a denotation (or a printed value) into a value of the
/// given mode. `None` when the text cannot be represented.
pub fn string_to_value(modes: &ModeTable, mode: ModeId, text: &str) -> Option<Value> {
    let text = text.trim();
    match modes.shape(mode) {
        ModeShape::Standard { prim, sizety } => {
            let unsigned = text.strip_prefix('+').unwrap_or(text);
            match (prim, *sizety) {
                (Primitive::Int, 0) => unsigned.parse::<i32>().ok().map(Value::Int),
                (Primitive::Int, _) => unsigned.parse::<i64>().ok().map(Value::LongInt),
                (Primitive::Real, _) => unsigned.parse::<f64>().ok().map(Value::Real),
                (Primitive::Bool, _) => match text {
                    "TRUE" | "T" => Some(Value::Bool(true)),
                    "FALSE" | "F" => Some(Value::Bool(false)),
                    _ => None,
                },
                (Primitive::Char, _) => {
                    let mut chars = text.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Some(Value::Char(c)),
                        _ => None,
                    }
                }
                (Primitive::Bits, 0) => parse_bits(text).map(|b| Value::Bits(b as u32)),
                (Primitive::Bits, _) => parse_bits(text).map(Value::LongBits),
                _ => None,
            }
        }
        _ => None,
    }
}

fn parse_bits(text: &str) -> Option<u64> {
    match text.split_once('r') {
        Some((radix, digits)) => {
            let radix: u32 = radix.parse().ok()?;
            if !(2..=16).contains(&radix) {
                return None;
            }
            u64::from_str_radix(digits, radix).ok()
        }
        None => text.parse().ok(),
    }
}

/// Render a value of the given mode the way `print` does.
pub fn value_to_string(modes: &ModeTable, mode: ModeId, value: &Value) -> String {
    match value {
        Value::Int(i) => whole(*i as i64, INT_WIDTH + 1),
        Value::LongInt(i) => whole(*i, long_width(modes, modes.long_int_mode)),
        Value::Real(r) => real_text(*r),
        Value::Bool(b) => if *b { "T" } else { "F" }.to_string(),
        Value::Char(c) => c.to_string(),
        Value::Bits(b) => format!("2r{b:b}"),
        Value::LongBits(b) => format!("2r{b:b}"),
        Value::Bytes(text) => text.to_string(),
        Value::Struct(fields) if modes.is_complex(mode).is_some() => {
            let re = fields.first().cloned().unwrap_or(Value::Uninit);
            let im = fields.get(1).cloned().unwrap_or(Value::Uninit);
            format!(
                "{}{}",
                value_to_string(modes, modes.real_mode, &re),
                value_to_string(modes, modes.real_mode, &im)
            )
        }
        Value::United { tag, value } => value_to_string(modes, *tag, value),
        Value::Empty => "EMPTY".to_string(),
        _ => String::new(),
    }
}

/// Sign and digits, right justified in `width` characters.
pub fn whole(value: i64, width: usize) -> String {
    format!("{:>width$}", format!("{value:+}"))
}

/// Shortest exponent form that parses back to the same REAL.
fn real_text(value: f64) -> String {
    if value.is_nan() {
        return "NAN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "+INF" } else { "-INF" }.to_string();
    }
    format!("{value:+e}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn whole_matches_the_default_print_format() {
        assert_eq!(whole(3, INT_WIDTH + 1), "         +3");
        assert_eq!(whole(-42, INT_WIDTH + 1), "        -42");
        // A value wider than the field keeps all its digits.
        assert_eq!(whole(12345678901, 5), "+12345678901");
    }

    #[rstest]
    #[case(Value::Int(0))]
    #[case(Value::Int(42))]
    #[case(Value::Int(-2147483648))]
    #[case(Value::Int(2147483647))]
    fn int_round_trips(#[case] value: Value) {
        let modes = ModeTable::new();
        let text = value_to_string(&modes, modes.int_mode, &value);
        assert_eq!(string_to_value(&modes, modes.int_mode, &text), Some(value));
    }

    #[rstest]
    #[case(Value::Real(0.0))]
    #[case(Value::Real(2.9289682539682538))]
    #[case(Value::Real(-1.0e-300))]
    #[case(Value::Real(f64::MAX))]
    fn real_round_trips(#[case] value: Value) {
        let modes = ModeTable::new();
        let text = value_to_string(&modes, modes.real_mode, &value);
        assert_eq!(string_to_value(&modes, modes.real_mode, &text), Some(value));
    }

    #[rstest]
    #[case(Value::Bool(true))]
    #[case(Value::Bool(false))]
    #[case(Value::Char('q'))]
    #[case(Value::Bits(0b1010))]
    #[case(Value::LongInt(-9223372036854775808))]
    fn other_primitives_round_trip(#[case] value: Value) {
        let modes = ModeTable::new();
        let mode = match value {
            Value::Bool(_) => modes.bool_mode,
            Value::Char(_) => modes.char_mode,
            Value::Bits(_) => modes.bits_mode,
            Value::LongInt(_) => modes.long_int_mode,
            _ => unreachable!(),
        };
        let text = value_to_string(&modes, mode, &value);
        assert_eq!(string_to_value(&modes, mode, &text), Some(value));
    }

    #[test]
    fn long_real_shares_the_real_representation() {
        let modes = ModeTable::new();
        let value = Value::Real(1.5e-7);
        let text = value_to_string(&modes, modes.long_real_mode, &value);
        assert_eq!(
            string_to_value(&modes, modes.long_real_mode, &text),
            Some(value)
        );
    }

    #[test]
    fn overflowing_denotations_are_rejected() {
        let modes = ModeTable::new();
        assert!(string_to_value(&modes, modes.int_mode, "99999999999").is_none());
        assert!(string_to_value(&modes, modes.long_int_mode, "99999999999").is_some());
    }

    #[test]
    fn bits_denotations_parse_in_any_radix() {
        let modes = ModeTable::new();
        assert_eq!(
            string_to_value(&modes, modes.bits_mode, "2r1010"),
            Some(Value::Bits(10))
        );
        assert_eq!(
            string_to_value(&modes, modes.bits_mode, "16rff"),
            Some(Value::Bits(255))
        );
        assert!(string_to_value(&modes, modes.bits_mode, "1r0").is_none());
    }
}

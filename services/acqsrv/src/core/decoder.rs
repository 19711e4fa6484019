//! Register decoding
//!
//! Pure mapping from raw register words to an engineering value. No I/O, no
//! state: the same words and encoding always give the same value.

use serde::{Deserialize, Serialize};

use crate::error::{AcqError, Result};

/// Order of the two 16-bit words that make up a 32-bit value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    /// High word first (ABCD), the default for the supported device family
    #[default]
    #[serde(alias = "abcd", alias = "big")]
    HighFirst,
    /// Low word first (CDAB)
    #[serde(alias = "cdab", alias = "little")]
    LowFirst,
}

impl WordOrder {
    fn combine(self, first: u16, second: u16) -> u32 {
        let (high, low) = match self {
            WordOrder::HighFirst => (first, second),
            WordOrder::LowFirst => (second, first),
        };
        (u32::from(high) << 16) | u32::from(low)
    }
}

/// How a parameter's registers turn into a value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Encoding {
    /// IEEE-754 single precision spread over two registers
    Float32 {
        #[serde(default)]
        word_order: WordOrder,
    },
    /// One register, optionally signed, divided by a fixed divisor
    ScaledInt {
        #[serde(default)]
        signed: bool,
        #[serde(default = "default_divisor")]
        divisor: f64,
    },
    /// Unsigned passthrough of one or two registers (high word first)
    Raw,
}

fn default_divisor() -> f64 {
    10.0
}

impl Encoding {
    /// Register count used when the parameter does not specify one
    pub fn default_width(&self) -> u16 {
        match self {
            Encoding::Float32 { .. } => 2,
            Encoding::ScaledInt { .. } | Encoding::Raw => 1,
        }
    }

    /// Whether `width` registers can carry this encoding
    pub fn accepts_width(&self, width: u16) -> bool {
        match self {
            Encoding::Float32 { .. } => width == 2,
            Encoding::ScaledInt { .. } => width == 1,
            Encoding::Raw => width == 1 || width == 2,
        }
    }

    /// Numeric tag stored alongside persisted values
    pub fn type_tag(&self) -> i64 {
        match self {
            Encoding::Float32 { .. } => 1,
            Encoding::ScaledInt { .. } => 2,
            Encoding::Raw => 3,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Float32 { .. } => "float32",
            Encoding::ScaledInt { .. } => "scaled_int",
            Encoding::Raw => "raw",
        }
    }
}

/// Decode raw register words according to `encoding`
pub fn decode(raw: &[u16], encoding: &Encoding) -> Result<f64> {
    let width = u16::try_from(raw.len()).unwrap_or(u16::MAX);
    if !encoding.accepts_width(width) {
        return Err(AcqError::decode(format!(
            "{} word(s) cannot carry {}",
            raw.len(),
            encoding.name()
        )));
    }

    match *encoding {
        Encoding::Float32 { word_order } => {
            let bits = word_order.combine(raw[0], raw[1]);
            let value = f32::from_bits(bits);
            if !value.is_finite() {
                return Err(AcqError::decode(format!(
                    "float32 bits 0x{:08X} are not a finite number",
                    bits
                )));
            }
            Ok(f64::from(value))
        },
        Encoding::ScaledInt { signed, divisor } => {
            if divisor == 0.0 || !divisor.is_finite() {
                return Err(AcqError::decode(format!("invalid divisor {}", divisor)));
            }
            let raw_value = if signed {
                f64::from(raw[0] as i16)
            } else {
                f64::from(raw[0])
            };
            Ok(raw_value / divisor)
        },
        Encoding::Raw => match raw {
            [single] => Ok(f64::from(*single)),
            [high, low] => Ok(f64::from(WordOrder::HighFirst.combine(*high, *low))),
            _ => unreachable!("width checked above"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float32() -> Encoding {
        Encoding::Float32 {
            word_order: WordOrder::HighFirst,
        }
    }

    #[test]
    fn test_float32_known_value() {
        // 25.5 = 0x41CC0000
        let value = decode(&[0x41CC, 0x0000], &float32()).unwrap();
        assert_eq!(value, 25.5);
    }

    #[test]
    fn test_float32_low_word_first() {
        let encoding = Encoding::Float32 {
            word_order: WordOrder::LowFirst,
        };
        let value = decode(&[0x0000, 0x41CC], &encoding).unwrap();
        assert_eq!(value, 25.5);
    }

    #[test]
    fn test_float32_is_deterministic() {
        let words = [0x4049, 0x0FDB];
        let first = decode(&words, &float32()).unwrap();
        for _ in 0..10 {
            assert_eq!(decode(&words, &float32()).unwrap(), first);
        }
        assert!((first - std::f64::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn test_float32_rejects_nan() {
        let err = decode(&[0x7FC0, 0x0000], &float32()).unwrap_err();
        assert!(matches!(err, AcqError::DecodeError(_)));
    }

    #[test]
    fn test_scaled_int_divides() {
        let encoding = Encoding::ScaledInt {
            signed: false,
            divisor: 10.0,
        };
        assert_eq!(decode(&[250], &encoding).unwrap(), 25.0);
    }

    #[test]
    fn test_scaled_int_signed_negative() {
        let encoding = Encoding::ScaledInt {
            signed: true,
            divisor: 10.0,
        };
        // -12.5 degrees as two's complement
        assert_eq!(decode(&[0xFF83], &encoding).unwrap(), -12.5);

        let unsigned = Encoding::ScaledInt {
            signed: false,
            divisor: 10.0,
        };
        assert_eq!(decode(&[0xFF83], &unsigned).unwrap(), 6541.1);
    }

    #[test]
    fn test_raw_passthrough() {
        assert_eq!(decode(&[1500], &Encoding::Raw).unwrap(), 1500.0);
        assert_eq!(decode(&[0x0001, 0x0000], &Encoding::Raw).unwrap(), 65536.0);
    }

    #[test]
    fn test_width_mismatch_is_decode_error() {
        assert!(decode(&[0x41CC], &float32()).is_err());
        assert!(decode(&[], &Encoding::Raw).is_err());
        assert!(decode(&[1, 2, 3], &Encoding::Raw).is_err());
        let scaled = Encoding::ScaledInt {
            signed: false,
            divisor: 10.0,
        };
        let err = decode(&[1, 2], &scaled).unwrap_err();
        assert_eq!(err.fault_kind(), Some(crate::error::FaultKind::Decode));
    }

    #[test]
    fn test_zero_divisor_is_decode_error() {
        let encoding = Encoding::ScaledInt {
            signed: false,
            divisor: 0.0,
        };
        assert!(decode(&[10], &encoding).is_err());
    }

    #[test]
    fn test_encoding_deserializes_from_config() {
        let encoding: Encoding = serde_json::from_str(r#"{"type":"float32","word_order":"cdab"}"#).unwrap();
        assert_eq!(
            encoding,
            Encoding::Float32 {
                word_order: WordOrder::LowFirst
            }
        );

        let encoding: Encoding = serde_json::from_str(r#"{"type":"scaled_int"}"#).unwrap();
        assert_eq!(
            encoding,
            Encoding::ScaledInt {
                signed: false,
                divisor: 10.0
            }
        );

        let encoding: Encoding = serde_json::from_str(r#"{"type":"raw"}"#).unwrap();
        assert_eq!(encoding, Encoding::Raw);
    }
}

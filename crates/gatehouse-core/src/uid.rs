//! UID normalization.
//!
//! Readers hand over raw UID bytes; the authority matches on a string. How
//! the bytes become that string depends on the issuing credential system,
//! so the mapping is a configurable pure function rather than a fixed rule.
//!
//! ```
//! use gatehouse_core::UidFormat;
//!
//! let raw = [0x04, 0xA1, 0xB2, 0xC3];
//! assert_eq!(UidFormat::Hex.normalize(&raw).unwrap().as_str(), "04A1B2C3");
//! assert_eq!(UidFormat::TakeLast { length: 4 }.normalize(&raw).unwrap().as_str(), "B2C3");
//! ```

use crate::{CredentialId, Error, Result, types::hex_bytes};
use serde::{Deserialize, Serialize};

/// Width the legacy format pads to.
const LEGACY_WIDTH: usize = 8;

/// Strategy that turns raw UID bytes into a [`CredentialId`].
///
/// `Hex` keeps the upper-case hex rendering of the raw bytes as is. Every other
/// variant reads the bytes as a big-endian integer first, so leading zero
/// digits are gone before shaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum UidFormat {
    /// Full hex rendering, unchanged.
    #[default]
    Hex,

    /// Bytes read as a big-endian integer, zero-padded to 8 hex digits.
    LegacyPadded,

    /// Drop the last `chars` characters (e.g. a trailing BCC byte).
    RemoveSuffix { chars: usize },

    /// Keep the first `length` characters.
    Truncate { length: usize },

    /// Keep the last `length` characters.
    TakeLast { length: usize },

    /// Zero-pad on the left or truncate to exactly `length` characters.
    FixedLength { length: usize },
}

impl UidFormat {
    /// Normalize raw UID bytes.
    ///
    /// # Errors
    /// Returns `Error::InvalidUidFormat` when `raw` is empty, and
    /// `Error::InvalidCredential` when the shaped result is not a valid
    /// credential (empty, or too long for the `Hex` format).
    pub fn normalize(&self, raw: &[u8]) -> Result<CredentialId> {
        if raw.is_empty() {
            return Err(Error::InvalidUidFormat("empty UID".to_string()));
        }

        let hex = hex_bytes::encode(raw);
        let significant = match hex.trim_start_matches('0') {
            "" => "0",
            digits => digits,
        };
        let shaped = match *self {
            UidFormat::Hex => return CredentialId::new(&hex),
            UidFormat::LegacyPadded => {
                format!("{significant:0>width$}", width = LEGACY_WIDTH)
            }
            UidFormat::RemoveSuffix { chars } => {
                if significant.len() > chars {
                    significant[..significant.len() - chars].to_string()
                } else {
                    significant.to_string()
                }
            }
            UidFormat::Truncate { length } => significant.chars().take(length).collect(),
            UidFormat::TakeLast { length } => {
                significant[significant.len().saturating_sub(length)..].to_string()
            }
            UidFormat::FixedLength { length } => {
                if significant.len() >= length {
                    significant[..length].to_string()
                } else {
                    format!("{significant:0>length$}")
                }
            }
        };

        CredentialId::new(&shaped)
    }

    /// Check the parameters of the format.
    ///
    /// # Errors
    /// Returns `Error::InvalidUidFormat` for a zero `length`.
    pub fn validate(&self) -> Result<()> {
        match *self {
            UidFormat::Truncate { length }
            | UidFormat::TakeLast { length }
            | UidFormat::FixedLength { length }
                if length == 0 =>
            {
                Err(Error::InvalidUidFormat(format!(
                    "{self:?} must keep at least one character"
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const UID: [u8; 5] = [0x04, 0xA1, 0xB2, 0xC3, 0x58];

    #[rstest]
    #[case(UidFormat::Hex, "04A1B2C358")]
    #[case(UidFormat::LegacyPadded, "4A1B2C358")]
    #[case(UidFormat::RemoveSuffix { chars: 2 }, "4A1B2C3")]
    #[case(UidFormat::Truncate { length: 6 }, "4A1B2C")]
    #[case(UidFormat::TakeLast { length: 4 }, "C358")]
    #[case(UidFormat::FixedLength { length: 12 }, "0004A1B2C358")]
    #[case(UidFormat::FixedLength { length: 8 }, "4A1B2C35")]
    fn test_formats(#[case] format: UidFormat, #[case] expected: &str) {
        assert_eq!(format.normalize(&UID).unwrap().as_str(), expected);
    }

    #[rstest]
    #[case(UidFormat::Truncate { length: 8 }, "4A1B2C3D")]
    #[case(UidFormat::RemoveSuffix { chars: 2 }, "4A1B2C3")]
    #[case(UidFormat::TakeLast { length: 9 }, "4A1B2C3D4")]
    #[case(UidFormat::FixedLength { length: 10 }, "04A1B2C3D4")]
    fn test_leading_zero_digit_dropped_before_shaping(
        #[case] format: UidFormat,
        #[case] expected: &str,
    ) {
        let raw = [0x04, 0xA1, 0xB2, 0xC3, 0xD4];
        assert_eq!(format.normalize(&raw).unwrap().as_str(), expected);
        assert_eq!(UidFormat::Hex.normalize(&raw).unwrap().as_str(), "04A1B2C3D4");
    }

    #[test]
    fn test_all_zero_uid_shapes_to_single_digit() {
        let zero = [0x00, 0x00];
        assert_eq!(UidFormat::Truncate { length: 4 }.normalize(&zero).unwrap().as_str(), "0");
        assert_eq!(UidFormat::RemoveSuffix { chars: 2 }.normalize(&zero).unwrap().as_str(), "0");
        assert_eq!(UidFormat::FixedLength { length: 3 }.normalize(&zero).unwrap().as_str(), "000");
    }

    #[test]
    fn test_legacy_pads_short_uids() {
        let id = UidFormat::LegacyPadded.normalize(&[0x00, 0x12, 0x34]).unwrap();
        assert_eq!(id.as_str(), "00001234");

        let zero = UidFormat::LegacyPadded.normalize(&[0x00]).unwrap();
        assert_eq!(zero.as_str(), "00000000");
    }

    #[test]
    fn test_remove_suffix_keeps_short_values() {
        let id = UidFormat::RemoveSuffix { chars: 4 }.normalize(&[0xAB]).unwrap();
        assert_eq!(id.as_str(), "AB");
    }

    #[test]
    fn test_empty_uid_is_rejected() {
        assert!(matches!(
            UidFormat::Hex.normalize(&[]),
            Err(Error::InvalidUidFormat(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_length() {
        assert!(UidFormat::Truncate { length: 0 }.validate().is_err());
        assert!(UidFormat::Hex.validate().is_ok());
        assert!(UidFormat::RemoveSuffix { chars: 0 }.validate().is_ok());
    }

    #[test]
    fn test_format_from_config_table() {
        let format: UidFormat =
            serde_json::from_str(r#"{"format":"take_last","length":8}"#).unwrap();
        assert_eq!(format, UidFormat::TakeLast { length: 8 });

        let default: UidFormat = serde_json::from_str(r#"{"format":"hex"}"#).unwrap();
        assert_eq!(default, UidFormat::default());
    }
}

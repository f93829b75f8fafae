//! Helpers for parsing and converting gain values expressed in dB.

use serde::de::{Error as DeError, Visitor};
use serde::Deserializer;
use std::fmt;

/// Convert a dB value to linear gain.
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Deserialize a dB gain written either as a number or a `"-10db"` string.
pub fn deserialize_db_gain<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    struct GainVisitor;

    impl<'de> Visitor<'de> for GainVisitor {
        type Value = f32;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number of dB or a string like \"-10db\"")
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: DeError,
        {
            Ok(value as f32)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: DeError,
        {
            Ok(value as f32)
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: DeError,
        {
            Ok(value as f32)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: DeError,
        {
            parse_db_str(value)
                .ok_or_else(|| DeError::custom(format!("invalid gain value \"{}\"", value)))
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: DeError,
        {
            self.visit_str(&value)
        }
    }

    deserializer.deserialize_any(GainVisitor)
}

/// Parse `"-10"`, `"-10db"` or `"-10 dB"` into a dB value.
pub fn parse_db_str(value: &str) -> Option<f32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    let number = lower.strip_suffix("db").unwrap_or(&lower);
    number.trim().parse::<f32>().ok().filter(|db| db.is_finite())
}

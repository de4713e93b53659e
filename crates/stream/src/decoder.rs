//! Payload decoder
//!
//! Wire format: base64 of the ASCII line
//! `<assetId>,<temperature>,<humidity>[,<status>]`. Fields are trimmed;
//! temperature and humidity must parse as finite decimals.

use crate::error::DecodeError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use coldchain_core::{SensorReading, Timestamp};

/// One decoded payload
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    /// Asset the sensor is attached to
    pub asset_id: String,
    /// The reading itself
    pub reading: SensorReading,
    /// Optional device status field
    pub status: Option<String>,
}

/// Decode a base64 payload received at `captured_at`
pub fn decode_payload(encoded: &str, captured_at: Timestamp) -> Result<DecodedPayload, DecodeError> {
    let bytes = STANDARD.decode(encoded.trim())?;
    let line = String::from_utf8(bytes)?;
    parse_line(&line, captured_at)
}

/// Parse an already-decoded payload line
pub fn parse_line(line: &str, captured_at: Timestamp) -> Result<DecodedPayload, DecodeError> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    if fields.len() < 3 {
        return Err(DecodeError::TooFewFields {
            count: fields.len(),
        });
    }

    let temperature = parse_number("temperature", fields[1])?;
    let humidity = parse_number("humidity", fields[2])?;
    let status = fields
        .get(3)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    Ok(DecodedPayload {
        asset_id: fields[0].to_string(),
        reading: SensorReading {
            temperature,
            humidity,
            captured_at,
        },
        status,
    })
}

fn parse_number(field: &'static str, raw: &str) -> Result<f64, DecodeError> {
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(DecodeError::InvalidNumber {
            field,
            value: raw.to_string(),
        }),
    }
}

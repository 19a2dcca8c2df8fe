// src/schema/jwt.rs
//! JWT credential decoder.
//!
//! Splits the compact serialization into its three dot-separated segments,
//! base64url-decodes the header and payload into JSON objects, and keeps
//! the signature segment verbatim. No signature verification happens here;
//! cryptographic processing is delegated to the external helper service.

use crate::error::WalletError;
use crate::models::token::{JwtToken, Token, TokenPayload};
use crate::schema::base64url_decode;
use serde_json::Value;

/// Decodes a compact-serialized JWT into a [`Token`].
///
/// # Errors
/// Returns `Decode` when the input does not have exactly three segments,
/// a segment is not valid base64url, or a decoded segment is not a JSON
/// object.
pub fn decode(schema_name: &str, encoded: &str) -> Result<Token, WalletError> {
    let segments: Vec<&str> = encoded.trim().split('.').collect();
    if segments.len() != 3 {
        return Err(WalletError::Decode(format!(
            "expected three dot-separated JWT segments, found {}",
            segments.len()
        )));
    }

    let header = decode_object(segments[0], "header")?;
    let payload = decode_object(segments[1], "payload")?;

    Ok(Token {
        schema_name: schema_name.to_string(),
        payload: TokenPayload::Jwt(JwtToken {
            header,
            payload,
            signature: segments[2].to_string(),
        }),
    })
}

/// Decodes one base64url segment into a JSON object.
fn decode_object(segment: &str, part: &str) -> Result<Value, WalletError> {
    let bytes = base64url_decode(segment)?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| WalletError::Decode(format!("JWT {} is not valid JSON: {}", part, e)))?;
    if !value.is_object() {
        return Err(WalletError::Decode(format!(
            "JWT {} is not a JSON object",
            part
        )));
    }
    Ok(value)
}

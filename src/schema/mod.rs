// src/schema/mod.rs
//! Token decoder registry.
//!
//! Maps a schema name to a decoding capability. Each binding declares the
//! token kind it produces; callers select a schema explicitly (there is no
//! format sniffing), and a mis-selected schema yields a decode failure that
//! the caller surfaces as an import failure.
//!
//! Decoding is pure and side-effect-free: decoders never mutate global
//! state and never panic on malformed input; they return a typed failure
//! instead.

pub mod jwt;
pub mod mdoc;

use crate::error::WalletError;
use crate::models::token::{Token, TokenKind};
use std::collections::HashMap;

/// A decoding capability: turns an encoded credential into a [`Token`].
///
/// The schema name is passed through so the produced token records which
/// binding decoded it.
pub type Decoder = fn(schema_name: &str, encoded: &str) -> Result<Token, WalletError>;

/// One schema binding in the registry.
#[derive(Clone)]
pub struct Schema {
    /// Registry key, supplied by importers (e.g. inferred from the issuing
    /// domain).
    pub name: String,
    /// Token kind this schema produces.
    pub kind: TokenKind,
    /// The decode capability.
    pub decoder: Decoder,
}

/// Registry of schema bindings, looked up by name.
pub struct SchemaRegistry {
    schemas: HashMap<String, Schema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        SchemaRegistry {
            schemas: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in bindings:
    /// `jwt_corporate_1` (JWT) and `mdl_1` (MDOC).
    pub fn builtin() -> Self {
        let mut registry = SchemaRegistry::new();
        registry.register(Schema {
            name: "jwt_corporate_1".to_string(),
            kind: TokenKind::Jwt,
            decoder: jwt::decode,
        });
        registry.register(Schema {
            name: "mdl_1".to_string(),
            kind: TokenKind::Mdoc,
            decoder: mdoc::decode,
        });
        registry
    }

    /// Adds or replaces a schema binding.
    pub fn register(&mut self, schema: Schema) {
        self.schemas.insert(schema.name.clone(), schema);
    }

    /// Looks up a binding by name.
    pub fn get(&self, schema_name: &str) -> Option<&Schema> {
        self.schemas.get(schema_name)
    }

    /// Decodes an encoded credential with the named schema.
    ///
    /// # Errors
    /// - `Decode` if the schema is unknown or the input does not decode
    ///   under the selected schema.
    pub fn decode(&self, schema_name: &str, encoded: &str) -> Result<Token, WalletError> {
        let schema = self.schemas.get(schema_name).ok_or_else(|| {
            WalletError::Decode(format!("unknown schema: {}", schema_name))
        })?;
        (schema.decoder)(schema_name, encoded)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        SchemaRegistry::builtin()
    }
}

/// Decodes a base64url segment, tolerating both padded and unpadded input.
pub(crate) fn base64url_decode(segment: &str) -> Result<Vec<u8>, WalletError> {
    let unpadded = segment.trim_end_matches('=');
    base64::decode_config(unpadded, base64::URL_SAFE_NO_PAD)
        .map_err(|e| WalletError::Decode(format!("invalid base64url data: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_schema_is_a_decode_failure() {
        let registry = SchemaRegistry::builtin();
        let result = registry.decode("jwt_nonexistent", "a.b.c");
        assert!(matches!(result, Err(WalletError::Decode(_))));
    }

    #[test]
    fn test_builtin_bindings_declare_their_kind() {
        let registry = SchemaRegistry::builtin();
        assert_eq!(registry.get("jwt_corporate_1").unwrap().kind, TokenKind::Jwt);
        assert_eq!(registry.get("mdl_1").unwrap().kind, TokenKind::Mdoc);
    }

    #[test]
    fn test_registry_is_extensible() {
        let mut registry = SchemaRegistry::builtin();
        registry.register(Schema {
            name: "jwt_university_2".to_string(),
            kind: TokenKind::Jwt,
            decoder: jwt::decode,
        });

        let header = base64::encode_config(r#"{"alg":"ES256"}"#, base64::URL_SAFE_NO_PAD);
        let payload = base64::encode_config(r#"{"degree":"BSc"}"#, base64::URL_SAFE_NO_PAD);
        let token = registry
            .decode("jwt_university_2", &format!("{}.{}.sig", header, payload))
            .unwrap();
        assert_eq!(token.schema_name, "jwt_university_2");
    }

    #[test]
    fn test_base64url_accepts_padded_input() {
        let padded = base64::encode_config(b"hi", base64::URL_SAFE);
        assert_eq!(base64url_decode(&padded).unwrap(), b"hi");
    }
}

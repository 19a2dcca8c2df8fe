// src/models/token.rs
//! Decoded credential token representations.
//!
//! A [`Token`] is the immutable decoded form of an imported credential. It
//! is always derivable from the original encoded string through the schema
//! registry and is never mutated after decoding. Two encodings are
//! supported:
//! - **JWT**: header / payload / signature triple
//! - **MDOC**: mobile-document set with namespaced field tables

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Credential encoding family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    /// JSON Web Token encoding.
    #[serde(rename = "JWT")]
    Jwt,
    /// Mobile-document (CBOR document set) encoding.
    #[serde(rename = "MDOC")]
    Mdoc,
}

/// A decoded credential: the schema that produced it plus its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Name of the schema binding that decoded the credential.
    pub schema_name: String,
    /// The decoded payload, tagged by encoding kind.
    #[serde(flatten)]
    pub payload: TokenPayload,
}

/// Encoding-specific token payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum TokenPayload {
    /// Decoded JWT parts.
    #[serde(rename = "JWT")]
    Jwt(JwtToken),
    /// Decoded mobile-document set.
    #[serde(rename = "MDOC")]
    Mdoc(DocumentSet),
}

impl Token {
    /// The encoding family of this token.
    pub fn kind(&self) -> TokenKind {
        match self.payload {
            TokenPayload::Jwt(_) => TokenKind::Jwt,
            TokenPayload::Mdoc(_) => TokenKind::Mdoc,
        }
    }

    /// Looks up a named field exposed by the token.
    ///
    /// For JWTs this is a claim in the payload object; for MDOCs it is a
    /// lookup in the flattened field table across all documents and
    /// namespaces. Returns `None` when the token does not expose the field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match &self.payload {
            TokenPayload::Jwt(jwt) => jwt.payload.get(name),
            TokenPayload::Mdoc(documents) => documents.fields().get(name).copied(),
        }
    }
}

/// Decoded JSON Web Token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwtToken {
    /// Decoded JOSE header object.
    pub header: Value,
    /// Decoded claims object.
    pub payload: Value,
    /// Signature segment, kept verbatim (it is an opaque cryptographic
    /// string and is not decoded here).
    pub signature: String,
}

/// A mobile-document credential: one or more documents, each carrying
/// namespaced field tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSet {
    /// The documents contained in the credential.
    pub documents: Vec<MdocDocument>,
}

/// One document inside a mobile-document set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MdocDocument {
    /// Document type identifier (e.g. `org.iso.18013.5.1.mDL`).
    pub doc_type: String,
    /// Field tables keyed by namespace, then by field name.
    pub name_spaces: BTreeMap<String, BTreeMap<String, Value>>,
}

impl DocumentSet {
    /// Flattens every namespace of every document into one field table.
    ///
    /// Later documents/namespaces do not shadow earlier ones: the first
    /// occurrence of a field name wins.
    pub fn fields(&self) -> BTreeMap<&str, &Value> {
        let mut table: BTreeMap<&str, &Value> = BTreeMap::new();
        for document in &self.documents {
            for namespace in document.name_spaces.values() {
                for (name, value) in namespace {
                    table.entry(name.as_str()).or_insert(value);
                }
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_jwt_token() -> Token {
        Token {
            schema_name: "jwt_corporate_1".to_string(),
            payload: TokenPayload::Jwt(JwtToken {
                header: json!({"alg": "RS256"}),
                payload: json!({"email": "user@domain.example", "sub": "user"}),
                signature: "sig".to_string(),
            }),
        }
    }

    fn sample_mdoc_token() -> Token {
        let mut fields = BTreeMap::new();
        fields.insert("family_name".to_string(), json!("Doe"));
        let mut name_spaces = BTreeMap::new();
        name_spaces.insert("org.iso.18013.5.1".to_string(), fields);
        Token {
            schema_name: "mdl_1".to_string(),
            payload: TokenPayload::Mdoc(DocumentSet {
                documents: vec![MdocDocument {
                    doc_type: "org.iso.18013.5.1.mDL".to_string(),
                    name_spaces,
                }],
            }),
        }
    }

    #[test]
    fn test_jwt_field_lookup() {
        let token = sample_jwt_token();
        assert_eq!(token.kind(), TokenKind::Jwt);
        assert_eq!(token.field("email"), Some(&json!("user@domain.example")));
        assert!(token.field("family_name").is_none());
    }

    #[test]
    fn test_mdoc_field_lookup() {
        let token = sample_mdoc_token();
        assert_eq!(token.kind(), TokenKind::Mdoc);
        assert_eq!(token.field("family_name"), Some(&json!("Doe")));
        assert!(token.field("email").is_none());
    }

    #[test]
    fn test_token_serialization_shape() {
        // The wire shape carries kind, schemaName, and payload.
        let value = serde_json::to_value(sample_jwt_token()).unwrap();
        assert_eq!(value["kind"], "JWT");
        assert_eq!(value["schemaName"], "jwt_corporate_1");
        assert_eq!(value["payload"]["signature"], "sig");

        let rebuilt: Token = serde_json::from_value(value).unwrap();
        assert_eq!(rebuilt, sample_jwt_token());
    }
}

// src/schema/mdoc.rs
//! Mobile-document (MDOC) credential decoder.
//!
//! An encoded MDOC is a base64url-wrapped CBOR structure carrying a
//! `documents` array; each document has a `docType` and a `nameSpaces`
//! table of field names to values. The decoder extracts that structure
//! into a [`DocumentSet`], converting CBOR values to JSON so the rest of
//! the core can treat field lookups uniformly across encodings. Issuer
//! signatures inside the document set are not processed here.

use crate::error::WalletError;
use crate::models::token::{DocumentSet, MdocDocument, Token, TokenPayload};
use crate::schema::base64url_decode;
use ciborium::value::Value as Cbor;
use serde_json::Value;
use std::collections::BTreeMap;

/// Decodes a base64url-wrapped CBOR document set into a [`Token`].
///
/// # Errors
/// Returns `Decode` when the input is not base64url, not CBOR, or does not
/// carry the expected document-set structure.
pub fn decode(schema_name: &str, encoded: &str) -> Result<Token, WalletError> {
    let bytes = base64url_decode(encoded.trim())?;
    let root: Cbor = ciborium::from_reader(bytes.as_slice())
        .map_err(|e| WalletError::Decode(format!("MDOC is not valid CBOR: {}", e)))?;

    let entries = match &root {
        Cbor::Map(entries) => entries,
        _ => return Err(WalletError::Decode("MDOC root is not a CBOR map".to_string())),
    };

    let documents = match map_get(entries, "documents") {
        Some(Cbor::Array(documents)) => documents,
        Some(_) => {
            return Err(WalletError::Decode(
                "MDOC \"documents\" is not an array".to_string(),
            ))
        }
        None => {
            return Err(WalletError::Decode(
                "MDOC has no \"documents\" entry".to_string(),
            ))
        }
    };

    let documents = documents
        .iter()
        .map(parse_document)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Token {
        schema_name: schema_name.to_string(),
        payload: TokenPayload::Mdoc(DocumentSet { documents }),
    })
}

/// Parses one entry of the `documents` array.
fn parse_document(document: &Cbor) -> Result<MdocDocument, WalletError> {
    let entries = match document {
        Cbor::Map(entries) => entries,
        _ => return Err(WalletError::Decode("MDOC document is not a map".to_string())),
    };

    let doc_type = match map_get(entries, "docType") {
        Some(Cbor::Text(doc_type)) => doc_type.clone(),
        _ => return Err(WalletError::Decode("MDOC document has no docType".to_string())),
    };

    let mut name_spaces = BTreeMap::new();
    if let Some(Cbor::Map(spaces)) = map_get(entries, "nameSpaces") {
        for (space, fields) in spaces {
            let space = text_key(space)?;
            let fields = match fields {
                Cbor::Map(fields) => fields,
                _ => {
                    return Err(WalletError::Decode(format!(
                        "MDOC namespace {} is not a map",
                        space
                    )))
                }
            };
            let mut table = BTreeMap::new();
            for (name, value) in fields {
                table.insert(text_key(name)?, cbor_to_json(value)?);
            }
            name_spaces.insert(space, table);
        }
    }

    Ok(MdocDocument {
        doc_type,
        name_spaces,
    })
}

/// Looks up a text key in a CBOR map.
fn map_get<'a>(entries: &'a [(Cbor, Cbor)], key: &str) -> Option<&'a Cbor> {
    entries.iter().find_map(|(k, v)| match k {
        Cbor::Text(text) if text == key => Some(v),
        _ => None,
    })
}

fn text_key(key: &Cbor) -> Result<String, WalletError> {
    match key {
        Cbor::Text(text) => Ok(text.clone()),
        _ => Err(WalletError::Decode("MDOC map key is not text".to_string())),
    }
}

/// Converts a CBOR value into JSON for uniform field lookups.
///
/// Byte strings become standard-base64 strings; tags are unwrapped to
/// their inner value.
fn cbor_to_json(value: &Cbor) -> Result<Value, WalletError> {
    match value {
        Cbor::Null => Ok(Value::Null),
        Cbor::Bool(b) => Ok(Value::Bool(*b)),
        Cbor::Text(text) => Ok(Value::String(text.clone())),
        Cbor::Bytes(bytes) => Ok(Value::String(base64::encode(bytes))),
        Cbor::Integer(integer) => {
            let n = i128::from(*integer);
            i64::try_from(n)
                .map(|n| Value::Number(n.into()))
                .map_err(|_| WalletError::Decode(format!("MDOC integer {} out of range", n)))
        }
        Cbor::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| WalletError::Decode("MDOC float is not finite".to_string())),
        Cbor::Array(items) => items
            .iter()
            .map(cbor_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Cbor::Map(entries) => {
            let mut object = serde_json::Map::new();
            for (key, value) in entries {
                object.insert(text_key(key)?, cbor_to_json(value)?);
            }
            Ok(Value::Object(object))
        }
        Cbor::Tag(_, inner) => cbor_to_json(inner),
        _ => Err(WalletError::Decode("unsupported CBOR value in MDOC".to_string())),
    }
}

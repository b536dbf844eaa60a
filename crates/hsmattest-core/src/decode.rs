//! Decoding of module results into [`ParsedAttestation`].
//!
//! The module returns UTF-8 JSON of the form
//!
//! ```text
//! [{"pairs": {"Attribute Name": "value", ...}}, ...]
//! ```
//!
//! Section and attribute order is display order and is preserved exactly.
//! Attribute names must be unique within a section; a repeated name is a
//! shape error rather than a silent overwrite.

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::error::Category;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Error returned when module output is not an attestation.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not syntactically valid JSON (includes truncation and invalid UTF-8).
    #[error("result is not valid JSON: {0}")]
    Syntax(#[source] serde_json::Error),

    /// Valid JSON, but not a list of `{"pairs": {string: string}}` sections.
    #[error("result does not match the attestation shape: {0}")]
    Shape(#[source] serde_json::Error),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        match err.classify() {
            Category::Data => DecodeError::Shape(err),
            Category::Syntax | Category::Eof | Category::Io => DecodeError::Syntax(err),
        }
    }
}

/// One attribute row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// A group of attributes, in module order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(serialize_with = "serialize_pairs")]
    pairs: Vec<Attribute>,
}

impl Section {
    pub fn new(name: Option<String>, pairs: Vec<Attribute>) -> Self {
        Self { name, pairs }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.pairs
    }

    /// Look up an attribute value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Decoded attestation: ordered sections of ordered attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ParsedAttestation {
    sections: Vec<Section>,
}

impl ParsedAttestation {
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Flat `(name, value)` display rows across all sections.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.sections
            .iter()
            .flat_map(|section| section.pairs.iter())
            .map(|attr| (attr.name.as_str(), attr.value.as_str()))
    }

    pub fn attribute_count(&self) -> usize {
        self.sections.iter().map(Section::len).sum()
    }

    /// First value for `name` in section order.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.sections.iter().find_map(|section| section.get(name))
    }
}

/// Interprets module result bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultDecoder;

impl ResultDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<ParsedAttestation, DecodeError> {
        let sections: Vec<WireSection> = serde_json::from_slice(bytes)?;
        Ok(ParsedAttestation {
            sections: sections
                .into_iter()
                .map(|wire| Section {
                    name: wire.name,
                    pairs: wire.pairs.0,
                })
                .collect(),
        })
    }
}

#[derive(Deserialize)]
struct WireSection {
    #[serde(default)]
    name: Option<String>,
    pairs: WirePairs,
}

/// Ordered string map that rejects repeated keys.
struct WirePairs(Vec<Attribute>);

impl<'de> Deserialize<'de> for WirePairs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = WirePairs;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of attribute names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<WirePairs, A::Error> {
                let mut seen = HashSet::new();
                let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, value)) = map.next_entry::<String, String>()? {
                    if !seen.insert(name.clone()) {
                        return Err(de::Error::custom(format_args!(
                            "duplicate attribute '{}'",
                            name
                        )));
                    }
                    pairs.push(Attribute { name, value });
                }
                Ok(WirePairs(pairs))
            }
        }

        deserializer.deserialize_map(PairsVisitor)
    }
}

fn serialize_pairs<S: Serializer>(pairs: &[Attribute], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for attr in pairs {
        map.serialize_entry(&attr.name, &attr.value)?;
    }
    map.end()
}

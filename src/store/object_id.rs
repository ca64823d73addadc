//! Native document identifier.
//!
//! Identifiers are BSON object ids: 12 bytes, rendered on the wire as 24 lowercase hex digits.
//! Both store engines key documents by them, so an id minted in a request task is valid in
//! either without coordination.
//!
//! `bson` serializes an [`ObjectId`] as `{"$oid": ...}` outside its own format. JSON bodies and
//! stored documents use the plain hex string instead, through [`hex_string`].

pub use mongodb::bson::oid::ObjectId;

/// Error returned when a string is not a well-formed identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier: {0:?}")]
pub struct InvalidIdentifier(pub String);

/// Parses the 24-digit hex form.
pub fn parse_object_id(s: &str) -> Result<ObjectId, InvalidIdentifier> {
    ObjectId::parse_str(s).map_err(|_| InvalidIdentifier(s.to_string()))
}

/// Serde adapter for `#[serde(with = "hex_string")]` fields holding an [`ObjectId`].
pub mod hex_string {
    use super::{parse_object_id, ObjectId};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &ObjectId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&id.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ObjectId, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_object_id(&s).map_err(serde::de::Error::custom)
    }
}

//! Core type definitions for AssetVault
//!
//! This module defines the fundamental types used throughout the system:
//! asset identifiers, the semantic asset type, and the immutable asset
//! record itself.

use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an asset (128-bit)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
pub struct AssetId(Uuid);

impl AssetId {
    /// The all-zero id, never a valid asset
    pub const NIL: Self = Self(Uuid::nil());

    /// Generate a new random asset ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Create from the 16 raw id bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Get as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// True for the all-zero id
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// 32 lowercase hex characters, no dashes
    #[must_use]
    pub fn to_simple_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Parse from 32 hex characters (either case) without dashes
    pub fn from_simple_hex(s: &str) -> Result<Self, AssetIdError> {
        if s.len() != 32 {
            return Err(AssetIdError::InvalidLength(s.len()));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| AssetIdError::InvalidHex)?;
        Ok(Self::from_bytes(bytes))
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::NIL
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", self.0)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssetId {
    type Err = AssetIdError;

    /// Accepts both the dashed and the undashed hex forms
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 32 {
            return Self::from_simple_hex(s);
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| AssetIdError::InvalidHex)
    }
}

/// Errors that can occur when parsing an asset id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetIdError {
    #[error("asset id must be 32 hex characters, got {0}")]
    InvalidLength(usize),
    #[error("asset id contains non-hex characters")]
    InvalidHex,
}

/// Semantic kind of an asset (signed byte on the wire)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
pub struct AssetType(i8);

impl AssetType {
    pub const UNKNOWN: Self = Self(-1);
    pub const TEXTURE: Self = Self(0);
    pub const SOUND: Self = Self(1);
    pub const CALLING_CARD: Self = Self(2);
    pub const LANDMARK: Self = Self(3);
    pub const CLOTHING: Self = Self(5);
    pub const OBJECT: Self = Self(6);
    pub const NOTECARD: Self = Self(7);
    pub const LSL_TEXT: Self = Self(10);
    pub const LSL_BYTECODE: Self = Self(11);
    pub const TEXTURE_TGA: Self = Self(12);
    pub const BODYPART: Self = Self(13);
    pub const SOUND_WAV: Self = Self(17);
    pub const IMAGE_TGA: Self = Self(18);
    pub const IMAGE_JPEG: Self = Self(19);
    pub const ANIMATION: Self = Self(20);
    pub const GESTURE: Self = Self(21);
    pub const SIMSTATE: Self = Self(22);

    #[must_use]
    pub const fn new(value: i8) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> i8 {
        self.0
    }
}

impl Default for AssetType {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Debug for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetType({})", self.0)
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable binary object keyed by its id
///
/// Once stored, an id stays bound to this exact content; the store never
/// overwrites an existing id. Records are shared as `Arc<Asset>` and are not
/// mutated after construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub asset_type: AssetType,
    pub local: bool,
    pub temporary: bool,
    /// Creation time, whole seconds
    pub create_time: DateTime<Utc>,
    pub name: String,
    pub description: String,
    pub data: Bytes,
    pub storage_flags: u32,
}

impl Asset {
    /// Create a new asset stamped with the current time
    pub fn new(id: AssetId, asset_type: AssetType, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            asset_type,
            local: false,
            temporary: false,
            create_time: Utc::now().trunc_subsecs(0),
            name: String::new(),
            description: String::new(),
            data: data.into(),
            storage_flags: 0,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    #[must_use]
    pub fn with_temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    /// Override the creation time (truncated to whole seconds)
    #[must_use]
    pub fn with_create_time(mut self, create_time: DateTime<Utc>) -> Self {
        self.create_time = create_time.trunc_subsecs(0);
        self
    }

    #[must_use]
    pub fn with_storage_flags(mut self, storage_flags: u32) -> Self {
        self.storage_flags = storage_flags;
        self
    }

    /// Size of the payload in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_asset_id_simple_hex() {
        let id: AssetId = "d5c70f1f-6063-40c5-8b93-82c5c5a31d6e".parse().unwrap();
        assert_eq!(id.to_simple_hex(), "d5c70f1f606340c58b9382c5c5a31d6e");

        let upper = AssetId::from_simple_hex("D5C70F1F606340C58B9382C5C5A31D6E").unwrap();
        assert_eq!(upper, id);
    }

    #[test]
    fn test_asset_id_parse_errors() {
        assert_eq!(
            AssetId::from_simple_hex("abc"),
            Err(AssetIdError::InvalidLength(3))
        );
        assert_eq!(
            AssetId::from_simple_hex("zz c70f1f606340c58b9382c5c5a31d6"),
            Err(AssetIdError::InvalidHex)
        );
        assert!("not-a-uuid".parse::<AssetId>().is_err());
    }

    #[test]
    fn test_nil_id() {
        assert!(AssetId::NIL.is_nil());
        assert!(AssetId::default().is_nil());
        assert!(!AssetId::new().is_nil());
    }

    #[test]
    fn test_asset_builder() {
        let when = Utc.with_ymd_and_hms(2020, 5, 17, 12, 0, 0).unwrap();
        let asset = Asset::new(AssetId::new(), AssetType::NOTECARD, &b"hello"[..])
            .with_name("note")
            .with_description("a note")
            .with_temporary(true)
            .with_create_time(when)
            .with_storage_flags(0b101);

        assert_eq!(asset.name, "note");
        assert!(asset.temporary);
        assert!(!asset.local);
        assert_eq!(asset.create_time, when);
        assert_eq!(asset.storage_flags, 5);
        assert_eq!(asset.size(), 5);
    }

    #[test]
    fn test_create_time_whole_seconds() {
        let asset = Asset::new(AssetId::new(), AssetType::TEXTURE, Bytes::new());
        assert_eq!(asset.create_time.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_structural_equality_includes_data() {
        let id = AssetId::new();
        let when = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let a = Asset::new(id, AssetType::SOUND, vec![1u8, 2, 3]).with_create_time(when);
        let b = Asset::new(id, AssetType::SOUND, vec![1u8, 2, 3]).with_create_time(when);
        let c = Asset::new(id, AssetType::SOUND, vec![1u8, 2, 4]).with_create_time(when);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

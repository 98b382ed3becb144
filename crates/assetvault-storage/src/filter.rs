//! Asset filters for bulk operations
//!
//! A filter is a conjunction over optional fields. A filter with no field
//! set matches nothing, so an accidentally empty filter never purges the
//! whole store. Lists of filters are OR'd together.

use assetvault_common::{Asset, AssetType, Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;

/// Conjunctive predicate over asset fields
#[derive(Debug, Clone, Default)]
pub struct AssetFilter {
    /// Matched against the 32-character lowercase hex id
    pub id: Option<Regex>,
    pub asset_type: Option<AssetType>,
    pub local: Option<bool>,
    pub temporary: Option<bool>,
    /// Inclusive lower bound on the creation time
    pub created_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the creation time
    pub created_before: Option<DateTime<Utc>>,
    pub name: Option<Regex>,
    pub description: Option<Regex>,
    /// Every bit set here must also be set on the asset
    pub storage_flags: Option<u32>,
}

impl AssetFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match ids against a regular expression
    pub fn with_id_pattern(mut self, pattern: &str) -> Result<Self> {
        self.id = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_type(mut self, asset_type: AssetType) -> Self {
        self.asset_type = Some(asset_type);
        self
    }

    pub fn with_local(mut self, local: bool) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_temporary(mut self, temporary: bool) -> Self {
        self.temporary = Some(temporary);
        self
    }

    /// Restrict to assets created within `[after, before]`; either end may
    /// be open
    pub fn with_created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    pub fn with_name_pattern(mut self, pattern: &str) -> Result<Self> {
        self.name = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_description_pattern(mut self, pattern: &str) -> Result<Self> {
        self.description = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_storage_flags(mut self, flags: u32) -> Self {
        self.storage_flags = Some(flags);
        self
    }

    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.asset_type.is_none()
            && self.local.is_none()
            && self.temporary.is_none()
            && self.created_after.is_none()
            && self.created_before.is_none()
            && self.name.is_none()
            && self.description.is_none()
            && self.storage_flags.is_none()
    }

    /// Check an asset against every set field
    pub fn matches(&self, asset: &Asset) -> bool {
        if self.is_empty() {
            return false;
        }

        if let Some(id) = &self.id
            && !id.is_match(&asset.id.to_simple_hex())
        {
            return false;
        }
        if self.asset_type.is_some_and(|t| t != asset.asset_type) {
            return false;
        }
        if self.local.is_some_and(|l| l != asset.local) {
            return false;
        }
        if self.temporary.is_some_and(|t| t != asset.temporary) {
            return false;
        }
        if self.created_after.is_some_and(|after| asset.create_time < after) {
            return false;
        }
        if self
            .created_before
            .is_some_and(|before| asset.create_time > before)
        {
            return false;
        }
        if let Some(name) = &self.name
            && !name.is_match(&asset.name)
        {
            return false;
        }
        if let Some(description) = &self.description
            && !description.is_match(&asset.description)
        {
            return false;
        }
        if let Some(flags) = self.storage_flags
            && asset.storage_flags & flags != flags
        {
            return false;
        }

        true
    }

    /// OR over a list of filters
    pub fn matches_any(filters: &[AssetFilter], asset: &Asset) -> bool {
        filters.iter().any(|filter| filter.matches(asset))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::invalid_argument(format!("bad filter pattern {pattern:?}: {e}")))
}

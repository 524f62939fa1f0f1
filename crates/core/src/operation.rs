//! A single field-update request against one downstream record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Field name → new value.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// Longest accepted target identifier.
pub const MAX_TARGET_ID_LEN: usize = 255;

/// One atomic field update. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub target_id: String,
    pub fields: FieldMap,
}

impl Operation {
    pub fn new(target_id: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            target_id: target_id.into(),
            fields,
        }
    }

    /// Convenience constructor for a single-field update.
    pub fn single(
        target_id: impl Into<String>,
        field: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        let mut fields = FieldMap::new();
        fields.insert(field.into(), value);
        Self::new(target_id, fields)
    }

    /// Structural validation: non-empty target, non-empty field set, named fields.
    pub fn validate(&self) -> DomainResult<()> {
        let target = self.target_id.trim();
        if target.is_empty() {
            return Err(DomainError::validation("target_id must not be empty"));
        }
        if target.len() > MAX_TARGET_ID_LEN {
            return Err(DomainError::validation(format!(
                "target_id exceeds {MAX_TARGET_ID_LEN} characters"
            )));
        }
        if self.fields.is_empty() {
            return Err(DomainError::validation(format!(
                "operation for '{target}' has no fields"
            )));
        }
        if self.fields.keys().any(|k| k.trim().is_empty()) {
            return Err(DomainError::validation(format!(
                "operation for '{target}' has an empty field name"
            )));
        }
        Ok(())
    }
}

//! Storage settings

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default byte budget of a single archetype chunk (128 KiB).
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 128 * 1024;

/// Default upper bound on rows per chunk.
pub const DEFAULT_MAX_ENTITIES_PER_CHUNK: usize = 1024;

/// Settings that shape how archetypes carve their chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcsSettings {
    /// Byte budget for the component columns of one chunk.
    pub chunk_size_bytes: usize,
    /// Hard cap on rows per chunk, applied after dividing the byte budget.
    pub max_entities_per_chunk: usize,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("setting '{field}' must be greater than zero")]
    Zero { field: &'static str },
}

impl EcsSettings {
    /// Parse settings from JSON. Missing fields fall back to defaults.
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.chunk_size_bytes == 0 {
            return Err(SettingsError::Zero {
                field: "chunk_size_bytes",
            });
        }
        if self.max_entities_per_chunk == 0 {
            return Err(SettingsError::Zero {
                field: "max_entities_per_chunk",
            });
        }
        Ok(())
    }

    /// Rows per chunk for an archetype whose row occupies `row_size` bytes.
    pub fn rows_per_chunk(&self, row_size: usize) -> usize {
        if row_size == 0 {
            return self.max_entities_per_chunk.max(1);
        }
        (self.chunk_size_bytes / row_size)
            .min(self.max_entities_per_chunk)
            .max(1)
    }
}

impl Default for EcsSettings {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            max_entities_per_chunk: DEFAULT_MAX_ENTITIES_PER_CHUNK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let settings = EcsSettings::from_json_str(r#"{ "chunk_size_bytes": 4096 }"#).unwrap();
        assert_eq!(settings.chunk_size_bytes, 4096);
        assert_eq!(settings.max_entities_per_chunk, DEFAULT_MAX_ENTITIES_PER_CHUNK);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let err = EcsSettings::from_json_str(r#"{ "chunk_size_bytes": 0 }"#).unwrap_err();
        assert!(matches!(err, SettingsError::Zero { field: "chunk_size_bytes" }));
    }

    #[test]
    fn rows_per_chunk_respects_budget_and_cap() {
        let settings = EcsSettings::default();
        assert_eq!(settings.rows_per_chunk(24), 1024);
        assert_eq!(settings.rows_per_chunk(1024), 128);
        assert_eq!(settings.rows_per_chunk(0), 1024);
        assert_eq!(settings.rows_per_chunk(DEFAULT_CHUNK_SIZE_BYTES * 2), 1);
    }
}

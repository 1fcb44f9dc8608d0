//! Configuration for saving and loading IRs.
//!
//! Provides a serde-backed configuration with sensible defaults. Tools that
//! embed the crate can keep it alongside their own settings as JSON.

use serde::{Deserialize, Serialize};

/// Knobs for [`crate::save_with`] and [`crate::load_with`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializationConfig {
    /// Fail the load when an AuxData signature has no codec, instead of
    /// keeping the entry as opaque bytes.
    pub strict_aux_data: bool,
    /// Run `Ir::validate` before writing.
    pub validate_on_save: bool,
    /// Refuse streams whose loaded sections overlap. Turning this off reads
    /// back anything a save with `validate_on_save: false` wrote.
    pub validate_on_load: bool,
    /// Maximum nesting depth accepted in a type signature.
    pub max_nesting_depth: usize,
    /// Maximum element count of any AuxData collection or string, applied
    /// when encoding and decoding alike.
    pub max_collection_len: u64,
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            strict_aux_data: false,
            validate_on_save: true,
            validate_on_load: true,
            max_nesting_depth: crate::serialize::signature::DEFAULT_MAX_DEPTH,
            max_collection_len: 1 << 24,
        }
    }
}

impl SerializationConfig {
    /// Configuration that rejects anything it cannot fully decode.
    pub fn strict() -> Self {
        Self {
            strict_aux_data: true,
            ..Self::default()
        }
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SerializationConfig::default();
        assert!(!config.strict_aux_data);
        assert!(config.validate_on_save);
        assert!(config.validate_on_load);
        assert_eq!(config.max_nesting_depth, 32);
        assert!(SerializationConfig::strict().strict_aux_data);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = SerializationConfig {
            max_collection_len: 1024,
            ..SerializationConfig::strict()
        };
        let json = config.to_json_string().unwrap();
        assert_eq!(SerializationConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SerializationConfig::from_json_str(r#"{"strict_aux_data": true}"#).unwrap();
        assert!(config.strict_aux_data);
        assert!(config.validate_on_save);
        assert_eq!(config.max_collection_len, 1 << 24);
    }
}

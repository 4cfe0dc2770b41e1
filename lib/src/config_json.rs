//! The config-json payload delivered by the orchestrator on `deploy`
//! (spec.md §6, Glossary). Unrecognised keys are ignored; a required key
//! missing for the targeted kind is a fatal [`AgentError::ConfigJsonMalformed`].

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::daemon::DaemonKind;
use crate::daemon_spec::DaemonSpec;
use crate::error::AgentError;

/// One named file to materialize, either as a single string or as an
/// array of lines joined with `\n`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FileContent {
    /// A single string, written verbatim.
    Text(String),
    /// An array of lines, joined with `\n` (with a trailing newline).
    Lines(Vec<String>),
}

impl FileContent {
    /// Render to the bytes that should be written to disk.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            FileContent::Text(s) => s.into_bytes(),
            FileContent::Lines(lines) => {
                let mut joined = lines.join("\n");
                joined.push('\n');
                joined.into_bytes()
            }
        }
    }
}

/// The parsed config-json payload. `files` and the kind-specific keys
/// are kept as a raw [`serde_json::Value`] map so unrecognised keys are
/// silently preserved-then-ignored rather than rejected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigJson {
    /// Ceph config text, if any.
    #[serde(default)]
    pub config: Option<String>,
    /// Cephx keyring text, if any.
    #[serde(default)]
    pub keyring: Option<String>,
    /// Named files to materialize under the daemon's data directory.
    #[serde(default)]
    pub files: BTreeMap<String, FileContent>,
    /// Every other (kind-specific) key, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ConfigJson {
    /// Parse a config-json payload from raw JSON text.
    pub fn parse(raw: &str) -> Result<Self, AgentError> {
        serde_json::from_str(raw)
            .map_err(|e| AgentError::usage(format!("config-json is not valid JSON: {e}")))
    }

    /// Validate that every key `spec.required_files()` names is present
    /// either in `files` or as a top-level `config`/`keyring` (those two
    /// are implicit "required files" for kinds that declare them).
    pub fn validate_for(&self, kind: DaemonKind, spec: &dyn DaemonSpec) -> Result<(), AgentError> {
        for required in spec.required_files() {
            let present = match *required {
                "config" => self.config.is_some(),
                "keyring" => self.keyring.is_some(),
                other => self.files.contains_key(other),
            };
            if !present {
                return Err(AgentError::ConfigJsonMalformed {
                    kind: kind.to_string(),
                    key: required.to_string(),
                });
            }
        }
        for required in spec.config_json_files() {
            if !self.files.contains_key(*required) {
                return Err(AgentError::ConfigJsonMalformed {
                    kind: kind.to_string(),
                    key: required.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Look up one of `spec.config_json_args()`'s values as a string,
    /// for splicing into the daemon's argv.
    pub fn arg_value(&self, key: &str) -> Option<String> {
        match self.extra.get(key)? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon_spec::daemon_spec_for;

    #[test]
    fn test_parse_minimal() {
        let c = ConfigJson::parse(r#"{"config": "x", "keyring": "y"}"#).unwrap();
        assert_eq!(c.config.as_deref(), Some("x"));
    }

    #[test]
    fn test_rejects_garbage_json() {
        assert!(ConfigJson::parse("not json").is_err());
    }

    #[test]
    fn test_validate_missing_required_key() {
        let c = ConfigJson::parse(r#"{"config": "x"}"#).unwrap();
        let spec = daemon_spec_for(DaemonKind::Mon);
        let err = c.validate_for(DaemonKind::Mon, spec.as_ref()).unwrap_err();
        assert!(matches!(err, AgentError::ConfigJsonMalformed { .. }));
    }

    #[test]
    fn test_validate_ok_when_present() {
        let c = ConfigJson::parse(r#"{"config": "x", "keyring": "y"}"#).unwrap();
        let spec = daemon_spec_for(DaemonKind::Mon);
        c.validate_for(DaemonKind::Mon, spec.as_ref()).unwrap();
    }

    #[test]
    fn test_unrecognized_keys_ignored() {
        let c = ConfigJson::parse(r#"{"config": "x", "keyring": "y", "bogus": 1}"#).unwrap();
        let spec = daemon_spec_for(DaemonKind::Mon);
        c.validate_for(DaemonKind::Mon, spec.as_ref()).unwrap();
    }

    #[test]
    fn test_file_content_lines_joined() {
        let fc = FileContent::Lines(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(fc.into_bytes(), b"a\nb\n");
    }
}

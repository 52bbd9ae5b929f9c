//! Environment preference and its persisted store.
//!
//! The preference selects which tunnel record the resolver looks for. It is
//! stored client-side under the `preferredEnvironment` key; anything missing
//! or unrecognized reads back as [`EnvironmentPreference::Production`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

/// Storage key for the persisted preference.
pub const PREFERENCE_KEY: &str = "preferredEnvironment";

/// Name of the generic record every environment falls back to.
pub const DEFAULT_TUNNEL_NAME: &str = "cloud";

/// Deployment environment the user wants to reach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentPreference {
    Develop,
    Staging,
    Test,
    #[default]
    Production,
}

impl EnvironmentPreference {
    pub const ALL: [Self; 4] = [Self::Develop, Self::Staging, Self::Test, Self::Production];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Develop => "develop",
            Self::Staging => "staging",
            Self::Test => "test",
            Self::Production => "production",
        }
    }

    /// Tunnel record name this environment maps to.
    #[must_use]
    pub fn tunnel_name(&self) -> &'static str {
        match self {
            Self::Develop => "develop-cloud",
            Self::Staging => "staging-cloud",
            Self::Test => "test-cloud",
            Self::Production => "production-cloud",
        }
    }
}

impl fmt::Display for EnvironmentPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|env| env.as_str() == s)
            .ok_or_else(|| format!("unknown environment '{s}'"))
    }
}

/// Errors raised by a [`PreferenceStore`].
#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    #[error("preference store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("preference store is not valid JSON: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Client-side key/value storage for the preference.
pub trait PreferenceStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), PreferenceError>;
}

/// Read the persisted preference, falling back to `default` on anything unusable.
pub fn load_preference(
    store: &dyn PreferenceStore,
    default: EnvironmentPreference,
) -> EnvironmentPreference {
    match store.get(PREFERENCE_KEY) {
        Ok(Some(raw)) => raw.parse().unwrap_or_else(|e: String| {
            warn!("Environment: ignoring stored preference: {e}");
            default
        }),
        Ok(None) => default,
        Err(e) => {
            warn!("Environment: failed to read preference: {e}");
            default
        }
    }
}

/// Persist a preference.
pub fn save_preference(
    store: &mut dyn PreferenceStore,
    env: EnvironmentPreference,
) -> Result<(), PreferenceError> {
    store.set(PREFERENCE_KEY, env.as_str())
}

/// Preference store backed by a small JSON object on disk.
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_object(&self) -> Result<serde_json::Map<String, Value>, PreferenceError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<Value>(&content)? {
                Value::Object(map) => Ok(map),
                _ => Ok(serde_json::Map::new()),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(serde_json::Map::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self
            .read_object()?
            .get(key)
            .and_then(|v| v.as_str())
            .map(ToString::to_string))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PreferenceError> {
        let mut map = self.read_object()?;
        map.insert(key.to_string(), json!(value));
        let content = serde_json::to_string_pretty(&Value::Object(map))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

/// In-memory store; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Vec<(String, String)>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(key: &str, value: &str) -> Self {
        Self {
            values: vec![(key.to_string(), value.to_string())],
        }
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self
            .values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone()))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.values.retain(|(k, _)| k != key);
        self.values.push((key.to_string(), value.to_string()));
        Ok(())
    }
}

//! Application configuration.
//!
//! Settings are loaded from (in order of precedence):
//! 1. Environment variables prefixed with `RUSTHTF_` (sections separated by
//!    a double underscore, e.g. `RUSTHTF_INSTRUMENT__READ_TIMEOUT_MS=2000`)
//! 2. A TOML configuration file (default: `config/config.toml`)
//!
//! Every field has a default, so the engine starts with no file present.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, HtfError};
use crate::instrument::LinkTimeouts;
use crate::label::GS1_PATTERN;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Top-level application settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub instrument: InstrumentSettings,
    #[serde(default)]
    pub label: LabelSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub archive: ArchiveSettings,
}

/// Observer-facing TCP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address the observer listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

/// Instrument link deadlines.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstrumentSettings {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Scanned-label decoding settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LabelSettings {
    /// Regex with `global_trade_item_number` / `serial_number` (and
    /// optionally `manufacture_date`) capture groups.
    #[serde(default = "default_label_pattern")]
    pub pattern: String,
}

/// Catalog file location.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogSettings {
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

/// Archival sink settings. Archiving is enabled only when both fields are
/// non-empty.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ArchiveSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub access_token: String,
}

impl Settings {
    /// Load from the default file location plus environment overrides.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific TOML file plus environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> AppResult<Self> {
        let settings: Settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUSTHTF_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> AppResult<()> {
        if self.instrument.connect_timeout_ms == 0 || self.instrument.read_timeout_ms == 0 {
            return Err(HtfError::Configuration(
                "instrument timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl InstrumentSettings {
    pub fn timeouts(&self) -> LinkTimeouts {
        LinkTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            read: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            pattern: default_label_pattern(),
        }
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:7070".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    5000
}

fn default_label_pattern() -> String {
    GS1_PATTERN.to_string()
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("config/catalog.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.bind_addr, "0.0.0.0:7070");
        assert_eq!(settings.instrument.connect_timeout_ms, 5000);
        assert_eq!(settings.instrument.read_timeout_ms, 5000);
        assert_eq!(settings.label.pattern, GS1_PATTERN);
        assert_eq!(settings.archive.url, "");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
[server]
bind_addr = "127.0.0.1:9000"

[instrument]
read_timeout_ms = 1500

[archive]
url = "https://records.example.com/api/runs"
access_token = "secret"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(settings.instrument.read_timeout_ms, 1500);
        // Unset sections keep their defaults.
        assert_eq!(settings.instrument.connect_timeout_ms, 5000);
        assert_eq!(settings.archive.access_token, "secret");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[instrument]\nconnect_timeout_ms = 0\n").unwrap();
        assert!(Settings::load_from(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings.instrument.read_timeout_ms, 5000);
    }
}

//! Settings file handling

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use randcall_client_core::CallConfig;

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// JSON file holding the token collections
    pub tokens_file: Option<PathBuf>,
    pub call: CallConfig,
}

impl Settings {
    /// Default location, `<config_dir>/randcall/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("randcall").join("config.toml"))
    }

    /// Load settings from `path`, or from the default location if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
tokens_file = "/tmp/tokens.json"

[call]
app_id = "from-file"
wait_timeout_ms = 20000
remote_render_mode = "hidden"
"#
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();

        assert_eq!(settings.tokens_file, Some(PathBuf::from("/tmp/tokens.json")));
        assert_eq!(settings.call.app_id, "from-file");
        assert_eq!(settings.call.wait_timeout(), Duration::from_secs(20));
        assert_eq!(settings.call.token_collection, "tokens");
        assert_eq!(settings.call.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_rendered_settings_load_back() {
        let settings = Settings {
            tokens_file: None,
            call: CallConfig::new("app").with_local_uid(9),
        };

        let rendered = settings.to_toml().unwrap();
        let parsed: Settings = toml::from_str(&rendered).unwrap();

        assert_eq!(parsed, settings);
    }
}

//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILPRESS_CONFIG` (environment variable)
//! 2. `~/.config/mailpress/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailpress\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Nothing in the library reads configuration globally: each component takes
//! the section it needs in its constructor.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PressError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Where assets are written and how they are addressed.
    pub publish: PublishConfig,
    /// HTML body cleanup.
    pub sanitize: SanitizeConfig,
    /// Link preview fetching.
    pub preview: PreviewConfig,
    /// Image layout decision.
    pub layout: LayoutConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Asset locations. Files land at `<publish_dir>/<static_prefix>/<id>.<ext>`
/// and are served from `<base_uri><static_prefix>/<id>.<ext>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Prefix of every public URI (e.g. `"https://example.org"`). May be empty.
    pub base_uri: String,
    /// Static files path, with a leading slash.
    pub static_prefix: String,
    /// Local directory the site is published into.
    pub publish_dir: PathBuf,
    /// Write image assets while processing a batch.
    pub persist_assets: bool,
    /// Rewrite assets that already exist on disk.
    pub overwrite_assets: bool,
}

/// HTML body cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Visible characters above which a post counts as long-form.
    pub long_post_threshold: usize,
    /// Container tags removed when empty or holding only a `<br>`.
    pub prune_tags: Vec<String>,
}

/// Link preview fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Fetch previews at all. When off, previews hold only their URL.
    pub enabled: bool,
    /// Maximum number of fetches in flight across the whole batch.
    pub max_concurrency: usize,
    /// Per-fetch timeout in seconds (connect + body).
    pub timeout_secs: u64,
    /// Maximum length of a title derived from page content or the URL.
    pub fallback_title_max: usize,
    /// `User-Agent` header sent with every fetch.
    pub user_agent: String,
}

/// Image layout decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// `"gallery"` or `"interleaved"`.
    pub policy: String,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            base_uri: String::new(),
            static_prefix: "/static".to_string(),
            publish_dir: PathBuf::from("published"),
            persist_assets: true,
            overwrite_assets: false,
        }
    }
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            long_post_threshold: 256,
            prune_tags: vec!["div".to_string(), "p".to_string(), "font".to_string()],
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrency: 8,
            timeout_secs: 10,
            fallback_title_max: 30,
            user_agent: concat!("mailpress/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            policy: "interleaved".to_string(),
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match load_config_from(&path) {
                Ok(cfg) => {
                    tracing::info!(path = %path.display(), "Loaded config");
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load config, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Load configuration from an explicit file.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| PressError::io(path, e))?;
    toml::from_str::<Config>(&contents).map_err(|e| PressError::Config(e.to_string()))
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILPRESS_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mailpress").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailpress")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.publish.static_prefix, "/static");
        assert_eq!(cfg.publish.publish_dir, PathBuf::from("published"));
        assert_eq!(cfg.publish.base_uri, "");
        assert_eq!(cfg.sanitize.long_post_threshold, 256);
        assert_eq!(cfg.preview.fallback_title_max, 30);
        assert_eq!(cfg.layout.policy, "interleaved");
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.publish.static_prefix, cfg.publish.static_prefix);
        assert_eq!(parsed.sanitize.prune_tags, cfg.sanitize.prune_tags);
        assert_eq!(parsed.preview.max_concurrency, cfg.preview.max_concurrency);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[publish]
base_uri = "https://blog.example.org"

[preview]
enabled = false
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.publish.base_uri, "https://blog.example.org");
        assert!(!cfg.preview.enabled);
        // Other fields use defaults
        assert_eq!(cfg.publish.static_prefix, "/static");
        assert_eq!(cfg.preview.timeout_secs, 10);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[layout]\npolicy = \"gallery\"\n").unwrap();
        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.layout.policy, "gallery");

        std::fs::write(&path, "[layout\npolicy = ").unwrap();
        assert!(matches!(load_config_from(&path), Err(PressError::Config(_))));
        assert!(matches!(
            load_config_from(&dir.path().join("missing.toml")),
            Err(PressError::Io { .. })
        ));
    }
}

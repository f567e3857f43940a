//! Worker configuration

use crate::error::{QrGenError, QrGenResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use url::{Origin, Url};

/// Google Fonts stylesheet seeded alongside the shell.
pub const FONTS_STYLESHEET: &str = "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700&family=JetBrains+Mono:wght@400;500&display=swap";

/// Offline worker configuration.
///
/// The current cache generation is derived from `cache_prefix` and
/// `version`, so a new deployment only has to bump `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerConfig {
    /// Generation namespace
    pub cache_prefix: String,

    /// Semantic version of the deployed build
    pub version: String,

    /// Origin the worker is registered on
    pub origin: Url,

    /// External origins the worker may intercept and cache for
    pub trusted_origins: Vec<Url>,

    /// Resources seeded at install, relative to `origin` or absolute
    pub manifest: Vec<String>,

    /// Shell document served to failed navigations
    pub shell_path: String,

    /// Body of the synthetic offline response
    pub offline_body: String,

    /// Cacheability rules
    pub classifier: ClassifierConfig,
}

/// Rule lists for the cacheability classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassifierConfig {
    /// Large media extensions that are never cached
    pub reject_extensions: Vec<String>,

    /// Tracking/analytics/ad substrings that are never cached
    pub reject_substrings: Vec<String>,

    /// Static asset extensions that may be cached
    pub accept_extensions: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "qr-generator".to_string(),
            version: "2.0.0".to_string(),
            origin: Url::parse("http://localhost:8080/").expect("static origin is valid"),
            trusted_origins: vec![
                Url::parse("https://fonts.googleapis.com/").expect("static origin is valid"),
                Url::parse("https://api.qrserver.com/").expect("static origin is valid"),
            ],
            manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/styles.css".to_string(),
                "/index.js".to_string(),
                "/manifest.json".to_string(),
                FONTS_STYLESHEET.to_string(),
            ],
            shell_path: "/index.html".to_string(),
            offline_body: "Offline".to_string(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            reject_extensions: owned(&[".mp4", ".mp3", ".avi", ".mov", ".wmv"]),
            reject_substrings: owned(&["analytics", "tracking", "ads"]),
            accept_extensions: owned(&[
                ".css", ".js", ".html", ".png", ".jpg", ".jpeg", ".gif", ".svg",
            ]),
        }
    }
}

impl WorkerConfig {
    /// Create a configuration for the given origin and version.
    pub fn new(origin: Url, version: impl Into<String>) -> Self {
        Self {
            origin,
            version: version.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn load(path: &Path) -> QrGenResult<Self> {
        debug!(path = %path.display(), "Loading worker config");
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the worker cannot run with.
    pub fn validate(&self) -> QrGenResult<()> {
        if self.cache_prefix.trim().is_empty() {
            return Err(QrGenError::config("cachePrefix must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(QrGenError::config("version must not be empty"));
        }
        if self.origin.cannot_be_a_base() || self.origin.host().is_none() {
            return Err(QrGenError::config(format!(
                "origin '{}' is not a hierarchical URL",
                self.origin
            )));
        }
        for origin in &self.trusted_origins {
            if origin.host().is_none() {
                return Err(QrGenError::config(format!(
                    "trusted origin '{origin}' has no host"
                )));
            }
        }
        self.manifest_urls()?;
        self.shell_url()?;
        Ok(())
    }

    /// Name of the current cache generation.
    pub fn cache_name(&self) -> String {
        format!("{}-v{}", self.cache_prefix, self.version)
    }

    /// Resolve a path or absolute URL against the worker origin.
    pub fn resolve(&self, path: &str) -> QrGenResult<Url> {
        self.origin
            .join(path)
            .map_err(|e| QrGenError::invalid_url(path, e))
    }

    /// Manifest entries as absolute URLs, in manifest order.
    pub fn manifest_urls(&self) -> QrGenResult<Vec<Url>> {
        self.manifest.iter().map(|entry| self.resolve(entry)).collect()
    }

    /// Absolute URL of the shell document.
    pub fn shell_url(&self) -> QrGenResult<Url> {
        self.resolve(&self.shell_path)
    }

    /// Whether the URL shares the worker's origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Whether the URL belongs to one of the trusted external origins.
    pub fn is_trusted_origin(&self, url: &Url) -> bool {
        let origin = url.origin();
        self.trusted_origins.iter().any(|t| t.origin() == origin)
    }

    /// Hosts of the trusted origins.
    pub fn trusted_hosts(&self) -> Vec<String> {
        self.trusted_origins
            .iter()
            .filter_map(|u| u.host_str().map(str::to_string))
            .collect()
    }

    /// Origin of the worker itself.
    pub fn own_origin(&self) -> Origin {
        self.origin.origin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_cache_name() {
        let config = WorkerConfig::default();
        assert_eq!(config.cache_name(), "qr-generator-v2.0.0");
    }

    #[test]
    fn test_manifest_resolution() {
        let config = WorkerConfig::default();
        let urls = config.manifest_urls().unwrap();

        assert_eq!(urls.len(), 6);
        assert_eq!(urls[0].as_str(), "http://localhost:8080/");
        assert_eq!(urls[1].as_str(), "http://localhost:8080/index.html");
        assert_eq!(urls[5].host_str(), Some("fonts.googleapis.com"));
    }

    #[test]
    fn test_origin_checks() {
        let config = WorkerConfig::default();

        let own = Url::parse("http://localhost:8080/styles.css").unwrap();
        let fonts = Url::parse("https://fonts.googleapis.com/css2?family=Inter").unwrap();
        let other_port = Url::parse("http://localhost:9090/styles.css").unwrap();
        let foreign = Url::parse("https://cdn.example.com/lib.js").unwrap();

        assert!(config.is_same_origin(&own));
        assert!(config.is_trusted_origin(&fonts));
        assert!(!config.is_same_origin(&other_port));
        assert!(!config.is_trusted_origin(&foreign));
        assert_eq!(
            config.trusted_hosts(),
            vec!["fonts.googleapis.com", "api.qrserver.com"]
        );
    }

    #[test]
    fn test_validate_rejects_empty_version() {
        let mut config = WorkerConfig::default();
        config.version = "  ".to_string();
        assert!(matches!(config.validate(), Err(QrGenError::Config(_))));
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "version": "3.1.0", "origin": "https://qr.example.org/" }}"#
        )
        .unwrap();

        let config = WorkerConfig::load(file.path()).unwrap();
        assert_eq!(config.cache_name(), "qr-generator-v3.1.0");
        assert_eq!(config.offline_body, "Offline");
        assert_eq!(
            config.shell_url().unwrap().as_str(),
            "https://qr.example.org/index.html"
        );
    }

    #[test]
    fn test_load_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            WorkerConfig::load(file.path()),
            Err(QrGenError::Json(_))
        ));
    }
}

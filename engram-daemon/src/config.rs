//! Daemon configuration: built-in defaults, an optional `config.toml`, then
//! environment variables, in that precedence order (spec §4.0c).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resolved daemon configuration. Every field has a safe default; a missing
/// or invalid config file never aborts startup (spec §4.0c) — only
/// `Store::open` failures are fatal, per spec §7 kind 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub project_roots: Vec<PathBuf>,
    #[serde(default = "default_topic_threshold")]
    pub topic_threshold: f32,
    #[serde(default = "default_transcripts_root")]
    pub transcripts_root: PathBuf,
}

fn default_transcripts_root() -> PathBuf {
    dirs_home().join(".claude").join("projects")
}

fn default_topic_threshold() -> f32 {
    engram_core::constants::retrieval::DEFAULT_TOPIC_THRESHOLD
}

impl Default for Config {
    fn default() -> Self {
        Config {
            openai_api_key: None,
            project_roots: Vec::new(),
            topic_threshold: default_topic_threshold(),
            transcripts_root: default_transcripts_root(),
        }
    }
}

impl Config {
    /// Loads defaults, then a `config.toml` in `home` if present, then
    /// environment variables. Parse errors in the file are logged and
    /// ignored, falling back to whatever precedes them.
    #[must_use]
    pub fn load(home: &std::path::Path) -> Self {
        let mut config = Config::default();

        let config_path = home.join("config.toml");
        if let Ok(text) = std::fs::read_to_string(&config_path) {
            match toml::from_str::<Config>(&text) {
                Ok(from_file) => config = from_file,
                Err(e) => tracing::warn!(error = %e, path = %config_path.display(), "ignoring unparseable config.toml"),
            }
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                config.openai_api_key = Some(key);
            }
        }
        if let Ok(roots) = std::env::var("CLAUDE_MEMORY_PROJECT_ROOTS") {
            let parsed: Vec<PathBuf> = roots.split(':').filter(|s| !s.is_empty()).map(PathBuf::from).collect();
            if !parsed.is_empty() {
                config.project_roots = parsed;
            }
        }
        if let Ok(root) = std::env::var("ENGRAM_TRANSCRIPTS_ROOT") {
            if !root.is_empty() {
                config.transcripts_root = PathBuf::from(root);
            }
        }
        if let Ok(threshold) = std::env::var("ENGRAM_TOPIC_THRESHOLD") {
            if let Ok(parsed) = threshold.parse::<f32>() {
                if (0.0..=1.0).contains(&parsed) {
                    config.topic_threshold = parsed;
                } else {
                    tracing::warn!(value = parsed, "ENGRAM_TOPIC_THRESHOLD out of [0,1], ignoring");
                }
            }
        }

        config
    }
}

/// Resolves `~/.claude-memory`, honoring `ENGRAM_HOME` so tests can redirect
/// it to a temp directory.
#[must_use]
pub fn resolve_home() -> PathBuf {
    if let Ok(home) = std::env::var("ENGRAM_HOME") {
        return PathBuf::from(home);
    }
    dirs_home().join(".claude-memory")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_used_when_no_file_present() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path());
        assert_eq!(config.topic_threshold, engram_core::constants::retrieval::DEFAULT_TOPIC_THRESHOLD);
        assert!(config.project_roots.is_empty());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "not = [valid toml").unwrap();
        let config = Config::load(dir.path());
        assert_eq!(config.topic_threshold, engram_core::constants::retrieval::DEFAULT_TOPIC_THRESHOLD);
    }
}

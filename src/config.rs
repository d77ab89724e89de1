use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

pub const API_KEY_NAME: &str = "GEMINI_API_KEY";
pub const DEFAULT_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything an interaction needs to locate its inputs and stores.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_path: PathBuf,
    pub reports_dir: PathBuf,
    pub insights_path: PathBuf,
    pub users_path: PathBuf,
    pub cache_dir: PathBuf,
    pub insight_endpoint: String,
    /// When false the PD model is refit on every interaction.
    pub use_cache: bool,
    pub api_keys: ApiKeySources,
}

impl AppConfig {
    pub fn insight_config(&self) -> InsightConfig {
        InsightConfig {
            api_key: self.api_keys.resolve(),
            endpoint: self.insight_endpoint.clone(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Where the generative-text credential may live, in lookup order:
/// hosted secrets file, process environment, `.env` file, `config.json`.
#[derive(Debug, Clone)]
pub struct ApiKeySources {
    pub secrets_path: PathBuf,
    pub env_file: PathBuf,
    pub config_path: PathBuf,
}

impl ApiKeySources {
    pub fn resolve(&self) -> Option<String> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        let candidates = [
            ("secrets", read_secrets_key(&self.secrets_path)),
            ("environment", env(API_KEY_NAME)),
            ("env file", read_env_file_key(&self.env_file)),
            ("config", read_config_key(&self.config_path)),
        ];
        candidates.into_iter().find_map(|(source, value)| {
            let value = value?.trim().to_string();
            if value.is_empty() {
                return None;
            }
            debug!(source, "API key resolved");
            Some(value)
        })
    }

    /// Stores the key in `config.json`, keeping any other keys in that file.
    pub fn set_api_key(&self, key: &str) -> anyhow::Result<()> {
        let mut data = match std::fs::read_to_string(&self.config_path) {
            Ok(raw) => serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&raw)
                .unwrap_or_default(),
            Err(_) => serde_json::Map::new(),
        };
        data.insert(
            API_KEY_NAME.to_string(),
            serde_json::Value::String(key.trim().to_string()),
        );
        let body = serde_json::to_string_pretty(&data)?;
        std::fs::write(&self.config_path, body)
            .with_context(|| format!("failed to write {}", self.config_path.display()))?;
        Ok(())
    }
}

fn read_secrets_key(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    match raw.parse::<toml::Table>() {
        Ok(table) => table.get(API_KEY_NAME)?.as_str().map(str::to_string),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "skipping unreadable secrets file");
            None
        }
    }
}

fn read_env_file_key(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    raw.lines().find_map(|line| {
        let line = line.trim();
        if line.starts_with('#') {
            return None;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (name, value) = line.split_once('=')?;
        if name.trim() != API_KEY_NAME {
            return None;
        }
        let value = value.trim();
        let unquoted = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        Some(unquoted.to_string())
    })
}

fn read_config_key(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => value.get(API_KEY_NAME)?.as_str().map(str::to_string),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "skipping unreadable config file");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct InsightConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(dir: &Path) -> ApiKeySources {
        ApiKeySources {
            secrets_path: dir.join("secrets.toml"),
            env_file: dir.join(".env"),
            config_path: dir.join("config.json"),
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn nothing_configured_resolves_to_none() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(sources(dir.path()).resolve_with(no_env), None);
    }

    #[test]
    fn precedence_is_secrets_env_dotenv_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let sources = sources(dir.path());
        let env = |_: &str| Some("from-env".to_string());

        sources.set_api_key("from-config").unwrap();
        assert_eq!(sources.resolve_with(no_env).as_deref(), Some("from-config"));

        std::fs::write(&sources.env_file, "# local\nexport GEMINI_API_KEY=\"from-dotenv\"\n").unwrap();
        assert_eq!(sources.resolve_with(no_env).as_deref(), Some("from-dotenv"));
        assert_eq!(sources.resolve_with(env).as_deref(), Some("from-env"));

        std::fs::write(&sources.secrets_path, "GEMINI_API_KEY = \"from-secrets\"\n").unwrap();
        assert_eq!(sources.resolve_with(env).as_deref(), Some("from-secrets"));
    }

    #[test]
    fn blank_values_fall_through() {
        let dir = tempfile::TempDir::new().unwrap();
        let sources = sources(dir.path());
        std::fs::write(&sources.secrets_path, "GEMINI_API_KEY = \"  \"\n").unwrap();
        std::fs::write(&sources.env_file, "GEMINI_API_KEY=\n").unwrap();
        sources.set_api_key("kept").unwrap();
        assert_eq!(sources.resolve_with(no_env).as_deref(), Some("kept"));
    }

    #[test]
    fn set_api_key_preserves_other_settings() {
        let dir = tempfile::TempDir::new().unwrap();
        let sources = sources(dir.path());
        std::fs::write(&sources.config_path, r#"{"theme": "dark"}"#).unwrap();
        sources.set_api_key("  abc  ").unwrap();

        let raw = std::fs::read_to_string(&sources.config_path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["theme"], "dark");
        assert_eq!(value[API_KEY_NAME], "abc");
    }
}

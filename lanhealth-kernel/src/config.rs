/**
 * CONFIGURATION KERNEL - Chargement des paramètres au démarrage
 *
 * RÔLE : Résout host/port, header + clé API et fenêtre de fraîcheur.
 * Ordre de priorité : défauts < kernel.yaml (optionnel) < variables d'environnement.
 *
 * Une config invalide arrête le démarrage : pas de repli silencieux sur les défauts.
 */

use axum::http::HeaderName;
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

pub const DEFAULT_CONFIG_PATH: &str = "kernel.yaml";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_API_KEY_HEADER: &str = "x-api-key";
pub const DEFAULT_API_KEY: &str = "make_network_health";
pub const DEFAULT_STALE_SECONDS: i64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Contenu brut de kernel.yaml, tous les champs sont optionnels.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_key_header: Option<String>,
    pub api_key: Option<String>,
    pub stale_seconds: Option<i64>,
}

impl FileConfig {
    pub fn parse(txt: &str) -> Result<Self, serde_yaml::Error> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt)
    }
}

#[derive(Clone)]
pub struct KernelConfig {
    pub host: String,
    pub port: u16,
    pub api_key_header: HeaderName,
    pub api_key: String,
    pub stale_seconds: i64,
}

// la clé ne doit jamais finir dans les logs
impl std::fmt::Debug for KernelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key_header", &self.api_key_header)
            .field("api_key", &"<redacted>")
            .field("stale_seconds", &self.stale_seconds)
            .finish()
    }
}

impl KernelConfig {
    /// Fusionne le fichier et l'environnement. `env` renvoie `None` pour une
    /// variable absente ; une valeur vide est traitée comme absente.
    pub fn resolve<F>(file: FileConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let host = env("HOST")
            .or(file.host)
            .unwrap_or_else(|| DEFAULT_HOST.into());

        let port = match env("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                key: "PORT",
                reason: format!("{raw:?} is not a valid port ({e})"),
            })?,
            None => file.port.unwrap_or(DEFAULT_PORT),
        };

        let header_raw = env("API_KEY_HEADER")
            .or(file.api_key_header)
            .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.into());
        let api_key_header = HeaderName::try_from(header_raw.trim().to_ascii_lowercase())
            .map_err(|_| ConfigError::InvalidValue {
                key: "API_KEY_HEADER",
                reason: format!("{header_raw:?} is not a valid HTTP header name"),
            })?;

        let api_key = env("MAKE_API_KEY")
            .or(file.api_key)
            .unwrap_or_else(|| DEFAULT_API_KEY.into());
        if api_key.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "MAKE_API_KEY",
                reason: "api key cannot be empty".into(),
            });
        }

        let stale_seconds = match env("STALE_SECONDS") {
            Some(raw) => raw.trim().parse::<i64>().map_err(|e| ConfigError::InvalidValue {
                key: "STALE_SECONDS",
                reason: format!("{raw:?} is not an integer ({e})"),
            })?,
            None => file.stale_seconds.unwrap_or(DEFAULT_STALE_SECONDS),
        };
        if stale_seconds < 0 {
            return Err(ConfigError::InvalidValue {
                key: "STALE_SECONDS",
                reason: format!("must be >= 0, got {stale_seconds}"),
            });
        }

        Ok(Self {
            host,
            port,
            api_key_header,
            api_key,
            stale_seconds,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            api_key_header: HeaderName::from_static(DEFAULT_API_KEY_HEADER),
            api_key: DEFAULT_API_KEY.into(),
            stale_seconds: DEFAULT_STALE_SECONDS,
        }
    }
}

pub async fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "[kernel] pas de fichier de config, usage des défauts + env");
        return Ok(FileConfig::default());
    }
    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    FileConfig::parse(&txt).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub async fn load_config() -> Result<KernelConfig, ConfigError> {
    let path = std::env::var("LANHEALTH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let file = read_file_config(Path::new(&path)).await?;
    KernelConfig::resolve(file, |key| std::env::var(key).ok())
}

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub translations: TranslationsConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Skip transport verification at startup
    #[serde(default)]
    pub disable_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default = "default_templates_dir")]
    pub dir: PathBuf,
    /// Maximum entries per template cache tier
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_cache_capacity() -> u64 {
    1_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Smtp,
    /// Renders mails to JSON instead of sending them
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_transport_kind")]
    pub kind: TransportKind,
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Implicit TLS
    #[serde(default)]
    pub secure: bool,
    /// Upgrade with STARTTLS
    #[serde(default)]
    pub starttls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Wrap the transport with slot and rate limiting
    #[serde(default = "default_pool")]
    pub pool: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Messages per `rate_delta_ms` window, unlimited when absent
    #[serde(default = "default_rate_limit")]
    pub rate_limit: Option<u32>,
    #[serde(default = "default_rate_delta_ms")]
    pub rate_delta_ms: u64,
}

fn default_transport_kind() -> TransportKind {
    TransportKind::Smtp
}

fn default_smtp_host() -> String {
    "127.0.0.1".to_string()
}

fn default_smtp_port() -> u16 {
    1025
}

fn default_pool() -> bool {
    true
}

fn default_max_connections() -> usize {
    20
}

fn default_rate_limit() -> Option<u32> {
    Some(14) // 14 mails per window
}

fn default_rate_delta_ms() -> u64 {
    1000
}

impl TransportConfig {
    pub fn rate_delta(&self) -> Duration {
        Duration::from_millis(self.rate_delta_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    /// Sender used when a request names none
    pub from: Option<String>,
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Data merged over every request; these values win.
    ///
    /// Loaded from `data_path`, since config keys are lowercased.
    #[serde(skip)]
    pub data: Map<String, Value>,
    /// JSON object file holding `data`
    pub data_path: Option<PathBuf>,
    /// `false` disables the queue: every mail is sent directly
    #[serde(default = "default_queue_enabled")]
    pub queue: bool,
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_queue_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_backend")]
    pub backend: QueueBackend,
    #[serde(default = "default_queue_name")]
    pub name: String,
}

fn default_queue_backend() -> QueueBackend {
    QueueBackend::Memory
}

fn default_queue_name() -> String {
    "mails".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_prefix() -> String {
    "ara:mail".to_string()
}

/// Label file location.
///
/// Labels live in their own JSON file so keys keep their case.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranslationsConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_preview_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_preview_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Self::defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // MAILS_TRANSPORT__HOST, MAILS_QUEUE__BACKEND, MAILS_DISABLE_VERIFY, etc.
            .add_source(
                Environment::with_prefix("MAILS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("templates.dir", env::var("MAILS_TEMPLATES_DIR").ok())?;

        Self::load(builder.build()?)
    }

    /// Defaults plus a single config file, without environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(Self::defaults()?.add_source(File::from(path.as_ref())).build()?)
    }

    fn load(config: Config) -> Result<Self, ConfigError> {
        if config.get_table("defaults.data").is_ok() {
            return Err(ConfigError::Message(
                "`defaults.data` keys would be lowercased, set `defaults.data_path` to a JSON file instead"
                    .to_string(),
            ));
        }

        let mut settings: Self = config.try_deserialize()?;
        if let Some(path) = &settings.defaults.data_path {
            settings.defaults.data = read_json_object(path)?;
        }
        Ok(settings)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("templates.dir", "templates")?
            .set_default("templates.cache_capacity", 1_000)?
            .set_default("transport.kind", "smtp")?
            .set_default("transport.host", "127.0.0.1")?
            .set_default("transport.port", 1025)?
            .set_default("transport.pool", true)?
            .set_default("transport.max_connections", 20)?
            .set_default("transport.rate_limit", 14)?
            .set_default("transport.rate_delta_ms", 1000)?
            .set_default("defaults.lang", "en")?
            .set_default("defaults.queue", true)?
            .set_default("queue.backend", "memory")?
            .set_default("queue.name", "mails")?
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("preview.port", 3000)
    }

    pub fn preview_addr(&self) -> String {
        format!("{}:{}", self.preview.host, self.preview.port)
    }
}

fn read_json_object(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Message(format!("Failed to read {}: {}", path.display(), e))
    })?;

    serde_json::from_str(&raw)
        .map_err(|e| ConfigError::Message(format!("Invalid JSON object in {}: {}", path.display(), e)))
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: default_templates_dir(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            host: default_smtp_host(),
            port: default_smtp_port(),
            secure: false,
            starttls: false,
            username: None,
            password: None,
            pool: default_pool(),
            max_connections: default_max_connections(),
            rate_limit: default_rate_limit(),
            rate_delta_ms: default_rate_delta_ms(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            from: None,
            lang: default_lang(),
            data: Map::new(),
            data_path: None,
            queue: default_queue_enabled(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
            name: default_queue_name(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_redis_prefix(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_preview_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.transport.kind, TransportKind::Smtp);
        assert_eq!(settings.transport.port, 1025);
        assert_eq!(settings.transport.max_connections, 20);
        assert_eq!(settings.transport.rate_limit, Some(14));
        assert_eq!(settings.transport.rate_delta(), Duration::from_secs(1));
        assert_eq!(settings.defaults.lang, "en");
        assert!(settings.defaults.queue);
        assert_eq!(settings.queue.backend, QueueBackend::Memory);
        assert_eq!(settings.queue.name, "mails");
        assert_eq!(settings.log.format, LogFormat::Pretty);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("defaults.json");
        std::fs::write(&data_path, r#"{"domain": "https://example.com", "baseUrl": "https://pinned"}"#)
            .unwrap();

        let path = dir.path().join("mails.toml");
        std::fs::write(
            &path,
            format!(
                r#"
disable_verify = true

[transport]
kind = "json"
pool = false

[defaults]
from = "noreply@example.com"
queue = false
data_path = "{}"

[queue]
backend = "redis"
name = "outbox"

[log]
format = "json"
"#,
                data_path.display()
            ),
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert!(settings.disable_verify);
        assert_eq!(settings.transport.kind, TransportKind::Json);
        assert!(!settings.transport.pool);
        assert_eq!(settings.transport.host, "127.0.0.1");
        assert_eq!(settings.defaults.from.as_deref(), Some("noreply@example.com"));
        assert!(!settings.defaults.queue);
        assert_eq!(
            settings.defaults.data.get("domain"),
            Some(&Value::from("https://example.com"))
        );
        // Key case survives loading
        assert_eq!(
            settings.defaults.data.get("baseUrl"),
            Some(&Value::from("https://pinned"))
        );
        assert!(!settings.defaults.data.contains_key("baseurl"));
        assert_eq!(settings.queue.backend, QueueBackend::Redis);
        assert_eq!(settings.queue.name, "outbox");
        assert_eq!(settings.log.format, LogFormat::Json);
        assert_eq!(settings.templates.dir, PathBuf::from("templates"));
    }

    #[test]
    fn test_inline_default_data_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mails.toml");
        std::fs::write(&path, "[defaults.data]\nbaseUrl = \"https://pinned\"\n").unwrap();

        let err = Settings::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("defaults.data_path"));
    }

    #[test]
    fn test_shipped_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
        let settings = Settings::from_file(path).unwrap();

        assert!(settings.defaults.from.is_some());
        assert_eq!(
            settings.defaults.data.get("domain"),
            Some(&Value::from("https://openagenda.com"))
        );
    }

    #[test]
    fn test_preview_addr() {
        let settings = Settings::default();
        assert_eq!(settings.preview_addr(), "0.0.0.0:3000");
    }
}

mod settings;

pub use settings::{
    DefaultsConfig, LogConfig, LogFormat, PreviewConfig, QueueBackend, QueueConfig, RedisConfig,
    Settings, TemplatesConfig, TransportConfig, TransportKind, TranslationsConfig,
};

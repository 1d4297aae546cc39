use crate::frame::ClassIds;
use offside_detector::{ModelConfig, Validatable};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub upload: UploadConfig,
    #[serde(default)]
    pub classes: ClassIds,
    pub model: ModelConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    pub dir: PathBuf,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["png".into(), "jpg".into(), "jpeg".into()]
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

/// Isolated worker process settings. `program` defaults to the
/// `offside-worker` binary installed next to the running server; `args` are
/// passed before the image path.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default)]
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_worker_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_spawn_retry_delay_ms")]
    pub spawn_retry_delay_ms: u64,
}

fn default_worker_timeout_ms() -> u64 {
    30_000
}

fn default_spawn_retry_delay_ms() -> u64 {
    50
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout_ms: default_worker_timeout_ms(),
            spawn_retry_delay_ms: default_spawn_retry_delay_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn get_spawn_retry_delay(&self) -> Duration {
        Duration::from_millis(self.spawn_retry_delay_ms)
    }

    pub fn get_program(&self) -> std::io::Result<PathBuf> {
        match &self.program {
            Some(program) => Ok(program.clone()),
            None => {
                let exe = std::env::current_exe()?;
                Ok(exe.with_file_name(format!("offside-worker{}", std::env::consts::EXE_SUFFIX)))
            }
        }
    }
}

/// Producer/consumer settings. `permits` bounds how many detections run at
/// once across all queued requests.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_permits")]
    pub permits: usize,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_consumer_timeout_ms")]
    pub consumer_timeout_ms: u64,
}

fn default_permits() -> usize {
    1
}

fn default_capacity() -> usize {
    2
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_consumer_timeout_ms() -> u64 {
    5_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            permits: default_permits(),
            capacity: default_capacity(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            consumer_timeout_ms: default_consumer_timeout_ms(),
        }
    }
}

impl QueueConfig {
    pub fn get_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn get_consumer_timeout(&self) -> Duration {
        Duration::from_millis(self.consumer_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.permits == 0 {
            return Err("queue.permits must be at least 1".to_string());
        }
        // One frame plus the end-of-stream marker.
        if self.capacity < 2 {
            return Err("queue.capacity must be at least 2".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("OFFSIDE")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    if let Err(e) = config.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.model.validate()?;
        self.queue.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert!(matches!(
            LogLevel::try_from("DEBUG".to_string()),
            Ok(LogLevel::Debug)
        ));
        assert!(LogLevel::try_from("trace".to_string()).is_err());
    }

    #[test]
    fn test_queue_validation() {
        assert!(QueueConfig::default().validate().is_ok());

        let no_permits = QueueConfig {
            permits: 0,
            ..QueueConfig::default()
        };
        assert!(no_permits.validate().is_err());

        let no_room_for_marker = QueueConfig {
            capacity: 1,
            ..QueueConfig::default()
        };
        assert!(no_room_for_marker.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let yaml = r#"
log_level: info
server:
  host: 127.0.0.1
  port: 8080
upload:
  dir: static/uploads
model:
  model_dir: models
  onnx_file: yolov8n.onnx
"#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.get_address(), "127.0.0.1:8080");
        assert_eq!(config.upload.allowed_extensions, vec!["png", "jpg", "jpeg"]);
        assert_eq!(config.classes, ClassIds::default());
        assert_eq!(config.queue.permits, 1);
        assert_eq!(config.worker.get_timeout(), Duration::from_secs(30));
        assert!(config.worker.program.is_none());
    }

    #[test]
    fn test_class_ids_use_documented_keys() {
        let yaml = r#"
log_level: debug
server:
  host: 127.0.0.1
  port: 8080
upload:
  dir: static/uploads
classes:
  player_class_id: 2
  ball_class_id: 7
model:
  model_dir: models
  onnx_file: yolov8n.onnx
"#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(
            config.classes,
            ClassIds {
                player_class_id: 2,
                ball_class_id: 7,
            }
        );
    }
}

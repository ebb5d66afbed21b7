/*!
# Конфигурация движка

Настройки пула, исполнителя, метрик и логирования. Источники, в порядке
приоритета:

1. Переменные окружения `CHUNKED_EXEC__<SECTION>__<KEY>`
2. TOML-файл
3. Значения по умолчанию

*/

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::ParallelError;
use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Префикс переменных окружения
pub const ENV_PREFIX: &str = "CHUNKED_EXEC";

/// Основная конфигурация
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Конфигурация пула рабочих потоков
    pub pool: PoolConfig,

    /// Конфигурация исполнителя операций
    pub executor: ExecutorConfig,

    /// Конфигурация метрик
    pub metrics: MetricsConfig,

    /// Конфигурация логирования
    pub logging: LoggingConfig,
}

/// Конфигурация пула
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Количество рабочих потоков
    pub worker_threads: usize,

    /// Максимальное количество задач в очереди
    pub queue_capacity: usize,
}

/// Конфигурация исполнителя
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Количество чанков по умолчанию
    pub default_threads: usize,

    /// Выполнять чанки на общем пуле вместо временных потоков
    pub use_shared_pool: bool,
}

/// Конфигурация метрик
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Включить сбор метрик
    pub enabled: bool,

    /// Префикс имён метрик
    pub namespace: String,
}

/// Конфигурация логирования
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень логирования
    pub level: String,

    /// Директория для файлового лога; `None` - только консоль
    pub directory: Option<String>,

    /// Имя файла лога
    pub file_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            executor: ExecutorConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_threads: num_cpus::get(),
            use_shared_pool: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "chunked_exec".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_name: "chunked_exec.log".to_string(),
        }
    }
}

impl Config {
    /// Загрузка конфигурации из файла с переопределением из окружения
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()).required(true))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Конфигурация только из окружения поверх значений по умолчанию
    pub fn from_env() -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Разбор TOML-строки
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Сериализация в TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Валидация конфигурации
    pub fn validate(&self) -> Result<(), ParallelError> {
        if self.pool.worker_threads == 0 {
            return Err(ParallelError::InvalidThreadCount(0));
        }

        if self.pool.queue_capacity == 0 {
            return Err(ParallelError::InvalidCapacity(0));
        }

        if self.executor.default_threads == 0 {
            return Err(ParallelError::InvalidConfig(
                "executor.default_threads must be positive".to_string(),
            ));
        }

        if self.metrics.enabled && self.metrics.namespace.trim().is_empty() {
            return Err(ParallelError::InvalidConfig(
                "metrics.namespace must not be empty".to_string(),
            ));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(ParallelError::InvalidConfig(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Адаптация количества потоков под текущую машину
    pub fn optimize_for_system(&mut self) {
        let cpu_count = num_cpus::get();
        self.pool.worker_threads = cpu_count;
        self.executor.default_threads = cpu_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(config.pool.worker_threads >= 1);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() -> Result<()> {
        let config = Config::from_toml_str(
            r#"
            [pool]
            worker_threads = 3

            [executor]
            use_shared_pool = false
            "#,
        )?;

        assert_eq!(config.pool.worker_threads, 3);
        assert_eq!(config.pool.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(!config.executor.use_shared_pool);
        assert_eq!(config.logging.level, "info");
        Ok(())
    }

    #[test]
    fn toml_round_trip_preserves_values() -> Result<()> {
        let mut config = Config::default();
        config.pool.queue_capacity = 64;
        config.logging.directory = Some("logs".to_string());

        let restored = Config::from_toml_str(&config.to_toml_string()?)?;
        assert_eq!(restored, config);
        Ok(())
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.pool.worker_threads = 0;
        assert!(matches!(config.validate(), Err(ParallelError::InvalidThreadCount(0))));

        let mut config = Config::default();
        config.pool.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(ParallelError::InvalidCapacity(0))));

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(config.validate(), Err(ParallelError::InvalidConfig(_))));
    }

    #[test]
    fn load_reads_toml_file() -> Result<()> {
        let path = std::env::temp_dir().join(format!("chunked_exec_config_{}.toml", std::process::id()));
        std::fs::write(&path, "[pool]\nworker_threads = 2\nqueue_capacity = 16\n")?;

        let config = Config::load(&path);
        std::fs::remove_file(&path)?;

        let config = config?;
        assert_eq!(config.pool.worker_threads, 2);
        assert_eq!(config.pool.queue_capacity, 16);
        Ok(())
    }
}

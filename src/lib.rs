/*!
# Chunked Parallel Execution Library

Библиотека параллельного выполнения задач на фиксированном пуле потоков
и параллельных операций над последовательностями с разбиением на чанки.

## Модули

- `cancellation` - Токены отмены с регистрацией пробуждений
- `queue` - Ограниченная блокирующая FIFO-очередь задач
- `collector` - Упорядоченный сбор результатов батча
- `pool` - Пул рабочих потоков
- `runner` - Общий интерфейс исполнителей батчей
- `partition` - Разбиение входа на чанки
- `monoid` - Моноиды для свёрток
- `executor` - Параллельные операции `map` / `filter` / `reduce` / ...
- `config` - Конфигурация
- `metrics` - Сбор метрик производительности

*/

pub mod cancellation;
pub mod collector;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod monoid;
pub mod partition;
pub mod pool;
pub mod queue;
pub mod runner;

mod sync;

// Re-export основных типов
pub use cancellation::{CancelGuard, CancellationToken};
pub use collector::{aggregate, OrderedCollector, TaskOutcome};
pub use config::Config;
pub use error::{AggregateError, ParallelError, TaskError, TaskFailure};
pub use executor::ChunkedExecutor;
pub use metrics::MetricsCollector;
pub use monoid::Monoid;
pub use pool::{PoolBuilder, WorkerPool, WorkerState};
pub use queue::BoundedTaskQueue;
pub use runner::{TaskRunner, TransientRunner};

// Версия API
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

/*!
# Ошибки исполнительного движка

Таксономия ошибок:

- **Конфигурация** - неверное число потоков, ёмкость очереди, параметры
- **Ошибки задач** - сбой пользовательской функции на одном чанке, собираются
  в одну агрегированную ошибку после завершения всего батча
- **Прерывание** - отмена ожидающего потока, отличается от ошибок задач
- **Пустой вход** - только для `minimum` / `maximum`

*/

use std::any::Any;
use std::fmt;

use thiserror::Error;

/// Ошибка уровня вызова (пул, исполнитель, конфигурация)
#[derive(Debug, Error)]
pub enum ParallelError {
    /// Количество потоков должно быть положительным
    #[error("thread count must be positive, got {0}")]
    InvalidThreadCount(usize),

    /// Ёмкость очереди должна быть положительной
    #[error("queue capacity must be positive, got {0}")]
    InvalidCapacity(usize),

    /// Некорректная конфигурация
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Одна или несколько задач батча завершились с ошибкой
    #[error(transparent)]
    TaskFailures(#[from] AggregateError),

    /// Ожидание прервано через токен отмены
    #[error("operation interrupted")]
    Interrupted,

    /// Пустой вход для операции без нейтрального элемента
    #[error("empty input: no extreme element exists")]
    EmptyInput,

    /// Пул закрыт и не принимает новые задачи
    #[error("worker pool is closed")]
    PoolClosed,

    /// Не удалось корректно остановить часть рабочих потоков
    #[error("failed to stop {failed} worker thread(s)")]
    ShutdownFailed { failed: usize },

    /// ОС отказала в создании потока
    #[error("failed to spawn thread: {0}")]
    SpawnFailed(#[source] std::io::Error),
}

impl ParallelError {
    /// Ошибка вызвана отменой, а не сбоем задач
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ParallelError::Interrupted)
    }
}

/// Ошибка отдельной задачи
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Пользовательская функция запаниковала
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Пользовательская функция вернула ошибку
    #[error("task failed: {0}")]
    Failed(String),

    /// Задача пропущена: батч был отменён
    #[error("task cancelled before completion")]
    Cancelled,

    /// Задача выброшена из очереди при остановке пула
    #[error("task abandoned: worker pool shut down")]
    Abandoned,
}

impl TaskError {
    /// Построение ошибки из payload паники
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskError::Panicked(message)
    }

    /// Построение ошибки из любого отображаемого значения
    pub fn failed(error: impl fmt::Display) -> Self {
        TaskError::Failed(error.to_string())
    }
}

/// Ошибка задачи вместе с её позицией в батче
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub index: usize,
    pub error: TaskError,
}

/// Агрегированная ошибка батча: все сбои, а не только первый
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateError {
    failures: Vec<TaskFailure>,
    total: usize,
}

impl AggregateError {
    pub fn new(failures: Vec<TaskFailure>, total: usize) -> Self {
        Self { failures, total }
    }

    /// Все сбои в порядке индексов
    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    /// Количество задач в батче
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} task(s) failed", self.failures.len(), self.total)?;
        for failure in &self.failures {
            write!(f, "; [{}] {}", failure.index, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

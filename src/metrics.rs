/*!
# Метрики пула и исполнителя

Сбор метрик в формате Prometheus:
- Батчи: отправленные, завершённые, с ошибками, прерванные
- Задачи: выполненные и упавшие
- Глубина очереди
- Длительность батчей

*/

use std::time::Duration;

use anyhow::Result;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::config::MetricsConfig;

/// Сборщик метрик
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Registry,

    /// Счетчики батчей
    batches_submitted: Counter,
    batches_completed: Counter,
    batches_failed: Counter,
    batches_interrupted: Counter,

    /// Счетчики задач
    tasks_executed: Counter,
    tasks_failed: Counter,

    /// Текущая глубина очереди
    queue_depth: Gauge,

    /// Время выполнения батча
    batch_duration: Histogram,
}

/// Снимок значений счётчиков
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub batches_submitted: u64,
    pub batches_completed: u64,
    pub batches_failed: u64,
    pub batches_interrupted: u64,
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    pub queue_depth: u64,
}

impl MetricsCollector {
    /// Создание нового сборщика метрик
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        let registry = Registry::new();
        let prefix = &config.namespace;

        let batches_submitted = Counter::with_opts(Opts::new(
            format!("{}_batches_submitted_total", prefix),
            "Total number of submitted batches",
        ))?;
        let batches_completed = Counter::with_opts(Opts::new(
            format!("{}_batches_completed_total", prefix),
            "Total number of batches completed without task failures",
        ))?;
        let batches_failed = Counter::with_opts(Opts::new(
            format!("{}_batches_failed_total", prefix),
            "Total number of batches with at least one failed task",
        ))?;
        let batches_interrupted = Counter::with_opts(Opts::new(
            format!("{}_batches_interrupted_total", prefix),
            "Total number of batches abandoned by cancellation",
        ))?;
        let tasks_executed = Counter::with_opts(Opts::new(
            format!("{}_tasks_executed_total", prefix),
            "Total number of executed tasks",
        ))?;
        let tasks_failed = Counter::with_opts(Opts::new(
            format!("{}_tasks_failed_total", prefix),
            "Total number of failed tasks",
        ))?;
        let queue_depth = Gauge::with_opts(Opts::new(
            format!("{}_queue_depth", prefix),
            "Number of tasks waiting in the pool queue",
        ))?;
        let batch_duration = Histogram::with_opts(
            HistogramOpts::new(
                format!("{}_batch_duration_seconds", prefix),
                "Wall time from batch submission to completion",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;

        registry.register(Box::new(batches_submitted.clone()))?;
        registry.register(Box::new(batches_completed.clone()))?;
        registry.register(Box::new(batches_failed.clone()))?;
        registry.register(Box::new(batches_interrupted.clone()))?;
        registry.register(Box::new(tasks_executed.clone()))?;
        registry.register(Box::new(tasks_failed.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(batch_duration.clone()))?;

        Ok(Self {
            registry,
            batches_submitted,
            batches_completed,
            batches_failed,
            batches_interrupted,
            tasks_executed,
            tasks_failed,
            queue_depth,
            batch_duration,
        })
    }

    pub fn record_batch_submitted(&self) {
        self.batches_submitted.inc();
    }

    pub fn record_batch_completed(&self, duration: Duration) {
        self.batches_completed.inc();
        self.batch_duration.observe(duration.as_secs_f64());
    }

    pub fn record_batch_failed(&self, duration: Duration) {
        self.batches_failed.inc();
        self.batch_duration.observe(duration.as_secs_f64());
    }

    pub fn record_batch_interrupted(&self) {
        self.batches_interrupted.inc();
    }

    /// Запись исхода одной задачи
    pub fn record_task(&self, succeeded: bool) {
        self.tasks_executed.inc();
        if !succeeded {
            self.tasks_failed.inc();
        }
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    /// Текущие значения счётчиков
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_submitted: self.batches_submitted.get() as u64,
            batches_completed: self.batches_completed.get() as u64,
            batches_failed: self.batches_failed.get() as u64,
            batches_interrupted: self.batches_interrupted.get() as u64,
            tasks_executed: self.tasks_executed.get() as u64,
            tasks_failed: self.tasks_failed.get() as u64,
            queue_depth: self.queue_depth.get() as u64,
        }
    }

    /// Экспорт метрик в формате Prometheus
    pub fn export_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

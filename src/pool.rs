/*!
# Пул рабочих потоков

Фиксированный набор долгоживущих потоков, разбирающих общую ограниченную
очередь задач:

- **Батчи**: `submit_and_wait` отправляет упорядоченный список задач и
  блокирует вызывающего до завершения всех, возвращая исходы в порядке отправки
- **Backpressure**: при заполненной очереди отправитель ждёт свободного места
- **Отмена**: прерванный вызывающий отменяет токен своего батча; задачи
  батча, ещё стоящие в очереди, пропускаются, пул остаётся пригодным
- **Остановка**: `close` отклоняет новые задачи, даёт выполняющимся
  завершиться, выбрасывает задачи из очереди и присоединяет все потоки

## Жизненный цикл рабочего потока

```text
Running ──(сигнал остановки)──▶ Interrupted ──(join)──▶ Stopped
```
*/

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cancellation::CancellationToken;
use crate::collector::{aggregate, OrderedCollector, TaskOutcome};
use crate::config::PoolConfig;
use crate::error::{ParallelError, TaskError};
use crate::metrics::MetricsCollector;
use crate::queue::{BoundedTaskQueue, DEFAULT_QUEUE_CAPACITY};
use crate::runner::{run_guarded, TaskRunner};
use crate::sync::{lock, wait};

/// Элемент очереди пула
trait Runnable: Send {
    fn run(self: Box<Self>);
}

type Job = Box<dyn Runnable>;

/// Задача батча, привязанная к своему слоту в сборщике.
///
/// Если задача удалена, не будучи выполненной (очередь очищена при остановке,
/// отправка прервана), в слот записывается `Abandoned`, и ожидающий не зависает.
struct BatchTask<M, F>
where
    M: Send + 'static,
{
    index: usize,
    task: Option<F>,
    collector: OrderedCollector<M>,
    batch: CancellationToken,
    metrics: Option<MetricsCollector>,
}

impl<M, F> Runnable for BatchTask<M, F>
where
    M: Send + 'static,
    F: FnOnce(&CancellationToken) -> TaskOutcome<M> + Send + 'static,
{
    fn run(mut self: Box<Self>) {
        if let Some(task) = self.task.take() {
            let outcome = run_guarded(task, &self.batch);
            if let Some(metrics) = &self.metrics {
                metrics.record_task(outcome.is_ok());
            }
            self.collector.record_outcome(self.index, outcome);
        }
    }
}

impl<M, F> Drop for BatchTask<M, F>
where
    M: Send + 'static,
{
    fn drop(&mut self) {
        if self.task.is_some() {
            self.collector.record_error(self.index, TaskError::Abandoned);
        }
    }
}

/// Состояние рабочего потока
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    /// Разбирает очередь
    Running,
    /// Получил сигнал остановки и вышел из цикла
    Interrupted,
    /// Поток присоединён
    Stopped,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Running,
            1 => WorkerState::Interrupted,
            _ => WorkerState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Running => 0,
            WorkerState::Interrupted => 1,
            WorkerState::Stopped => 2,
        }
    }
}

struct WorkerHandle {
    id: usize,
    handle: JoinHandle<()>,
}

/// Пул рабочих потоков с ограниченной очередью
pub struct WorkerPool {
    /// Очередь задач, общая для всех рабочих
    queue: Arc<BoundedTaskQueue<Job>>,

    /// Сигнал остановки рабочих
    shutdown: CancellationToken,

    /// Потоки, ещё не присоединённые
    workers: Mutex<Vec<WorkerHandle>>,

    /// Идентификаторы рабочих потоков
    worker_ids: Vec<ThreadId>,

    /// Итог остановки: число аварийных потоков, `None` до окончания join
    stopped: Mutex<Option<usize>>,
    stopped_changed: Condvar,

    /// Состояния рабочих по индексу
    states: Vec<Arc<AtomicU8>>,

    /// Количество рабочих потоков
    threads: usize,

    /// Метрики (опционально)
    metrics: Option<MetricsCollector>,
}

/// Построитель пула
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    threads: usize,
    queue_capacity: usize,
    metrics: Option<MetricsCollector>,
}

impl PoolBuilder {
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            metrics: None,
        }
    }

    /// Ёмкость очереди задач
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Подключение сборщика метрик
    pub fn metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Создание пула и запуск рабочих потоков
    pub fn build(self) -> Result<WorkerPool, ParallelError> {
        if self.threads == 0 {
            return Err(ParallelError::InvalidThreadCount(self.threads));
        }

        let queue = Arc::new(BoundedTaskQueue::new(self.queue_capacity)?);
        let shutdown = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.threads);
        let mut states = Vec::with_capacity(self.threads);

        for id in 0..self.threads {
            let state = Arc::new(AtomicU8::new(WorkerState::Running.as_u8()));
            let spawned = {
                let queue = Arc::clone(&queue);
                let shutdown = shutdown.clone();
                let state = Arc::clone(&state);
                let metrics = self.metrics.clone();
                thread::Builder::new()
                    .name(format!("chunked-exec-worker-{}", id))
                    .spawn(move || worker_loop(id, queue, shutdown, state, metrics))
            };

            match spawned {
                Ok(handle) => {
                    handles.push(WorkerHandle { id, handle });
                    states.push(state);
                }
                Err(spawn_error) => {
                    error!("❌ Не удалось запустить рабочий поток {}: {}", id, spawn_error);
                    queue.close();
                    shutdown.cancel();
                    for worker in handles {
                        let _ = worker.handle.join();
                    }
                    return Err(ParallelError::SpawnFailed(spawn_error));
                }
            }
        }

        info!(
            "🚀 Пул запущен: {} потоков, ёмкость очереди {}",
            self.threads, self.queue_capacity
        );

        let worker_ids = handles.iter().map(|worker| worker.handle.thread().id()).collect();

        Ok(WorkerPool {
            queue,
            shutdown,
            workers: Mutex::new(handles),
            worker_ids,
            stopped: Mutex::new(None),
            stopped_changed: Condvar::new(),
            states,
            threads: self.threads,
            metrics: self.metrics,
        })
    }
}

/// Основной цикл рабочего потока
fn worker_loop(
    id: usize,
    queue: Arc<BoundedTaskQueue<Job>>,
    shutdown: CancellationToken,
    state: Arc<AtomicU8>,
    metrics: Option<MetricsCollector>,
) {
    debug!("Worker {} started", id);

    loop {
        match queue.dequeue(&shutdown) {
            Ok(job) => {
                job.run();
                if let Some(metrics) = &metrics {
                    metrics.set_queue_depth(queue.len());
                }
            }
            Err(reason) => {
                debug!("Worker {} leaving loop: {}", id, reason);
                break;
            }
        }
    }

    state.store(WorkerState::Interrupted.as_u8(), Ordering::SeqCst);
}

impl WorkerPool {
    /// Пул из `threads` потоков с очередью по умолчанию
    pub fn new(threads: usize) -> Result<Self, ParallelError> {
        PoolBuilder::new(threads).build()
    }

    /// Пул с заданной ёмкостью очереди
    pub fn with_capacity(threads: usize, capacity: usize) -> Result<Self, ParallelError> {
        PoolBuilder::new(threads).queue_capacity(capacity).build()
    }

    /// Пул из конфигурации
    pub fn from_config(config: &PoolConfig) -> Result<Self, ParallelError> {
        Self::builder(config.worker_threads)
            .queue_capacity(config.queue_capacity)
            .build()
    }

    pub fn builder(threads: usize) -> PoolBuilder {
        PoolBuilder::new(threads)
    }

    /// Отправка батча нульарных задач и ожидание всех результатов.
    ///
    /// Исходы возвращаются в порядке отправки независимо от порядка
    /// завершения; паника задачи становится `TaskError::Panicked` на её позиции.
    pub fn submit_and_wait<M, F>(
        &self,
        tasks: Vec<F>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskOutcome<M>>, ParallelError>
    where
        M: Send + 'static,
        F: FnOnce() -> M + Send + 'static,
    {
        let tasks: Vec<_> = tasks
            .into_iter()
            .map(|task| move |_: &CancellationToken| -> TaskOutcome<M> { Ok(task()) })
            .collect();
        self.run_batch(tasks, cancel)
    }

    /// Применение `f` к каждому аргументу отдельной задачей.
    ///
    /// При сбое хотя бы одной задачи возвращается агрегированная ошибка.
    pub fn map<T, U, F>(&self, f: F, args: Vec<T>, cancel: &CancellationToken) -> Result<Vec<U>, ParallelError>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let tasks: Vec<_> = args
            .into_iter()
            .map(|arg| {
                let f = Arc::clone(&f);
                move || f(arg)
            })
            .collect();

        aggregate(self.submit_and_wait(tasks, cancel)?)
    }

    /// Остановка пула.
    ///
    /// Закрывает очередь, сигнализирует рабочим, выбрасывает невыполненные
    /// задачи и присоединяет все потоки. Выполняющиеся задачи завершаются.
    /// Сбой одного потока не мешает остановке остальных. Повторный или
    /// параллельный вызов ждёт, пока первый не присоединит все потоки, и
    /// возвращает тот же итог.
    pub fn close(&self) -> Result<(), ParallelError> {
        let handles = std::mem::take(&mut *lock(&self.workers));
        if handles.is_empty() {
            return self.await_stopped();
        }

        info!("🛑 Остановка пула из {} потоков", handles.len());

        self.queue.close();
        self.shutdown.cancel();

        let abandoned = self.queue.drain();
        if !abandoned.is_empty() {
            warn!("⚠️ {} задач(и) выброшено из очереди при остановке", abandoned.len());
        }
        // Удаление записывает Abandoned в слоты ожидающих батчей
        drop(abandoned);

        if let Some(metrics) = &self.metrics {
            metrics.set_queue_depth(0);
        }

        let current = thread::current().id();
        let mut failed = 0;
        for worker in handles {
            if worker.handle.thread().id() == current {
                warn!("Worker {} requested pool shutdown from inside a task, not joining itself", worker.id);
                continue;
            }
            if worker.handle.join().is_err() {
                error!("❌ Рабочий поток {} завершился аварийно", worker.id);
                failed += 1;
            }
            self.states[worker.id].store(WorkerState::Stopped.as_u8(), Ordering::SeqCst);
        }

        *lock(&self.stopped) = Some(failed);
        self.stopped_changed.notify_all();

        if failed > 0 {
            return Err(ParallelError::ShutdownFailed { failed });
        }

        info!("✅ Пул остановлен");
        Ok(())
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Текущие состояния рабочих потоков
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.states
            .iter()
            .map(|state| WorkerState::from_u8(state.load(Ordering::SeqCst)))
            .collect()
    }

    pub fn metrics(&self) -> Option<&MetricsCollector> {
        self.metrics.as_ref()
    }
}

impl TaskRunner for WorkerPool {
    fn run_batch<M, F>(
        &self,
        tasks: Vec<F>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskOutcome<M>>, ParallelError>
    where
        M: Send + 'static,
        F: FnOnce(&CancellationToken) -> TaskOutcome<M> + Send + 'static,
    {
        cancel.check()?;
        if self.queue.is_closed() {
            return Err(ParallelError::PoolClosed);
        }

        let started = Instant::now();
        let batch = CancellationToken::new();
        let collector = OrderedCollector::new(tasks.len());

        if let Some(metrics) = &self.metrics {
            metrics.record_batch_submitted();
        }
        debug!("Submitting batch of {} task(s)", tasks.len());

        for (index, task) in tasks.into_iter().enumerate() {
            let job: Job = Box::new(BatchTask {
                index,
                task: Some(task),
                collector: collector.clone(),
                batch: batch.clone(),
                metrics: self.metrics.clone(),
            });

            if let Err(reason) = self.queue.enqueue(job, cancel) {
                // Уже поставленные задачи батча будут пропущены
                batch.cancel();
                self.record_abort(&reason);
                return Err(reason);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_queue_depth(self.queue.len());
        }

        match collector.await_all(cancel) {
            Ok(outcomes) => {
                if let Some(metrics) = &self.metrics {
                    if outcomes.iter().all(Result::is_ok) {
                        metrics.record_batch_completed(started.elapsed());
                    } else {
                        metrics.record_batch_failed(started.elapsed());
                    }
                }
                debug!("Batch of {} task(s) finished in {:?}", outcomes.len(), started.elapsed());
                Ok(outcomes)
            }
            Err(reason) => {
                batch.cancel();
                self.record_abort(&reason);
                Err(reason)
            }
        }
    }
}

impl WorkerPool {
    /// Ожидание итога остановки, начатой другим вызовом `close`
    fn await_stopped(&self) -> Result<(), ParallelError> {
        // Рабочий поток не может ждать собственного join
        if self.worker_ids.contains(&thread::current().id()) {
            return Ok(());
        }

        let mut stopped = lock(&self.stopped);
        loop {
            match *stopped {
                Some(0) => return Ok(()),
                Some(failed) => return Err(ParallelError::ShutdownFailed { failed }),
                None => stopped = wait(&self.stopped_changed, stopped),
            }
        }
    }

    fn record_abort(&self, reason: &ParallelError) {
        warn!("Batch aborted: {}", reason);
        if reason.is_interrupted() {
            if let Some(metrics) = &self.metrics {
                metrics.record_batch_interrupted();
            }
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .field("queue", &self.queue)
            .field("states", &self.worker_states())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Err(reason) = self.close() {
            error!("❌ Ошибка остановки пула: {}", reason);
        }
    }
}

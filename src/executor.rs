/*!
# Параллельные операции над последовательностями

Двухэтапная схема для всех операций:

1. Вход делится на `min(T, L)` непрерывных чанков ([`partition::split`])
2. **stage1** выполняется на каждом чанке отдельной задачей (на пуле или
   на временном потоке) и возвращает частичный результат
3. После завершения всех задач ошибки собираются в одну агрегированную
   ошибку, иначе **stage2** объединяет частичные результаты в порядке чанков

Поверх [`ChunkedExecutor::execute`] построены `map`, `try_map`, `filter`,
`join`, `reduce`, `map_reduce`, `minimum`, `maximum`, `all`, `any`, `count`.

```text
[5, 3, 8, 1, 9, 2], T = 3
  ├─ [5, 3] ─ stage1 ─┐
  ├─ [8, 1] ─ stage1 ─┼─ stage2 → результат
  └─ [9, 2] ─ stage1 ─┘
```
*/

use std::cmp::Ordering;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::cancellation::CancellationToken;
use crate::collector::{aggregate, TaskOutcome};
use crate::config::ExecutorConfig;
use crate::error::{ParallelError, TaskError};
use crate::metrics::MetricsCollector;
use crate::monoid::Monoid;
use crate::partition;
use crate::pool::WorkerPool;
use crate::runner::{TaskRunner, TransientRunner};

/// Где выполняются задачи чанков
#[derive(Debug, Clone)]
enum Backend {
    Transient(TransientRunner),
    Pool(Arc<WorkerPool>),
}

impl TaskRunner for Backend {
    fn run_batch<M, F>(
        &self,
        tasks: Vec<F>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskOutcome<M>>, ParallelError>
    where
        M: Send + 'static,
        F: FnOnce(&CancellationToken) -> TaskOutcome<M> + Send + 'static,
    {
        match self {
            Backend::Transient(runner) => runner.run_batch(tasks, cancel),
            Backend::Pool(pool) => pool.run_batch(tasks, cancel),
        }
    }
}

/// Исполнитель параллельных операций над чанками входа
#[derive(Debug, Clone)]
pub struct ChunkedExecutor {
    backend: Backend,
    cancel: CancellationToken,
    metrics: Option<MetricsCollector>,
    default_threads: usize,
}

impl Default for ChunkedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedExecutor {
    /// Режим без пула: по временному потоку на чанк
    pub fn new() -> Self {
        Self {
            backend: Backend::Transient(TransientRunner::new()),
            cancel: CancellationToken::new(),
            metrics: None,
            default_threads: num_cpus::get(),
        }
    }

    /// Режим общего пула
    pub fn with_pool(pool: Arc<WorkerPool>) -> Self {
        let default_threads = pool.threads();
        Self {
            backend: Backend::Pool(pool),
            cancel: CancellationToken::new(),
            metrics: None,
            default_threads,
        }
    }

    pub fn from_config(config: &ExecutorConfig, pool: Option<Arc<WorkerPool>>) -> Self {
        let executor = match pool {
            Some(pool) if config.use_shared_pool => Self::with_pool(pool),
            _ => Self::new(),
        };

        Self {
            default_threads: config.default_threads.max(1),
            ..executor
        }
    }

    /// Токен, отмена которого прерывает ожидание любой операции
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Метрики для режима без пула; пул ведёт собственные
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn uses_pool(&self) -> bool {
        matches!(self.backend, Backend::Pool(_))
    }

    pub fn default_threads(&self) -> usize {
        self.default_threads
    }

    /// Двухэтапное выполнение: `stage1` на каждом чанке, затем `stage2` над
    /// частичными результатами в порядке чанков.
    ///
    /// Ошибки всех чанков возвращаются вместе как `TaskFailures`; отмена
    /// ожидания возвращает `Interrupted`. Если пул остановлен, пока батч
    /// ждал в очереди, выброшенные чанки дают `PoolClosed`.
    pub fn execute<T, M, R, S1, S2>(
        &self,
        threads: usize,
        values: impl Into<Arc<[T]>>,
        stage1: S1,
        stage2: S2,
    ) -> Result<R, ParallelError>
    where
        T: Send + Sync + 'static,
        M: Send + 'static,
        S1: Fn(&[T], &CancellationToken) -> TaskOutcome<M> + Send + Sync + 'static,
        S2: FnOnce(Vec<M>) -> R,
    {
        let values: Arc<[T]> = values.into();
        let ranges = partition::split(threads, values.len())?;
        self.cancel.check()?;

        if ranges.is_empty() {
            return Ok(stage2(Vec::new()));
        }

        debug!(
            "Executing {} element(s) in {} chunk(s) on {}",
            values.len(),
            ranges.len(),
            if self.uses_pool() { "shared pool" } else { "transient threads" }
        );

        let stage1 = Arc::new(stage1);
        let tasks: Vec<_> = ranges
            .into_iter()
            .map(|range| {
                let values = Arc::clone(&values);
                let stage1 = Arc::clone(&stage1);
                move |batch: &CancellationToken| -> TaskOutcome<M> { stage1(&values[range], batch) }
            })
            .collect();

        let started = Instant::now();
        let outcomes = self.run_tasks(tasks)?;
        self.record_outcomes(&outcomes, started);

        if outcomes.iter().any(|outcome| matches!(outcome, Err(TaskError::Abandoned))) {
            return Err(ParallelError::PoolClosed);
        }

        let partials = aggregate(outcomes)?;
        Ok(stage2(partials))
    }

    fn run_tasks<M, F>(&self, tasks: Vec<F>) -> Result<Vec<TaskOutcome<M>>, ParallelError>
    where
        M: Send + 'static,
        F: FnOnce(&CancellationToken) -> TaskOutcome<M> + Send + 'static,
    {
        let transient_metrics = match self.backend {
            Backend::Transient(_) => self.metrics.as_ref(),
            Backend::Pool(_) => None,
        };

        if let Some(metrics) = transient_metrics {
            metrics.record_batch_submitted();
        }

        let result = self.backend.run_batch(tasks, &self.cancel);
        if let (Err(reason), Some(metrics)) = (&result, transient_metrics) {
            if reason.is_interrupted() {
                metrics.record_batch_interrupted();
            }
        }
        result
    }

    fn record_outcomes<M>(&self, outcomes: &[TaskOutcome<M>], started: Instant) {
        let metrics = match (&self.backend, &self.metrics) {
            (Backend::Transient(_), Some(metrics)) => metrics,
            _ => return,
        };

        for outcome in outcomes {
            metrics.record_task(outcome.is_ok());
        }
        if outcomes.iter().all(Result::is_ok) {
            metrics.record_batch_completed(started.elapsed());
        } else {
            metrics.record_batch_failed(started.elapsed());
        }
    }

    /// Применение `f` к каждому элементу с сохранением порядка
    pub fn map<T, U, F>(&self, threads: usize, values: impl Into<Arc<[T]>>, f: F) -> Result<Vec<U>, ParallelError>
    where
        T: Send + Sync + 'static,
        U: Send + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.execute(
            threads,
            values,
            move |chunk: &[T], batch: &CancellationToken| {
                elements(chunk, batch).map(|item| item.map(&f)).collect::<TaskOutcome<Vec<U>>>()
            },
            concat,
        )
    }

    /// Как `map`, но ошибка `f` проваливает задачу своего чанка
    pub fn try_map<T, U, E, F>(
        &self,
        threads: usize,
        values: impl Into<Arc<[T]>>,
        f: F,
    ) -> Result<Vec<U>, ParallelError>
    where
        T: Send + Sync + 'static,
        U: Send + 'static,
        E: Display,
        F: Fn(&T) -> Result<U, E> + Send + Sync + 'static,
    {
        self.execute(
            threads,
            values,
            move |chunk: &[T], batch: &CancellationToken| {
                elements(chunk, batch)
                    .map(|item| item.and_then(|value| f(value).map_err(TaskError::failed)))
                    .collect::<TaskOutcome<Vec<U>>>()
            },
            concat,
        )
    }

    /// Элементы, удовлетворяющие предикату, в исходном порядке
    pub fn filter<T, P>(&self, threads: usize, values: impl Into<Arc<[T]>>, predicate: P) -> Result<Vec<T>, ParallelError>
    where
        T: Clone + Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.execute(
            threads,
            values,
            move |chunk: &[T], batch: &CancellationToken| {
                let mut kept = Vec::new();
                for item in elements(chunk, batch) {
                    let item = item?;
                    if predicate(item) {
                        kept.push(item.clone());
                    }
                }
                Ok(kept)
            },
            concat,
        )
    }

    /// Конкатенация строковых представлений без разделителя
    pub fn join<T>(&self, threads: usize, values: impl Into<Arc<[T]>>) -> Result<String, ParallelError>
    where
        T: Display + Send + Sync + 'static,
    {
        self.execute(
            threads,
            values,
            |chunk: &[T], batch: &CancellationToken| {
                let mut joined = String::new();
                for item in elements(chunk, batch) {
                    joined.push_str(&item?.to_string());
                }
                Ok(joined)
            },
            |parts: Vec<String>| parts.concat(),
        )
    }

    /// Свёртка моноидом; на пустом входе - нейтральный элемент
    pub fn reduce<T>(&self, threads: usize, values: impl Into<Arc<[T]>>, monoid: Monoid<T>) -> Result<T, ParallelError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let combine = monoid.clone();
        self.execute(
            threads,
            values,
            move |chunk: &[T], batch: &CancellationToken| {
                let mut acc = monoid.identity();
                for item in elements(chunk, batch) {
                    acc = monoid.combine(acc, item?.clone());
                }
                Ok(acc)
            },
            move |partials: Vec<T>| combine.fold(partials),
        )
    }

    /// Отображение `lift` с последующей свёрткой моноидом
    pub fn map_reduce<T, R, L>(
        &self,
        threads: usize,
        values: impl Into<Arc<[T]>>,
        lift: L,
        monoid: Monoid<R>,
    ) -> Result<R, ParallelError>
    where
        T: Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        L: Fn(&T) -> R + Send + Sync + 'static,
    {
        let combine = monoid.clone();
        self.execute(
            threads,
            values,
            move |chunk: &[T], batch: &CancellationToken| {
                let mut acc = monoid.identity();
                for item in elements(chunk, batch) {
                    acc = monoid.combine(acc, lift(item?));
                }
                Ok(acc)
            },
            move |partials: Vec<R>| combine.fold(partials),
        )
    }

    /// Максимум по компаратору; при равенстве побеждает более ранний элемент
    pub fn maximum<T, C>(&self, threads: usize, values: impl Into<Arc<[T]>>, compare: C) -> Result<T, ParallelError>
    where
        T: Clone + Send + Sync + 'static,
        C: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.extreme(threads, values, move |candidate, current| {
            compare(candidate, current) == Ordering::Greater
        })
    }

    /// Минимум по компаратору; при равенстве побеждает более ранний элемент
    pub fn minimum<T, C>(&self, threads: usize, values: impl Into<Arc<[T]>>, compare: C) -> Result<T, ParallelError>
    where
        T: Clone + Send + Sync + 'static,
        C: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.extreme(threads, values, move |candidate, current| {
            compare(candidate, current) == Ordering::Less
        })
    }

    /// `replaces(candidate, current)` истинно, только если кандидат строго лучше
    fn extreme<T, P>(&self, threads: usize, values: impl Into<Arc<[T]>>, replaces: P) -> Result<T, ParallelError>
    where
        T: Clone + Send + Sync + 'static,
        P: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let values: Arc<[T]> = values.into();
        if threads == 0 {
            return Err(ParallelError::InvalidThreadCount(threads));
        }
        if values.is_empty() {
            return Err(ParallelError::EmptyInput);
        }

        let replaces = Arc::new(replaces);
        let select = Arc::clone(&replaces);

        let best = self.execute(
            threads,
            values,
            move |chunk: &[T], batch: &CancellationToken| {
                let mut best: Option<&T> = None;
                for item in elements(chunk, batch) {
                    let item = item?;
                    best = match best {
                        Some(current) if !replaces(item, current) => Some(current),
                        _ => Some(item),
                    };
                }
                Ok(best.cloned())
            },
            move |partials: Vec<Option<T>>| {
                partials.into_iter().flatten().fold(None, |best: Option<T>, item| match best {
                    Some(current) if !select(&item, &current) => Some(current),
                    _ => Some(item),
                })
            },
        )?;

        best.ok_or(ParallelError::EmptyInput)
    }

    /// Все элементы удовлетворяют предикату; пустой вход - `true`
    pub fn all<T, P>(&self, threads: usize, values: impl Into<Arc<[T]>>, predicate: P) -> Result<bool, ParallelError>
    where
        T: Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.execute(
            threads,
            values,
            move |chunk: &[T], batch: &CancellationToken| {
                for item in elements(chunk, batch) {
                    if !predicate(item?) {
                        return Ok(false);
                    }
                }
                Ok(true)
            },
            |partials: Vec<bool>| partials.into_iter().all(|ok| ok),
        )
    }

    /// Хотя бы один элемент удовлетворяет предикату: `!all(!p)`
    pub fn any<T, P>(&self, threads: usize, values: impl Into<Arc<[T]>>, predicate: P) -> Result<bool, ParallelError>
    where
        T: Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.all(threads, values, move |item: &T| !predicate(item))
            .map(|all_rejected| !all_rejected)
    }

    /// Количество элементов, удовлетворяющих предикату
    pub fn count<T, P>(&self, threads: usize, values: impl Into<Arc<[T]>>, predicate: P) -> Result<usize, ParallelError>
    where
        T: Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.execute(
            threads,
            values,
            move |chunk: &[T], batch: &CancellationToken| {
                let mut matched = 0;
                for item in elements(chunk, batch) {
                    if predicate(item?) {
                        matched += 1;
                    }
                }
                Ok(matched)
            },
            |partials: Vec<usize>| partials.into_iter().sum(),
        )
    }
}

/// Элементы чанка с проверкой токена батча перед каждым
fn elements<'a, T>(
    chunk: &'a [T],
    batch: &'a CancellationToken,
) -> impl Iterator<Item = TaskOutcome<&'a T>> + 'a {
    chunk.iter().map(move |item| {
        if batch.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(item)
        }
    })
}

fn concat<U>(parts: Vec<Vec<U>>) -> Vec<U> {
    parts.into_iter().flatten().collect()
}

/*!
# Исполнители батчей

Единый интерфейс запуска батча задач с двумя реализациями:

- [`TransientRunner`] - по одному временному потоку на задачу, все потоки
  присоединяются до возврата
- [`WorkerPool`](crate::pool::WorkerPool) - долгоживущий пул с ограниченной очередью

Обе реализации возвращают исходы в порядке отправки и одинаково
обрабатывают отмену: прерванное ожидание отменяет токен батча, чтобы
оставшиеся задачи батча не выполнялись впустую.

*/

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::collector::{OrderedCollector, TaskOutcome};
use crate::error::{ParallelError, TaskError};

/// Запуск батча задач с упорядоченными исходами
pub trait TaskRunner: Send + Sync {
    /// Выполнение всех задач и ожидание их завершения.
    ///
    /// Каждая задача получает токен своего батча. Ошибки и паники задач
    /// возвращаются как исходы на своих позициях; `Err` означает сбой всего
    /// вызова (отмена, закрытый пул, отказ в создании потока).
    fn run_batch<M, F>(
        &self,
        tasks: Vec<F>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskOutcome<M>>, ParallelError>
    where
        M: Send + 'static,
        F: FnOnce(&CancellationToken) -> TaskOutcome<M> + Send + 'static;
}

/// Выполнение задачи на границе: отменённый батч пропускается, паника
/// превращается в `TaskError::Panicked`
pub(crate) fn run_guarded<M, F>(task: F, batch: &CancellationToken) -> TaskOutcome<M>
where
    F: FnOnce(&CancellationToken) -> TaskOutcome<M>,
{
    if batch.is_cancelled() {
        return Err(TaskError::Cancelled);
    }

    panic::catch_unwind(AssertUnwindSafe(|| task(batch)))
        .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)))
}

/// Исполнитель без пула: по потоку на задачу
#[derive(Debug, Clone, Default)]
pub struct TransientRunner;

impl TransientRunner {
    pub fn new() -> Self {
        Self
    }
}

impl TaskRunner for TransientRunner {
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

        let batch = CancellationToken::new();
        let collector = OrderedCollector::new(tasks.len());
        let mut handles = Vec::with_capacity(tasks.len());

        debug!("Spawning {} transient thread(s)", tasks.len());

        for (index, task) in tasks.into_iter().enumerate() {
            let collector = collector.clone();
            let batch_token = batch.clone();

            let spawned = thread::Builder::new()
                .name(format!("chunked-exec-chunk-{}", index))
                .spawn(move || {
                    let outcome = run_guarded(task, &batch_token);
                    collector.record_outcome(index, outcome);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(error) => {
                    warn!("Failed to spawn chunk thread {}: {}", index, error);
                    batch.cancel();
                    join_all(handles);
                    return Err(ParallelError::SpawnFailed(error));
                }
            }
        }

        let result = collector.await_all(cancel);
        if result.is_err() {
            debug!("Transient batch interrupted, stopping sibling threads");
            batch.cancel();
        }

        // Ни один поток батча не переживает вызов
        join_all(handles);
        result
    }
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            warn!("Chunk thread terminated abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn transient_runner_keeps_submission_order() -> Result<(), ParallelError> {
        let tasks: Vec<_> = (0..6u64)
            .map(|i| {
                move |_: &CancellationToken| -> TaskOutcome<u64> {
                    thread::sleep(Duration::from_millis(30 - 5 * i));
                    Ok(i * i)
                }
            })
            .collect();

        let outcomes = TransientRunner::new().run_batch(tasks, &CancellationToken::new())?;
        let values: Vec<u64> = outcomes.into_iter().collect::<Result<_, _>>().expect("no task failures");
        assert_eq!(values, vec![0, 1, 4, 9, 16, 25]);
        Ok(())
    }

    #[test]
    fn panics_are_captured_per_task() -> Result<(), ParallelError> {
        let tasks: Vec<Box<dyn FnOnce(&CancellationToken) -> TaskOutcome<i32> + Send>> = vec![
            Box::new(|_: &CancellationToken| Ok(1)),
            Box::new(|_: &CancellationToken| -> TaskOutcome<i32> { panic!("chunk exploded") }),
            Box::new(|_: &CancellationToken| Err(TaskError::Failed("bad input".into()))),
        ];

        let outcomes = TransientRunner::new().run_batch(tasks, &CancellationToken::new())?;
        assert_eq!(outcomes[0], Ok(1));
        assert_eq!(outcomes[1], Err(TaskError::Panicked("chunk exploded".into())));
        assert_eq!(outcomes[2], Err(TaskError::Failed("bad input".into())));
        Ok(())
    }

    #[test]
    fn cancelled_caller_stops_and_joins_sibling_threads() {
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let running = Arc::clone(&running);
                move |batch: &CancellationToken| -> TaskOutcome<()> {
                    running.fetch_add(1, Ordering::SeqCst);
                    while !batch.is_cancelled() {
                        thread::sleep(Duration::from_millis(2));
                    }
                    running.fetch_sub(1, Ordering::SeqCst);
                    Err(TaskError::Cancelled)
                }
            })
            .collect();

        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(40));
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let result = TransientRunner::new().run_batch(tasks, &cancel);
        canceller.join().expect("canceller thread");

        assert!(matches!(result, Err(ParallelError::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(running.load(Ordering::SeqCst), 0, "no chunk thread outlives the call");
    }

    #[test]
    fn boxed_tasks_are_accepted() -> Result<(), ParallelError> {
        type Boxed = Box<dyn FnOnce(&CancellationToken) -> TaskOutcome<&'static str> + Send>;
        let tasks: Vec<Boxed> = vec![Box::new(|_: &CancellationToken| Ok("a")), Box::new(|_: &CancellationToken| Ok("b"))];
        let outcomes = TransientRunner::new().run_batch(tasks, &CancellationToken::new())?;
        assert_eq!(outcomes, vec![Ok("a"), Ok("b")]);
        Ok(())
    }
}

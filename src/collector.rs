/*!
# Упорядоченный сборщик результатов

Один экземпляр на батч из `N` задач. Каждая задача записывает результат
(или ошибку) в свой слот по исходному индексу; счётчик завершений только
растёт. Ожидающий поток освобождается, когда счётчик достигает `N`.

Агрегация ошибок - чистый пост-проход по массиву исходов (`aggregate`):
при хотя бы одном сбое вызывающий получает одну ошибку со всеми сбоями
вместо частичных результатов.

*/

use std::sync::{Arc, Condvar, Mutex};

use tracing::warn;

use crate::cancellation::CancellationToken;
use crate::error::{AggregateError, ParallelError, TaskError, TaskFailure};
use crate::sync::{lock, wait};

/// Исход одной задачи
pub type TaskOutcome<M> = Result<M, TaskError>;

struct CollectorState<M> {
    slots: Vec<Option<TaskOutcome<M>>>,
    completed: usize,
}

struct CollectorShared<M> {
    state: Mutex<CollectorState<M>>,
    done: Condvar,
}

/// Сборщик результатов батча; клоны разделяют состояние
pub struct OrderedCollector<M> {
    shared: Arc<CollectorShared<M>>,
    len: usize,
}

impl<M> Clone for OrderedCollector<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            len: self.len,
        }
    }
}

impl<M: Send + 'static> OrderedCollector<M> {
    /// Сборщик на `len` задач
    pub fn new(len: usize) -> Self {
        Self {
            shared: Arc::new(CollectorShared {
                state: Mutex::new(CollectorState {
                    slots: (0..len).map(|_| None).collect(),
                    completed: 0,
                }),
                done: Condvar::new(),
            }),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Запись успешного результата
    pub fn record(&self, index: usize, value: M) -> bool {
        self.record_outcome(index, Ok(value))
    }

    /// Запись ошибки; ошибка тоже считается завершением
    pub fn record_error(&self, index: usize, error: TaskError) -> bool {
        self.record_outcome(index, Err(error))
    }

    /// Запись исхода задачи.
    ///
    /// Повторная запись слота и запись вне диапазона игнорируются,
    /// возвращается `false`.
    pub fn record_outcome(&self, index: usize, outcome: TaskOutcome<M>) -> bool {
        let mut state = lock(&self.shared.state);

        let Some(slot) = state.slots.get_mut(index) else {
            warn!("Result slot {} is out of range for a batch of {}", index, self.len);
            return false;
        };
        if slot.is_some() {
            warn!("Result slot {} recorded twice, keeping the first outcome", index);
            return false;
        }

        *slot = Some(outcome);
        state.completed += 1;
        let finished = state.completed == self.len;
        drop(state);

        if finished {
            self.shared.done.notify_all();
        }
        true
    }

    /// Количество завершённых задач
    pub fn completed(&self) -> usize {
        lock(&self.shared.state).completed
    }

    pub fn is_complete(&self) -> bool {
        self.completed() == self.len
    }

    /// Ожидание завершения всех задач батча.
    ///
    /// Возвращает исходы в порядке индексов. Отмена `token` прерывает
    /// ожидание с `Interrupted`; задачи, завершившиеся позже, продолжают
    /// безопасно писать в свои клоны сборщика.
    pub fn await_all(self, token: &CancellationToken) -> Result<Vec<TaskOutcome<M>>, ParallelError> {
        let _wake = {
            let shared = Arc::clone(&self.shared);
            token.on_cancel(move || {
                let _state = lock(&shared.state);
                shared.done.notify_all();
            })
        };

        let mut state = lock(&self.shared.state);
        while state.completed < self.len {
            if token.is_cancelled() {
                return Err(ParallelError::Interrupted);
            }
            state = wait(&self.shared.done, state);
        }

        Ok(state
            .slots
            .drain(..)
            .map(|slot| slot.unwrap_or(Err(TaskError::Cancelled)))
            .collect())
    }
}

/// Свёртка исходов батча: значения по порядку либо агрегированная ошибка
pub fn aggregate<M>(outcomes: Vec<TaskOutcome<M>>) -> Result<Vec<M>, ParallelError> {
    let total = outcomes.len();
    let mut values = Vec::with_capacity(total);
    let mut failures = Vec::new();

    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(value) => values.push(value),
            Err(error) => failures.push(TaskFailure { index, error }),
        }
    }

    if failures.is_empty() {
        Ok(values)
    } else {
        Err(AggregateError::new(failures, total).into())
    }
}

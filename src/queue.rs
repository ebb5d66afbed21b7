/*!
# Ограниченная очередь задач

FIFO-очередь с фиксированной ёмкостью:

- **Backpressure**: `enqueue` блокирует производителя, пока очередь заполнена
- **Блокирующий `dequeue`**: потребитель ждёт, пока очередь пуста
- **Прерываемость**: оба ожидания завершаются при отмене токена
- **Закрытие**: закрытая очередь отклоняет новые элементы и будит всех ожидающих

Инвариант: `0 <= len <= capacity` в любой момент наблюдения.

*/

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};

use crate::cancellation::{CancelGuard, CancellationToken};
use crate::error::ParallelError;
use crate::sync::{lock, wait};

/// Ёмкость по умолчанию - практически неограниченная
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000_000;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

struct QueueShared<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Причина отказа неблокирующей вставки; элемент возвращается вызывающему
#[derive(Debug, PartialEq, Eq)]
pub enum TryEnqueueError<T> {
    Full(T),
    Closed(T),
}

impl<T> TryEnqueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TryEnqueueError::Full(item) | TryEnqueueError::Closed(item) => item,
        }
    }
}

/// Потокобезопасная ограниченная FIFO-очередь
pub struct BoundedTaskQueue<T> {
    shared: Arc<QueueShared<T>>,
    capacity: usize,
}

impl<T: Send + 'static> BoundedTaskQueue<T> {
    /// Создание очереди заданной ёмкости
    pub fn new(capacity: usize) -> Result<Self, ParallelError> {
        if capacity == 0 {
            return Err(ParallelError::InvalidCapacity(capacity));
        }

        Ok(Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    closed: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
            capacity,
        })
    }

    /// Добавление в хвост; блокируется, пока очередь заполнена
    pub fn enqueue(&self, item: T, token: &CancellationToken) -> Result<(), ParallelError> {
        let _wake = self.wake_on_cancel(token);
        let mut state = lock(&self.shared.state);

        loop {
            if state.closed {
                return Err(ParallelError::PoolClosed);
            }
            if token.is_cancelled() {
                // Передаём сигнал «есть место» другому производителю
                if state.items.len() < self.capacity {
                    self.shared.not_full.notify_one();
                }
                return Err(ParallelError::Interrupted);
            }
            if state.items.len() < self.capacity {
                break;
            }
            state = wait(&self.shared.not_full, state);
        }

        state.items.push_back(item);
        drop(state);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Неблокирующая вставка
    pub fn try_enqueue(&self, item: T) -> Result<(), TryEnqueueError<T>> {
        let mut state = lock(&self.shared.state);
        if state.closed {
            return Err(TryEnqueueError::Closed(item));
        }
        if state.items.len() >= self.capacity {
            return Err(TryEnqueueError::Full(item));
        }

        state.items.push_back(item);
        drop(state);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Извлечение головы; блокируется, пока очередь пуста.
    ///
    /// Отмена токена прерывает ожидание с `Interrupted`. Закрытая очередь
    /// отдаёт оставшиеся элементы, затем возвращает `PoolClosed`.
    pub fn dequeue(&self, token: &CancellationToken) -> Result<T, ParallelError> {
        let _wake = self.wake_on_cancel(token);
        let mut state = lock(&self.shared.state);

        loop {
            if token.is_cancelled() {
                if !state.items.is_empty() {
                    self.shared.not_empty.notify_one();
                }
                return Err(ParallelError::Interrupted);
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.shared.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(ParallelError::PoolClosed);
            }
            state = wait(&self.shared.not_empty, state);
        }
    }

    /// Закрытие очереди; повторный вызов ничего не делает
    pub fn close(&self) {
        let mut state = lock(&self.shared.state);
        state.closed = true;
        drop(state);
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
    }

    /// Извлечение всех ожидающих элементов
    pub fn drain(&self) -> Vec<T> {
        let mut state = lock(&self.shared.state);
        let drained: Vec<T> = state.items.drain(..).collect();
        drop(state);
        self.shared.not_full.notify_all();
        drained
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }

    fn wake_on_cancel(&self, token: &CancellationToken) -> CancelGuard {
        let shared = Arc::clone(&self.shared);
        token.on_cancel(move || {
            let _state = lock(&shared.state);
            shared.not_empty.notify_all();
            shared.not_full.notify_all();
        })
    }
}

impl<T> fmt::Debug for BoundedTaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("BoundedTaskQueue")
            .field("len", &state.items.len())
            .field("capacity", &self.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}

/*!
# Кооперативная отмена

Токен отмены заменяет прерывание потоков: блокирующие ожидания (очередь,
сборщик результатов) регистрируют обработчик пробуждения, который под
мьютексом ожидаемой структуры будит её condition variable. Проверка флага
выполняется под тем же мьютексом, поэтому сигнал отмены не теряется между
проверкой и засыпанием.

Отмена необратима: однажды отменённый токен остаётся отменённым.

*/

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::ParallelError;
use crate::sync::lock;

type WakeCallback = Arc<dyn Fn() + Send + Sync>;

struct TokenState {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, WakeCallback)>>,
}

/// Разделяемый сигнал отмены
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Создание неотменённого токена
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Отмена токена и пробуждение всех зарегистрированных ожиданий
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        // Обработчики вызываются без удержания реестра
        let callbacks: Vec<WakeCallback> = lock(&self.state.callbacks)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            callback();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Interrupted)`, если токен отменён
    pub fn check(&self) -> Result<(), ParallelError> {
        if self.is_cancelled() {
            Err(ParallelError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Регистрация обработчика пробуждения.
    ///
    /// Если токен уже отменён, обработчик вызывается сразу. Обработчик может
    /// быть вызван дважды при гонке с `cancel`, поэтому он обязан быть
    /// идемпотентным. Регистрация снимается при удалении `CancelGuard`.
    pub fn on_cancel<F>(&self, callback: F) -> CancelGuard
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: WakeCallback = Arc::new(callback);
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.state.callbacks).push((id, Arc::clone(&callback)));

        if self.is_cancelled() {
            callback();
        }

        CancelGuard {
            state: Arc::clone(&self.state),
            id,
        }
    }

    /// Количество активных регистраций
    pub fn registered_waiters(&self) -> usize {
        lock(&self.state.callbacks).len()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Регистрация обработчика пробуждения, снимаемая при удалении
#[must_use = "the wake-up registration is removed when the guard is dropped"]
pub struct CancelGuard {
    state: Arc<TokenState>,
    id: u64,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        lock(&self.state.callbacks).retain(|(id, _)| *id != self.id);
    }
}

//! Моноид: нейтральный элемент и ассоциативная операция для `reduce` / `map_reduce`.

use std::fmt;
use std::sync::Arc;

type Operator<T> = Arc<dyn Fn(T, T) -> T + Send + Sync>;

/// Пара (нейтральный элемент, ассоциативная бинарная операция)
pub struct Monoid<T> {
    identity: T,
    operator: Operator<T>,
}

impl<T: Clone> Monoid<T> {
    pub fn new<F>(identity: T, operator: F) -> Self
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        Self {
            identity,
            operator: Arc::new(operator),
        }
    }

    pub fn identity(&self) -> T {
        self.identity.clone()
    }

    pub fn combine(&self, left: T, right: T) -> T {
        (self.operator)(left, right)
    }

    /// Левая свёртка, начиная с нейтрального элемента
    pub fn fold<I>(&self, items: I) -> T
    where
        I: IntoIterator<Item = T>,
    {
        items
            .into_iter()
            .fold(self.identity(), |acc, item| self.combine(acc, item))
    }
}

impl<T: Clone> Clone for Monoid<T> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            operator: Arc::clone(&self.operator),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Monoid<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monoid")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

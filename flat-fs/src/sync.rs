//! 与互斥锁配合使用的条件变量。
//!
//! 唤醒是广播式的：每次 [`Condvar::notify_all`] 都会放行当时所有的等待者，
//! 等待者醒来后必须重新检查条件。

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::relax::{RelaxStrategy, Spin};
use spin::{Mutex, MutexGuard};

/// 等待者不会挂起，而是按 `R` 反复轮询直到被唤醒。
///
/// 默认的 [`Spin`] 在等待期间一直占用一个核；读者等写者这类可能很久的等待，
/// 宿主环境可以换成让出时间片的策略，如 `spin::relax::Yield`。
pub struct Condvar<R = Spin> {
    /// 每次唤醒加一，等待者据此判断是否被唤醒过
    generation: AtomicUsize,
    relax: PhantomData<fn() -> R>,
}

impl<R: RelaxStrategy> Default for Condvar<R> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for Condvar<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar")
            .field("generation", &self.generation)
            .finish()
    }
}

impl<R: RelaxStrategy> Condvar<R> {
    pub const fn new() -> Self {
        Self {
            generation: AtomicUsize::new(0),
            relax: PhantomData,
        }
    }

    /// 释放锁并等待下一次唤醒，之后重新上锁。
    ///
    /// 调用时必须持有 `guard`，唤醒方也必须在同一把锁内调用 [`Condvar::notify_all`]，
    /// 否则可能错过唤醒。
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        let generation = self.generation.load(Ordering::Acquire);
        drop(guard);

        while self.generation.load(Ordering::Acquire) == generation {
            R::relax();
        }

        mutex.lock()
    }

    #[inline]
    pub fn notify_all(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}

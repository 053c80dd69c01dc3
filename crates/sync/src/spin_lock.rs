//! 自旋锁
//!
//! [`RawSpinLock`] 只提供锁标志本身；[`SpinLock`] 在其上包一层
//! `UnsafeCell`，以 RAII 保护器的形式提供对数据的互斥访问。
//! 两者都不可重入：持锁期间再次加锁会死锁。

use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::intr_guard::IntrGuard;

/// 不携带数据的自旋锁。加锁时关闭本地中断。
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    /// 创建一个新的（未上锁的）自旋锁。
    pub const fn new() -> Self {
        RawSpinLock {
            locked: AtomicBool::new(false),
        }
    }

    /// 自旋直到取得锁，返回 RAII 保护器。
    pub fn lock(&self) -> RawSpinLockGuard<'_> {
        let intr = IntrGuard::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        RawSpinLockGuard { lock: self, _intr: intr }
    }

    /// 尝试取锁；失败时立即恢复中断状态并返回 `None`。
    pub fn try_lock(&self) -> Option<RawSpinLockGuard<'_>> {
        let intr = IntrGuard::new();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(RawSpinLockGuard { lock: self, _intr: intr })
        } else {
            None
        }
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// 锁当前是否被持有（仅用于测试）。
    #[cfg(test)]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// [`RawSpinLock`] 的 RAII 保护器。Drop 时先放锁，再恢复中断状态。
pub struct RawSpinLockGuard<'a> {
    lock: &'a RawSpinLock,
    _intr: IntrGuard,
}

impl Drop for RawSpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// 携带数据的自旋锁。
///
/// # 示例
/// ```ignore
/// let counter = SpinLock::new(0usize);
/// {
///     let mut guard = counter.lock();
///     *guard += 1;
/// } // 离开作用域自动放锁
/// ```
pub struct SpinLock<T> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    /// 创建一个新的 SpinLock，接管 `data` 的所有权。
    pub const fn new(data: T) -> Self {
        SpinLock {
            raw: RawSpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// 自旋直到取得锁，返回可访问数据的 RAII 保护器。
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let raw = self.raw.lock();
        SpinLockGuard {
            _raw: raw,
            // SAFETY: 已持有 raw 锁，独占访问成立
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 尝试取锁，失败时返回 `None`。
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.raw.try_lock().map(|raw| SpinLockGuard {
            _raw: raw,
            // SAFETY: 同上
            data: unsafe { &mut *self.data.get() },
        })
    }
}

/// [`SpinLock`] 的 RAII 保护器。
pub struct SpinLockGuard<'a, T> {
    _raw: RawSpinLockGuard<'a>,
    data: &'a mut T,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}

// SAFETY: 互斥由 RawSpinLock 保证，数据只需能跨线程移动
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

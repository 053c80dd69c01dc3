//! 同步原语
//!
//! 为内核其余模块提供基础的互斥手段：自旋锁与中断保护。
//!
//! # 架构依赖
//!
//! 自旋锁在持锁期间需要关闭本地中断，否则中断处理程序在同一 CPU 上
//! 再次抢锁会直接死锁。关中断的具体方式由 [`IntrOps`] trait 抽象，
//! 内核启动早期通过 [`register_intr_ops`] 注册实现。
//!
//! 注册之前（早期启动阶段、宿主机单元测试），中断保护退化为空操作，
//! 自旋锁本身仍然提供互斥。

#![no_std]

mod intr_guard;
mod spin_lock;

pub use intr_guard::IntrGuard;
pub use spin_lock::{RawSpinLock, RawSpinLockGuard, SpinLock, SpinLockGuard};

use core::sync::atomic::{AtomicUsize, Ordering};

/// 中断控制操作
///
/// 由内核的体系结构层实现并注册。
pub trait IntrOps: Send + Sync {
    /// 读取并关闭本地中断，返回之前的中断状态
    ///
    /// # Safety
    /// 只能在内核上下文中调用
    unsafe fn save_and_disable(&self) -> usize;

    /// 恢复之前保存的中断状态
    ///
    /// # Safety
    /// `flags` 必须来自同一 CPU 上先前的 [`IntrOps::save_and_disable`] 调用
    unsafe fn restore(&self, flags: usize);
}

/// 全局中断控制实例（fat pointer 拆成两个 usize 存储）
static INTR_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static INTR_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册中断控制实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_intr_ops(ops: &'static dyn IntrOps) {
    let ptr = ops as *const dyn IntrOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn IntrOps, (usize, usize)>(ptr) };
    // 先写 vtable 再写 data：读方看到非零 data 时 vtable 必然可见
    INTR_OPS_VTABLE.store(vtable, Ordering::Release);
    INTR_OPS_DATA.store(data, Ordering::Release);
}

/// 获取已注册的中断控制实现；尚未注册时返回 `None`
#[inline]
pub(crate) fn intr_ops() -> Option<&'static dyn IntrOps> {
    let data = INTR_OPS_DATA.load(Ordering::Acquire);
    if data == 0 {
        return None;
    }
    let vtable = INTR_OPS_VTABLE.load(Ordering::Acquire);
    // SAFETY: 两部分均由 register_intr_ops 写入，重组即得原 fat pointer
    Some(unsafe { &*core::mem::transmute::<(usize, usize), *const dyn IntrOps>((data, vtable)) })
}

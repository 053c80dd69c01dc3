//! 中断保护器
//!
//! 以 RAII 方式关闭/恢复本地中断。

use crate::intr_ops;

/// 中断保护器。构造时关闭本地中断，Drop 时恢复之前的状态。
///
/// 在 [`register_intr_ops`](crate::register_intr_ops) 之前构造时不做任何事。
pub struct IntrGuard {
    flags: Option<usize>,
}

impl IntrGuard {
    /// 关闭本地中断并记录之前的状态。
    pub fn new() -> Self {
        // SAFETY: 仅在内核上下文构造；注册之前为空操作
        let flags = intr_ops().map(|ops| unsafe { ops.save_and_disable() });
        IntrGuard { flags }
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        if let (Some(flags), Some(ops)) = (self.flags, intr_ops()) {
            // SAFETY: flags 来自同一 CPU 上的 save_and_disable
            unsafe { ops.restore(flags) };
        }
    }
}

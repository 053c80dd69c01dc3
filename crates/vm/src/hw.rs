//! 硬件页表驱动接口
//!
//! 每个地址空间持有一份硬件页表句柄。本子系统只消费"建立/解除/查询
//! 单条映射"这一契约，多级页表的具体布局属于体系结构层。
//! ACCESSED 与 DIRTY 位由硬件在访问时置位，本子系统负责读取与清除
//! （时钟驱逐、脏页写回判定）。

use crate::addr::Vpn;
use bitflags::bitflags;

bitflags! {
    /// 硬件页表项标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u8 {
        /// 可写
        const WRITABLE = 1 << 0;
        /// 用户态可访问
        const USER = 1 << 1;
        /// 自上次清除以来被访问过（硬件置位）
        const ACCESSED = 1 << 2;
        /// 自上次清除以来被写过（硬件置位）
        const DIRTY = 1 << 3;
    }
}

/// 单个地址空间的硬件页表驱动
///
/// 方法都取 `&self`：硬件页表本身就是共享可变的，实现必须在内部
/// 完成串行化（真实硬件通过原子页表项写入，测试桩通过自旋锁）。
pub trait HwPageTable: Send + Sync + 'static {
    /// 建立 `vpn` 到内核可访问地址 `kva` 所在物理页的映射。
    /// 页表内部资源不足等原因导致失败时返回 `false`。
    fn map(&self, vpn: Vpn, kva: usize, flags: PteFlags) -> bool;

    /// 解除 `vpn` 的映射；未映射时为空操作。
    fn unmap(&self, vpn: Vpn);

    /// 查询映射，返回 `(kva, 当前标志)`。
    fn walk(&self, vpn: Vpn) -> Option<(usize, PteFlags)>;

    /// 覆写标志位（用于清除 ACCESSED / DIRTY）。未映射时返回 `false`。
    fn update_flags(&self, vpn: Vpn, flags: PteFlags) -> bool;

    /// 读取并清除 ACCESSED 位；未映射视为未访问。
    fn test_and_clear_accessed(&self, vpn: Vpn) -> bool {
        match self.walk(vpn) {
            Some((_, flags)) if flags.contains(PteFlags::ACCESSED) => {
                self.update_flags(vpn, flags - PteFlags::ACCESSED);
                true
            }
            _ => false,
        }
    }

    /// DIRTY 位是否置位。
    fn dirty(&self, vpn: Vpn) -> bool {
        self.walk(vpn)
            .is_some_and(|(_, flags)| flags.contains(PteFlags::DIRTY))
    }
}

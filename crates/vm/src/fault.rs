//! 缺页处理
//!
//! 陷入/中断层在每次页错误时调用 [`VmManager::handle_fault`]，在
//! 出错线程自己的内核栈上同步解决；期间可能因设备 I/O 阻塞，这是
//! 本子系统唯一的挂起点。返回 `Err` 的缺页没有内部重试：调用方
//! （系统调用/陷入层）据此终止出错进程。

use crate::addr::Vaddr;
use crate::config::{KERNEL_BASE, STACK_PUSH_SLOP, USER_STACK_MAX_SIZE, USER_STACK_TOP};
use crate::error::{VmError, VmResult};
use crate::hw::HwPageTable;
use crate::manager::VmManager;
use crate::page::TargetKind;
use crate::space::MemorySpace;
use alloc::sync::Arc;

impl<PT: HwPageTable> VmManager<PT> {
    /// 缺页处理入口。
    ///
    /// `sp` 是陷入时保存的用户栈指针，用于栈增长判定。
    ///
    /// 处理顺序：内核地址检查 → 补充页表查找 →（未登记时）栈增长
    /// 判定 → 写保护检查 → 取帧、装映射、按类型换入。
    pub fn handle_fault(
        &self,
        space: &Arc<MemorySpace<PT>>,
        addr: Vaddr,
        is_write: bool,
        is_user: bool,
        sp: Vaddr,
    ) -> VmResult<()> {
        // 内核地址上的缺页无法从用户上下文解决
        if addr.as_usize() >= KERNEL_BASE {
            log::debug!(
                "fault: space {} 地址 {:#x} 落在内核空间 (user={})",
                space.id(),
                addr.as_usize(),
                is_user
            );
            return Err(VmError::KernelAddress);
        }

        let vpn = addr.vpn();
        let registered = {
            let spt = space.lock_inner();
            match spt.page(vpn) {
                // 对只读页的写访问是真实的违例：本设计从不建立可写
                // 共享，没有写时复制要在这里兜底
                Some(page) if is_write && !page.writable() => {
                    return Err(VmError::WriteProtected);
                }
                Some(_) => true,
                None => false,
            }
        };

        if !registered {
            if !is_stack_growth(addr, sp) {
                return Err(VmError::NotMapped);
            }
            // 栈增长：就地登记一个零填充的匿名页
            match self.alloc_page(space, addr, true, TargetKind::Anon, None) {
                Ok(()) => {}
                // 同空间另一线程抢先登记了同一页：继续走 claim 即可
                Err(VmError::AddressConflict) => {}
                Err(e) => return Err(e),
            }
        }

        self.claim_vpn(space, vpn)
    }
}

/// 栈增长判定：地址在栈指针下方有限距离内，且增长后的栈不超过
/// 配置的最大尺寸。
fn is_stack_growth(addr: Vaddr, sp: Vaddr) -> bool {
    let a = addr.as_usize();
    if a >= USER_STACK_TOP {
        return false;
    }
    if USER_STACK_TOP - a > USER_STACK_MAX_SIZE {
        return false;
    }
    a + STACK_PUSH_SLOP >= sp.as_usize()
}

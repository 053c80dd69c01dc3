//! 文件映射管理
//!
//! mmap 把文件的一段以固定偏移映射为一串连续的文件页：每页先以
//! Uninit 登记，首次缺页才读文件；munmap 把脏页写回后整段摘除。
//! 文件页从不占用交换槽——内容总可从文件恢复，驱逐脏页等价于写回，
//! 驱逐干净页等价于丢弃。

use crate::addr::{Vaddr, VpnRange};
use crate::config::{KERNEL_BASE, PAGE_SIZE};
use crate::error::{VmError, VmResult};
use crate::file::VmFile;
use crate::hw::HwPageTable;
use crate::manager::VmManager;
use crate::page::{Page, TargetKind};
use crate::space::MemorySpace;
use alloc::sync::Arc;
use core::cmp::min;

impl<PT: HwPageTable> VmManager<PT> {
    /// 建立文件映射，成功时返回映射起始地址。
    ///
    /// 拒绝：空指针、未对齐的 `addr` 或 `offset`、零长度、越进内核
    /// 空间的范围，以及与已登记页重叠的范围。占用检查对整段原子：
    /// 要么全部页登记成功，要么一页也不登记。
    ///
    /// 映射通过克隆 `Arc` 持有自己的文件句柄，调用方之后关闭
    /// 自己的描述符不影响映射。
    pub fn mmap(
        &self,
        space: &Arc<MemorySpace<PT>>,
        addr: Vaddr,
        length: usize,
        writable: bool,
        file: Arc<dyn VmFile>,
        offset: usize,
    ) -> VmResult<Vaddr> {
        if addr.as_usize() == 0
            || !addr.is_page_aligned()
            || length == 0
            || offset % PAGE_SIZE != 0
        {
            return Err(VmError::InvalidArgument);
        }
        match addr.as_usize().checked_add(length) {
            Some(end) if end <= KERNEL_BASE => {}
            _ => return Err(VmError::InvalidArgument),
        }

        let pages = length.div_ceil(PAGE_SIZE);
        let range = VpnRange::from_start_len(addr.vpn(), pages);

        let mut spt = space.lock_inner();
        // 整段占用检查先于任何登记
        for vpn in range.iter() {
            if spt.page(vpn).is_some() {
                return Err(VmError::AddressConflict);
            }
        }
        for (i, vpn) in range.iter().enumerate() {
            let target = TargetKind::File {
                file: file.clone(),
                offset: offset + i * PAGE_SIZE,
                len: min(PAGE_SIZE, length - i * PAGE_SIZE),
            };
            if spt
                .insert(Page::new_uninit(vpn, writable, target, None))
                .is_err()
            {
                unreachable!("mmap: 占用预检查之后不可能冲突");
            }
        }
        spt.mmaps.insert(range.start, pages);
        Ok(addr)
    }

    /// 解除 `addr` 处建立的映射。
    ///
    /// 按建立时的起始地址定位整段；每个驻留、可写且为脏的页先把
    /// 帧内容写回文件中记录的偏移，然后全部页从补充页表摘除。
    /// 某页写回失败时记下首个错误、仍然回收其余资源，最后上抛
    /// ——内容丢失必须上报。
    pub fn munmap(&self, space: &Arc<MemorySpace<PT>>, addr: Vaddr) -> VmResult<()> {
        let start = addr.vpn();
        let pages = {
            let mut spt = space.lock_inner();
            spt.mmaps.remove(&start).ok_or(VmError::NotMapped)?
        };

        let mut first_err = None;
        for vpn in VpnRange::from_start_len(start, pages).iter() {
            match self.detach_vpn(space, vpn, true) {
                Ok(()) | Err(VmError::NotMapped) => {}
                Err(e) => {
                    first_err.get_or_insert(e);
                    let _ = self.detach_vpn(space, vpn, false);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

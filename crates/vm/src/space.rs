//! 地址空间与补充页表
//!
//! [`MemorySpace`] 是每个地址空间一份的对象：硬件页表句柄加上
//! 补充页表（SPT）。SPT 以页码为键独占拥有本空间的全部 [`Page`]
//! 描述符，键唯一，顺序无关。
//!
//! # 并发约定
//!
//! SPT 对所属进程私有，但驱逐者会跨空间短暂地锁定它，因此所有
//! 改动都在内部自旋锁下进行；同一地址空间的多个线程由此天然串行。
//! 任何需要 I/O 的迁移都遵守"锁内摘计划 → 锁外做 I/O → 锁内提交"
//! 的三段式，SPT 锁从不跨 I/O 持有。

use crate::addr::{Vaddr, Vpn};
use crate::error::{VmError, VmResult};
use crate::hw::HwPageTable;
use crate::page::Page;
use alloc::collections::btree_map::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use sync::{SpinLock, SpinLockGuard};

static NEXT_SPACE_ID: AtomicUsize = AtomicUsize::new(0);

/// 补充页表主体与 mmap 区域索引
pub(crate) struct SpaceInner {
    /// 页码 -> 页描述符
    pages: BTreeMap<Vpn, Page>,
    /// mmap 区域索引：起始页码 -> 页数，munmap 按起始地址定位整段
    pub(crate) mmaps: BTreeMap<Vpn, usize>,
}

impl SpaceInner {
    /// 查找页。
    pub(crate) fn page(&self, vpn: Vpn) -> Option<&Page> {
        self.pages.get(&vpn)
    }

    /// 查找页（可变）。
    pub(crate) fn page_mut(&mut self, vpn: Vpn) -> Option<&mut Page> {
        self.pages.get_mut(&vpn)
    }

    /// 登记一个新页。地址已被占用时返回 [`VmError::AddressConflict`]，
    /// 此时不产生任何改动。
    pub(crate) fn insert(&mut self, page: Page) -> VmResult<()> {
        match self.pages.entry(page.vpn()) {
            alloc::collections::btree_map::Entry::Occupied(_) => Err(VmError::AddressConflict),
            alloc::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(page);
                Ok(())
            }
        }
    }

    /// 摘除一个页，返回其描述符。
    pub(crate) fn remove(&mut self, vpn: Vpn) -> Option<Page> {
        self.pages.remove(&vpn)
    }

    /// 当前登记的全部页码。
    pub(crate) fn vpns(&self) -> Vec<Vpn> {
        self.pages.keys().copied().collect()
    }

    /// 登记的页数。
    pub(crate) fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// 一个地址空间：硬件页表 + 补充页表
pub struct MemorySpace<PT: HwPageTable> {
    id: usize,
    hw: PT,
    inner: SpinLock<SpaceInner>,
}

impl<PT: HwPageTable> MemorySpace<PT> {
    /// 创建一个空的地址空间。
    ///
    /// 返回 `Arc`：物理帧注册表以（空间，页码）句柄反向引用占有页，
    /// 需要与所属进程共享所有权。
    pub fn new(hw: PT) -> Arc<Self> {
        Arc::new(MemorySpace {
            id: NEXT_SPACE_ID.fetch_add(1, Ordering::Relaxed),
            hw,
            inner: SpinLock::new(SpaceInner {
                pages: BTreeMap::new(),
                mmaps: BTreeMap::new(),
            }),
        })
    }

    /// 空间编号（只用于日志）。
    pub fn id(&self) -> usize {
        self.id
    }

    /// 硬件页表句柄。
    pub fn hw(&self) -> &PT {
        &self.hw
    }

    /// 锁定补充页表。
    pub(crate) fn lock_inner(&self) -> SpinLockGuard<'_, SpaceInner> {
        self.inner.lock()
    }

    /// `va` 所在的页是否已登记（按页对齐后查找）。
    pub fn contains(&self, va: Vaddr) -> bool {
        self.inner.lock().page(va.vpn()).is_some()
    }

    /// 在持锁状态下观察 `va` 所在的页；未登记时返回 `None`。
    pub fn with_page<R>(&self, va: Vaddr, f: impl FnOnce(&Page) -> R) -> Option<R> {
        self.inner.lock().page(va.vpn()).map(f)
    }

    /// 当前登记的页数。
    pub fn page_count(&self) -> usize {
        self.inner.lock().page_count()
    }
}

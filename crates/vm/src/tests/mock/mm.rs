//! 内存管理相关的 Mock 实现
//!
//! [`MockFramePool`] 是容量受限的物理页池：页来自宿主机堆并被
//! 泄漏为 `'static`，容量上限让驱逐路径在测试里可以被确定性地
//! 触发。[`MockPageTable`] 以 BTreeMap 模拟硬件页表，并提供
//! `user_read`/`user_write` 模拟用户访问——像 MMU 一样顺带置
//! ACCESSED / DIRTY 位。

use alloc::collections::btree_map::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::SpinLock;
use crate::addr::{Vaddr, Vpn};
use crate::config::PAGE_SIZE;
use crate::hw::{HwPageTable, PteFlags};
use crate::pool::FramePool;

/// 容量受限的物理页池
pub struct MockFramePool {
    inner: SpinLock<PoolInner>,
}

struct PoolInner {
    /// 归还待复用的页
    free: Vec<usize>,
    /// 已向宿主机堆要过的页数
    created: usize,
    /// 容量上限
    capacity: usize,
}

impl MockFramePool {
    /// 创建容量为 `capacity` 页的池。
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(MockFramePool {
            inner: SpinLock::new(PoolInner {
                free: Vec::new(),
                created: 0,
                capacity,
            }),
        })
    }

    /// 当前被借出的页数。
    pub fn in_use(&self) -> usize {
        let inner = self.inner.lock();
        inner.created - inner.free.len()
    }
}

impl FramePool for MockFramePool {
    fn alloc_page(&self) -> Option<usize> {
        let mut inner = self.inner.lock();
        if let Some(kva) = inner.free.pop() {
            return Some(kva);
        }
        if inner.created < inner.capacity {
            inner.created += 1;
            // 泄漏一页宿主机内存充当物理页
            let page: &'static mut [u8] = alloc::vec![0u8; PAGE_SIZE].leak();
            return Some(page.as_mut_ptr() as usize);
        }
        None
    }

    fn free_page(&self, kva: usize) {
        let mut inner = self.inner.lock();
        debug_assert!(!inner.free.contains(&kva), "free_page: 检测到重复释放");
        inner.free.push(kva);
    }
}

/// 硬件页表的 Mock 实现
pub struct MockPageTable {
    entries: SpinLock<BTreeMap<usize, MockEntry>>,
}

#[derive(Clone, Copy)]
struct MockEntry {
    kva: usize,
    flags: PteFlags,
}

impl MockPageTable {
    /// 创建空页表。
    pub fn new() -> Self {
        MockPageTable {
            entries: SpinLock::new(BTreeMap::new()),
        }
    }

    /// `va` 当前是否有映射。
    pub fn mapped(&self, va: usize) -> bool {
        let vpn = Vaddr::new(va).vpn();
        self.entries.lock().contains_key(&vpn.as_usize())
    }

    /// 模拟用户读：读出一个字节并置 ACCESSED。未映射返回 `None`。
    pub fn user_read(&self, va: usize) -> Option<u8> {
        let vpn = Vaddr::new(va).vpn();
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&vpn.as_usize())?;
        entry.flags |= PteFlags::ACCESSED;
        let ptr = (entry.kva + Vaddr::new(va).page_offset()) as *const u8;
        // SAFETY: kva 由 MockFramePool 泄漏的页提供，在测试期间始终有效
        Some(unsafe { ptr.read() })
    }

    /// 模拟用户写：写入一个字节并置 ACCESSED | DIRTY。
    /// 未映射或映射只读时返回 `false`（真实硬件会触发页错误）。
    pub fn user_write(&self, va: usize, byte: u8) -> bool {
        let vpn = Vaddr::new(va).vpn();
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&vpn.as_usize()) else {
            return false;
        };
        if !entry.flags.contains(PteFlags::WRITABLE) {
            return false;
        }
        entry.flags |= PteFlags::ACCESSED | PteFlags::DIRTY;
        let ptr = (entry.kva + Vaddr::new(va).page_offset()) as *mut u8;
        // SAFETY: 同 user_read
        unsafe { ptr.write(byte) };
        true
    }
}

impl Default for MockPageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HwPageTable for MockPageTable {
    fn map(&self, vpn: Vpn, kva: usize, flags: PteFlags) -> bool {
        self.entries
            .lock()
            .insert(vpn.as_usize(), MockEntry { kva, flags });
        true
    }

    fn unmap(&self, vpn: Vpn) {
        self.entries.lock().remove(&vpn.as_usize());
    }

    fn walk(&self, vpn: Vpn) -> Option<(usize, PteFlags)> {
        self.entries
            .lock()
            .get(&vpn.as_usize())
            .map(|e| (e.kva, e.flags))
    }

    fn update_flags(&self, vpn: Vpn, flags: PteFlags) -> bool {
        match self.entries.lock().get_mut(&vpn.as_usize()) {
            Some(entry) => {
                entry.flags = flags;
                true
            }
            None => false,
        }
    }
}

/// 总是拒绝建立映射的页表，用于映射安装失败路径。
pub struct FailingPageTable;

impl HwPageTable for FailingPageTable {
    fn map(&self, _vpn: Vpn, _kva: usize, _flags: PteFlags) -> bool {
        false
    }

    fn unmap(&self, _vpn: Vpn) {}

    fn walk(&self, _vpn: Vpn) -> Option<(usize, PteFlags)> {
        None
    }

    fn update_flags(&self, _vpn: Vpn, _flags: PteFlags) -> bool {
        false
    }
}

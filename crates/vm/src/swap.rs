//! 交换空间管理
//!
//! 交换设备被划分为一页大小的交换槽，槽的占用状态用位图跟踪：
//! 每个 bit 对应一个槽（0=空闲，1=已占用），某 bit 置位当且仅当
//! 恰好一个换出页持有该槽。
//!
//! 位图自身的改动在自旋锁内完成；扇区 I/O 一律在锁外进行，
//! 慢速设备不会让无关的槽分配排队。
//!
//! ## 分配策略
//!
//! 与物理帧位图相同的做法：从上次分配位置的提示（hint）开始，
//! 利用 `trailing_zeros` 在 u64 字内定位第一个空闲位；
//! 释放直接清位，O(1)，被释放的槽号立即可复用。

use crate::config::{PAGE_SIZE, SECTOR_SIZE, SECTORS_PER_PAGE};
use crate::error::{VmError, VmResult};
use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::SpinLock;

/// 交换块设备
///
/// 扇区粒度的读写契约，由设备驱动层实现。返回 `false` 表示 I/O
/// 失败，调用方会将其上抛为 [`VmError::DiskIo`]，不会静默吞掉。
pub trait SectorDevice: Send + Sync {
    /// 读取一个扇区到 `buf`（`buf.len()` 必须等于扇区大小）
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> bool;

    /// 将 `buf` 写入一个扇区
    fn write_sector(&self, sector: usize, buf: &[u8]) -> bool;

    /// 设备总扇区数
    fn sector_count(&self) -> usize;
}

/// 槽位图
struct SlotSet {
    /// 位图数据（u64 字存储，便于按字跳过全满区域）
    words: Vec<u64>,
    /// 槽总数
    slots: usize,
    /// 已占用的槽数
    used: usize,
    /// 上次分配位置提示
    hint: usize,
}

impl SlotSet {
    fn new(slots: usize) -> Self {
        SlotSet {
            words: alloc::vec![0u64; slots.div_ceil(64)],
            slots,
            used: 0,
            hint: 0,
        }
    }

    fn alloc(&mut self) -> Option<usize> {
        let words = self.words.len();
        for offset in 0..words {
            let idx = (self.hint + offset) % words;
            let word = self.words[idx];
            if word == u64::MAX {
                continue;
            }
            let bit = (!word).trailing_zeros() as usize;
            let slot = idx * 64 + bit;
            if slot >= self.slots {
                continue;
            }
            self.words[idx] |= 1u64 << bit;
            self.used += 1;
            self.hint = idx;
            return Some(slot);
        }
        None
    }

    fn free(&mut self, slot: usize) {
        debug_assert!(slot < self.slots, "free_slot: 槽号越界");
        let (idx, bit) = (slot / 64, slot % 64);
        debug_assert!(
            self.words[idx] & (1u64 << bit) != 0,
            "free_slot: 检测到重复释放"
        );
        self.words[idx] &= !(1u64 << bit);
        self.used -= 1;
    }
}

/// 交换空间管理器
///
/// 持有交换设备句柄和槽位图。槽的容量在构造时由设备容量决定，
/// 之后不再变化。
pub struct SwapSpace {
    device: Arc<dyn SectorDevice>,
    set: SpinLock<SlotSet>,
}

impl SwapSpace {
    /// 在给定交换设备上创建管理器。
    /// 槽数 = 设备扇区数 / 每页扇区数（不足一页的尾部扇区弃用）。
    pub fn new(device: Arc<dyn SectorDevice>) -> Self {
        let slots = device.sector_count() / SECTORS_PER_PAGE;
        SwapSpace {
            device,
            set: SpinLock::new(SlotSet::new(slots)),
        }
    }

    /// 槽总数。
    pub fn slot_count(&self) -> usize {
        self.set.lock().slots
    }

    /// 当前被占用的槽数。
    pub fn used_slots(&self) -> usize {
        self.set.lock().used
    }

    /// 分配一个空闲槽。
    ///
    /// 交换槽耗尽没有次级后备存储，[`VmError::SwapExhausted`]
    /// 对本层而言是致命的，由调用链顶端决定终止进程还是停机。
    pub fn alloc_slot(&self) -> VmResult<usize> {
        self.set.lock().alloc().ok_or(VmError::SwapExhausted)
    }

    /// 释放一个槽，槽号立即可复用。
    pub fn free_slot(&self, slot: usize) {
        self.set.lock().free(slot);
    }

    /// 将一页内容写入槽。调用方必须持有该槽。
    ///
    /// 传输以 [`SECTORS_PER_PAGE`] 次连续扇区写完成；任何一个扇区
    /// 失败都会上抛 [`VmError::DiskIo`]，不存在部分成功被掩盖的情况。
    pub fn write_page(&self, slot: usize, page: &[u8]) -> VmResult<()> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let base = slot * SECTORS_PER_PAGE;
        for i in 0..SECTORS_PER_PAGE {
            let buf = &page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            if !self.device.write_sector(base + i, buf) {
                log::error!("swap: 槽 {} 扇区 {} 写入失败", slot, base + i);
                return Err(VmError::DiskIo);
            }
        }
        Ok(())
    }

    /// 从槽读回一页内容。调用方必须持有该槽。
    pub fn read_page(&self, slot: usize, page: &mut [u8]) -> VmResult<()> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let base = slot * SECTORS_PER_PAGE;
        for i in 0..SECTORS_PER_PAGE {
            let buf = &mut page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            if !self.device.read_sector(base + i, buf) {
                log::error!("swap: 槽 {} 扇区 {} 读取失败", slot, base + i);
                return Err(VmError::DiskIo);
            }
        }
        Ok(())
    }
}

//! 内存模拟交换设备

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use sync::SpinLock;
use crate::config::SECTOR_SIZE;
use crate::swap::SectorDevice;

/// 内存模拟的扇区设备
///
/// 用于交换路径的测试；可切换到"一律失败"模式验证 I/O 错误上抛。
pub struct MockSectorDevice {
    data: SpinLock<Vec<u8>>,
    failing: AtomicBool,
}

impl MockSectorDevice {
    /// 创建容量为 `sectors` 个扇区的设备。
    pub fn new(sectors: usize) -> Arc<Self> {
        Arc::new(MockSectorDevice {
            data: SpinLock::new(alloc::vec![0u8; sectors * SECTOR_SIZE]),
            failing: AtomicBool::new(false),
        })
    }

    /// 打开/关闭故障注入。
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// 取出设备内容的副本（用于断言）。
    pub fn raw_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl SectorDevice for MockSectorDevice {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> bool {
        if self.failing.load(Ordering::Relaxed) || buf.len() != SECTOR_SIZE {
            return false;
        }
        let data = self.data.lock();
        let offset = sector * SECTOR_SIZE;
        if offset + SECTOR_SIZE > data.len() {
            return false;
        }
        buf.copy_from_slice(&data[offset..offset + SECTOR_SIZE]);
        true
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) -> bool {
        if self.failing.load(Ordering::Relaxed) || buf.len() != SECTOR_SIZE {
            return false;
        }
        let mut data = self.data.lock();
        let offset = sector * SECTOR_SIZE;
        if offset + SECTOR_SIZE > data.len() {
            return false;
        }
        data[offset..offset + SECTOR_SIZE].copy_from_slice(buf);
        true
    }

    fn sector_count(&self) -> usize {
        self.data.lock().len() / SECTOR_SIZE
    }
}

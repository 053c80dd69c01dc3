//! 内存模拟文件

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use sync::SpinLock;
use crate::file::VmFile;

/// 内存模拟的文件
///
/// 读越过末尾时短读；写越过末尾时扩展文件。可注入写失败。
pub struct MockVmFile {
    data: SpinLock<Vec<u8>>,
    fail_writes: AtomicBool,
}

impl MockVmFile {
    /// 以给定内容创建文件。
    pub fn with_content(content: &[u8]) -> Arc<Self> {
        Arc::new(MockVmFile {
            data: SpinLock::new(content.to_vec()),
            fail_writes: AtomicBool::new(false),
        })
    }

    /// 打开/关闭写故障注入。
    pub fn set_fail_writes(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::Relaxed);
    }

    /// 取出文件内容的副本（用于断言）。
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl VmFile for MockVmFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = core::cmp::min(buf.len(), data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(-5);
        }
        let mut data = self.data.lock();
        let end = offset + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn length(&self) -> usize {
        self.data.lock().len()
    }
}

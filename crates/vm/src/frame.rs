//! 物理帧注册表与驱逐
//!
//! 注册表是全进程共享的：所有地址空间当前持有的物理帧都登记在同
//! 一张表里，插入、摘除、受害者扫描由一把自旋锁串行化。锁只保护
//! 表本身的改动；换出涉及的磁盘传输一律在锁外进行，慢速磁盘不会
//! 让无关的缺页排队。
//!
//! ## 保留（reserved）标志
//!
//! 受害者帧在放锁之前置位 reserved，之后任何并发的分配者都看不到
//! 它；驱逐完成、新占有者提交时才清除。这保证一个帧不可能同时被
//! 两个驱逐者选中，也不可能在在途驱逐期间被复用。
//!
//! ## 受害者选择
//!
//! 时钟算法：指针扫过注册表，第一圈对 ACCESSED 置位的帧清位放行
//! （第二次机会），第二圈选中第一个未被再次访问的帧。两圈之内必
//! 然终止；扫描只读取硬件访问位，不会在持表锁时再去取任何补充页
//! 表锁。
//!
//! ## 句柄
//!
//! 页与帧互相以非占有句柄引用：页记 [`FrameId`]，帧记（地址空间，
//! 页码）。双方各由自己的拥有者集合管理，销毁一方不会连带销毁另
//! 一方。

use crate::addr::Vpn;
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::hw::HwPageTable;
use crate::page;
use crate::pool::FramePool;
use crate::space::MemorySpace;
use crate::swap::SwapSpace;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::hint;
use core::sync::atomic::{AtomicUsize, Ordering};
use sync::SpinLock;

/// 物理帧的非占有句柄（注册表内的槽位下标）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId(pub(crate) usize);

/// 帧的当前占有者：哪个地址空间的哪一页
pub(crate) struct Occupant<PT: HwPageTable> {
    pub(crate) space: Arc<MemorySpace<PT>>,
    pub(crate) vpn: Vpn,
}

impl<PT: HwPageTable> Clone for Occupant<PT> {
    fn clone(&self) -> Self {
        Occupant {
            space: self.space.clone(),
            vpn: self.vpn,
        }
    }
}

/// 注册表中的一个物理帧
struct Frame<PT: HwPageTable> {
    /// 内核可访问地址
    kva: usize,
    /// 当前绑定的页；一个帧至多绑定一页，一页至多绑定一个帧
    occupant: Option<Occupant<PT>>,
    /// 在途驱逐/填充保留中，受害者扫描不可见
    reserved: bool,
}

/// 注册表主体
struct Frames<PT: HwPageTable> {
    slots: Vec<Option<Frame<PT>>>,
    /// 可复用的空槽位下标
    free: Vec<usize>,
    /// 时钟指针
    clock: usize,
}

impl<PT: HwPageTable> Frames<PT> {
    fn insert(&mut self, frame: Frame<PT>) -> FrameId {
        if let Some(idx) = self.free.pop() {
            debug_assert!(self.slots[idx].is_none());
            self.slots[idx] = Some(frame);
            FrameId(idx)
        } else {
            self.slots.push(Some(frame));
            FrameId(self.slots.len() - 1)
        }
    }

    fn frame_mut(&mut self, id: FrameId) -> &mut Frame<PT> {
        self.slots[id.0].as_mut().expect("帧句柄无效")
    }

    /// 时钟扫描选出一个受害者并将其置为 reserved。
    /// 返回 (句柄, 占有者, kva)；全部不可驱逐时返回 None。
    fn pick_victim(&mut self) -> Option<(FrameId, Occupant<PT>, usize)> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }
        for pass in 0..2 {
            for _ in 0..n {
                let idx = self.clock;
                self.clock = (self.clock + 1) % n;
                let Some(frame) = self.slots[idx].as_mut() else {
                    continue;
                };
                if frame.reserved {
                    continue;
                }
                let Some(occ) = frame.occupant.clone() else {
                    continue;
                };
                // 第一圈：给访问位第二次机会
                if pass == 0 && occ.space.hw().test_and_clear_accessed(occ.vpn) {
                    continue;
                }
                frame.reserved = true;
                return Some((FrameId(idx), occ, frame.kva));
            }
        }
        None
    }
}

/// 全局物理帧注册表
pub struct FrameTable<PT: HwPageTable> {
    inner: SpinLock<Frames<PT>>,
    evictions: AtomicUsize,
}

impl<PT: HwPageTable> FrameTable<PT> {
    /// 创建空注册表。
    pub fn new() -> Self {
        FrameTable {
            inner: SpinLock::new(Frames {
                slots: Vec::new(),
                free: Vec::new(),
                clock: 0,
            }),
            evictions: AtomicUsize::new(0),
        }
    }

    /// 累计发生过的驱逐次数。
    pub fn evictions(&self) -> usize {
        self.evictions.load(Ordering::Relaxed)
    }

    /// 当前登记在表中的帧数。
    pub fn frames_in_use(&self) -> usize {
        let table = self.inner.lock();
        table.slots.iter().filter(|s| s.is_some()).count()
    }

    /// 帧的内核可访问地址。
    pub(crate) fn kva(&self, id: FrameId) -> usize {
        self.inner.lock().frame_mut(id).kva
    }

    /// 取得一个处于保留状态的帧：物理池有空闲页则直接登记，
    /// 否则驱逐一个受害者并复用其物理页。
    ///
    /// 返回 (句柄, kva)。调用方填充完内容后必须以
    /// [`commit`](Self::commit) 绑定占有者，或以
    /// [`discard`](Self::discard) 归还。
    pub(crate) fn acquire(
        &self,
        pool: &dyn FramePool,
        swap: &SwapSpace,
    ) -> VmResult<(FrameId, usize)> {
        if let Some(kva) = pool.alloc_page() {
            let mut table = self.inner.lock();
            let id = table.insert(Frame {
                kva,
                occupant: None,
                reserved: true,
            });
            return Ok((id, kva));
        }

        // 池已耗尽：驱逐。受害者在锁内保留、锁外换出。
        let (id, occupant, kva) = {
            let mut table = self.inner.lock();
            match table.pick_victim() {
                Some(victim) => victim,
                None => return Err(VmError::OutOfFrames),
            }
        };
        match evict_one(&occupant, id, kva, swap) {
            Ok(evicted) => {
                if evicted {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    log::debug!(
                        "frame: 驱逐 space {} vpn {:#x}",
                        occupant.space.id(),
                        occupant.vpn.as_usize()
                    );
                }
                // 占有者解除绑定，帧保持保留状态交给调用方
                self.inner.lock().frame_mut(id).occupant = None;
                Ok((id, kva))
            }
            Err(e) => {
                // 驱逐失败（交换槽耗尽、I/O 错误）：受害页保持驻留，
                // 帧归还给它，错误沿调用链上抛。
                self.inner.lock().frame_mut(id).reserved = false;
                Err(e)
            }
        }
    }

    /// 绑定新占有者并结束保留状态。
    pub(crate) fn commit(&self, id: FrameId, occupant: Occupant<PT>) {
        let mut table = self.inner.lock();
        let frame = table.frame_mut(id);
        debug_assert!(frame.reserved, "commit: 帧未处于保留状态");
        frame.occupant = Some(occupant);
        frame.reserved = false;
    }

    /// 归还一个由 [`acquire`](Self::acquire) 取得但最终未提交的帧。
    pub(crate) fn discard(&self, id: FrameId, pool: &dyn FramePool) {
        let kva = {
            let mut table = self.inner.lock();
            debug_assert!(table.frame_mut(id).reserved);
            let frame = table.slots[id.0].take().expect("帧句柄无效");
            table.free.push(id.0);
            frame.kva
        };
        pool.free_page(kva);
    }

    /// 释放一个帧：从注册表摘除并把物理页归还给池。
    /// 调用方负责先解除硬件映射。
    ///
    /// 若帧正被在途驱逐者保留，只解除占有者绑定——物理页留给
    /// 保留者复用，驱逐者会发现页已消失并直接接管。
    pub(crate) fn release(&self, id: FrameId, pool: &dyn FramePool) {
        let kva = {
            let mut table = self.inner.lock();
            let frame = table.frame_mut(id);
            if frame.reserved {
                frame.occupant = None;
                return;
            }
            let frame = table.slots[id.0].take().expect("帧句柄无效");
            table.free.push(id.0);
            frame.kva
        };
        pool.free_page(kva);
    }
}

impl<PT: HwPageTable> Default for FrameTable<PT> {
    fn default() -> Self {
        Self::new()
    }
}

/// 对单个受害者执行换出。进入时帧已保留，不持有任何锁。
///
/// 返回 `Ok(true)` 表示执行了换出，`Ok(false)` 表示受害页已被并发
/// 移除（帧已空置，直接接管即可）。
fn evict_one<PT: HwPageTable>(
    occupant: &Occupant<PT>,
    id: FrameId,
    kva: usize,
    swap: &SwapSpace,
) -> VmResult<bool> {
    let space = &occupant.space;
    let vpn = occupant.vpn;

    // 第一步：锁定受害者的补充页表，摘取驱逐计划并标记 busy
    let step = loop {
        let mut spt = space.lock_inner();
        let Some(page) = spt.page_mut(vpn) else {
            // 页在我们保留帧之后被移除，帧已空置
            return Ok(false);
        };
        if page.frame() != Some(id) {
            return Ok(false);
        }
        if page.busy {
            // 占有者正被写回/移除，等它完成
            drop(spt);
            hint::spin_loop();
            continue;
        }
        page.busy = true;
        break page.evict_plan(space.hw().dirty(vpn));
    };

    // 第二步：锁外执行换出 I/O
    let slot = match page::run_evict(&step, kva, swap) {
        Ok(slot) => slot,
        Err(e) => {
            // 回滚：受害页保持驻留
            let mut spt = space.lock_inner();
            if let Some(page) = spt.page_mut(vpn) {
                page.busy = false;
            }
            return Err(e);
        }
    };

    // 第三步：提交换出状态，随后解除硬件映射
    let mut spt = space.lock_inner();
    let page = spt.page_mut(vpn).expect("busy 页在驱逐提交前消失");
    page.commit_evict(slot);
    space.hw().unmap(vpn);
    page.busy = false;
    Ok(true)
}

/// 以字节切片访问帧内容。
///
/// # Safety
/// `kva` 必须指向一个有效物理页，且调用期间无并发写。
pub(crate) unsafe fn frame_bytes<'a>(kva: usize) -> &'a [u8] {
    unsafe { core::slice::from_raw_parts(kva as *const u8, PAGE_SIZE) }
}

/// 以可变字节切片访问帧内容。
///
/// # Safety
/// `kva` 必须指向一个有效物理页，且当前线程独占访问。
pub(crate) unsafe fn frame_bytes_mut<'a>(kva: usize) -> &'a mut [u8] {
    unsafe { core::slice::from_raw_parts_mut(kva as *mut u8, PAGE_SIZE) }
}

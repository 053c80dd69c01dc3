//! 子系统入口
//!
//! [`VmManager`] 拥有物理帧注册表、交换空间和物理页池句柄，是内核
//! 其余部分使用虚拟内存的唯一入口。它不是全局变量：内核显式构造
//! 一份并按引用传给每一次分配/驱逐调用。
//!
//! 对外暴露的操作（缺页处理与 mmap 见兄弟模块）：
//!
//! - [`alloc_page`](VmManager::alloc_page) 登记延迟填充的页
//! - [`claim`](VmManager::claim) 立即解决某页的驻留
//! - [`remove_page`](VmManager::remove_page) 移除单页并释放资源
//! - [`copy_space`](VmManager::copy_space) fork 语义的整表复制
//! - [`destroy_space`](VmManager::destroy_space) 进程退出时的整表销毁

use crate::addr::{Vaddr, Vpn};
use crate::config::{KERNEL_BASE, PAGE_SIZE};
use crate::error::{VmError, VmResult};
use crate::frame::{self, FrameTable, Occupant};
use crate::hw::{HwPageTable, PteFlags};
use crate::page::{self, Page, PageInit, PageKind, TargetKind};
use crate::pool::FramePool;
use crate::space::MemorySpace;
use crate::swap::{SectorDevice, SwapSpace};
use alloc::sync::Arc;
use core::hint;

/// 虚拟内存子系统
pub struct VmManager<PT: HwPageTable> {
    frames: FrameTable<PT>,
    swap: SwapSpace,
    pool: Arc<dyn FramePool>,
}

impl<PT: HwPageTable> VmManager<PT> {
    /// 在给定的物理页池和交换设备上创建子系统。
    pub fn new(pool: Arc<dyn FramePool>, swap_device: Arc<dyn SectorDevice>) -> Self {
        VmManager {
            frames: FrameTable::new(),
            swap: SwapSpace::new(swap_device),
            pool,
        }
    }

    /// 物理帧注册表。
    pub fn frames(&self) -> &FrameTable<PT> {
        &self.frames
    }

    /// 交换空间。
    pub fn swap(&self) -> &SwapSpace {
        &self.swap
    }

    /// 登记一个处于 Uninit 状态的页，不分配物理帧。
    ///
    /// `va` 向下取整到页边界作为键。目标地址已被占用时返回
    /// [`VmError::AddressConflict`]，不产生任何副作用。
    pub fn alloc_page(
        &self,
        space: &Arc<MemorySpace<PT>>,
        va: Vaddr,
        writable: bool,
        target: TargetKind,
        init: Option<PageInit>,
    ) -> VmResult<()> {
        if va.as_usize() >= KERNEL_BASE {
            return Err(VmError::InvalidArgument);
        }
        let vpn = va.vpn();
        space
            .lock_inner()
            .insert(Page::new_uninit(vpn, writable, target, init))
    }

    /// 立即解决 `va` 上已登记页的驻留（必要时驱逐他帧）。
    pub fn claim(&self, space: &Arc<MemorySpace<PT>>, va: Vaddr) -> VmResult<()> {
        self.claim_vpn(space, va.vpn())
    }

    /// claim 的页码版本。对已驻留的页幂等。
    pub(crate) fn claim_vpn(&self, space: &Arc<MemorySpace<PT>>, vpn: Vpn) -> VmResult<()> {
        // 第一步：锁内摘取填充计划并标记 busy
        let plan = loop {
            let mut spt = space.lock_inner();
            let Some(page) = spt.page_mut(vpn) else {
                return Err(VmError::NotMapped);
            };
            if page.busy {
                // 另一线程正在迁移此页，等它完成后重新检查
                drop(spt);
                hint::spin_loop();
                continue;
            }
            if page.is_resident() {
                return Ok(());
            }
            page.busy = true;
            break page.populate_plan();
        };

        let clear_busy = || {
            if let Some(page) = space.lock_inner().page_mut(vpn) {
                page.busy = false;
            }
        };

        // 第二步：取得保留帧并在锁外填充内容
        let (id, kva) = match self.frames.acquire(self.pool.as_ref(), &self.swap) {
            Ok(got) => got,
            Err(e) => {
                clear_busy();
                return Err(e);
            }
        };
        if let Err(e) = page::run_populate(&plan, kva, &self.swap) {
            self.frames.discard(id, self.pool.as_ref());
            clear_busy();
            return Err(e);
        }

        // 第三步：锁内提交——安装硬件映射、绑定帧、完成类型转变
        let freed_slot = {
            let mut spt = space.lock_inner();
            let writable = spt.page(vpn).expect("busy 页在提交前消失").writable();
            let mut flags = PteFlags::USER;
            if writable {
                flags |= PteFlags::WRITABLE;
            }
            if !space.hw().map(vpn, kva, flags) {
                if let Some(page) = spt.page_mut(vpn) {
                    page.busy = false;
                }
                drop(spt);
                self.frames.discard(id, self.pool.as_ref());
                return Err(VmError::MapFailed);
            }
            spt.page_mut(vpn)
                .expect("busy 页在提交前消失")
                .commit_populate(id)
        };
        if let Some(slot) = freed_slot {
            self.swap.free_slot(slot);
        }
        self.frames.commit(
            id,
            Occupant {
                space: space.clone(),
                vpn,
            },
        );
        // 占有者登记完成后才解除 busy：并发的移除者在此之前只能等待，
        // 不会在帧尚处保留状态时把它从注册表里摘走
        clear_busy();
        Ok(())
    }

    /// 移除 `va` 上的页并释放其持有的一切资源
    /// （驻留帧、交换槽；脏的文件内容先写回）。
    pub fn remove_page(&self, space: &Arc<MemorySpace<PT>>, va: Vaddr) -> VmResult<()> {
        self.detach_vpn(space, va.vpn(), true)
    }

    /// 移除单页。`write_back` 为 false 时跳过脏文件写回
    /// （销毁路径在写回失败后用它强制回收资源）。
    pub(crate) fn detach_vpn(
        &self,
        space: &Arc<MemorySpace<PT>>,
        vpn: Vpn,
        write_back: bool,
    ) -> VmResult<()> {
        // 锁内摘取写回任务并标记 busy，挡住并发的驱逐者
        let writeback = loop {
            let mut spt = space.lock_inner();
            let Some(page) = spt.page_mut(vpn) else {
                return Err(VmError::NotMapped);
            };
            if page.busy {
                drop(spt);
                hint::spin_loop();
                continue;
            }
            page.busy = true;
            break if write_back {
                page.detach_writeback(space.hw().dirty(vpn))
            } else {
                None
            };
        };

        // 锁外写回脏的文件内容
        if let Some((file, offset, len)) = writeback {
            let id = space
                .lock_inner()
                .page(vpn)
                .and_then(Page::frame)
                .expect("busy 页在写回期间消失");
            // SAFETY: busy 挡住了并发迁移，帧内容在写回期间稳定
            let bytes = unsafe { frame::frame_bytes(self.frames.kva(id)) };
            let written = file
                .write_at(offset, &bytes[..len])
                .map_err(|_| VmError::FileIo);
            match written {
                Ok(n) if n == len => {}
                _ => {
                    // 写回失败必须上报；页保持原状，由调用方决定后续
                    if let Some(page) = space.lock_inner().page_mut(vpn) {
                        page.busy = false;
                    }
                    log::error!(
                        "vm: space {} vpn {:#x} 脏页写回失败",
                        space.id(),
                        vpn.as_usize()
                    );
                    return Err(VmError::FileIo);
                }
            }
        }

        // 锁内提交移除；帧与交换槽在锁外归还
        let removed = {
            let mut spt = space.lock_inner();
            let page = spt.remove(vpn).expect("busy 页在移除前消失");
            if page.is_resident() {
                space.hw().unmap(vpn);
            }
            page
        };
        if let Some(id) = removed.frame() {
            self.frames.release(id, self.pool.as_ref());
        }
        if let PageKind::Anon { slot: Some(slot) } = removed.kind() {
            self.swap.free_slot(*slot);
        }
        Ok(())
    }

    /// fork 语义的整表复制：`src` 的每一页在 `dst` 中得到一个等价页。
    ///
    /// 已驻留的页把内容复制进新分配的帧（不共享帧——这是本设计
    /// 替代写时复制的选择）；换出的匿名页从交换槽读回并在 `dst`
    /// 中驻留；被驱逐的文件页只复制描述符（内容可从文件恢复）；
    /// Uninit 页连同初始化器一起按原样登记。
    ///
    /// 调用方保证 `src` 所属进程在复制期间不再运行（fork 语义）。
    pub fn copy_space(
        &self,
        dst: &Arc<MemorySpace<PT>>,
        src: &Arc<MemorySpace<PT>>,
    ) -> VmResult<()> {
        let vpns = src.lock_inner().vpns();
        let mut buf = alloc::vec![0u8; PAGE_SIZE];

        for vpn in vpns {
            // 锁内快照源页；驻留页的内容顺带拷进缓冲（内存拷贝，非 I/O）
            let snapshot = loop {
                let spt = src.lock_inner();
                let Some(page) = spt.page(vpn) else {
                    break None;
                };
                if page.busy {
                    drop(spt);
                    hint::spin_loop();
                    continue;
                }
                if let Some(id) = page.frame() {
                    // SAFETY: 持 SPT 锁期间该页不会迁移
                    buf.copy_from_slice(unsafe { frame::frame_bytes(self.frames.kva(id)) });
                }
                break Some(snapshot_of(page));
            };
            let Some(snapshot) = snapshot else { continue };

            match snapshot {
                PageSnapshot::Uninit {
                    writable,
                    target,
                    init,
                } => {
                    dst.lock_inner()
                        .insert(Page::new_uninit(vpn, writable, target, init))?;
                }
                PageSnapshot::FileEvicted {
                    writable,
                    file,
                    offset,
                    len,
                } => {
                    dst.lock_inner().insert(Page::new_with_kind(
                        vpn,
                        writable,
                        PageKind::File { file, offset, len },
                    ))?;
                }
                PageSnapshot::AnonSwapped { writable, slot } => {
                    // 从交换槽读出源内容（锁外 I/O），子页直接驻留
                    self.swap.read_page(slot, &mut buf)?;
                    self.install_copy(dst, vpn, writable, PageKind::Anon { slot: None }, &buf)?;
                }
                PageSnapshot::Resident { writable, kind } => {
                    self.install_copy(dst, vpn, writable, kind, &buf)?;
                }
            }
        }

        // mmap 区域索引一并复制，子进程的 munmap 才能按地址定位
        let mmaps = src.lock_inner().mmaps.clone();
        dst.lock_inner().mmaps = mmaps;
        Ok(())
    }

    /// 在 `dst` 中登记一个立即驻留的页，内容来自 `bytes`。
    fn install_copy(
        &self,
        dst: &Arc<MemorySpace<PT>>,
        vpn: Vpn,
        writable: bool,
        kind: PageKind,
        bytes: &[u8],
    ) -> VmResult<()> {
        dst.lock_inner()
            .insert(Page::new_with_kind(vpn, writable, kind))?;

        let (id, kva) = self.frames.acquire(self.pool.as_ref(), &self.swap)?;
        // SAFETY: 帧处于保留状态，当前线程独占
        unsafe { frame::frame_bytes_mut(kva) }.copy_from_slice(bytes);

        {
            let mut spt = dst.lock_inner();
            let mut flags = PteFlags::USER;
            if writable {
                flags |= PteFlags::WRITABLE;
            }
            if !dst.hw().map(vpn, kva, flags) {
                spt.remove(vpn);
                drop(spt);
                self.frames.discard(id, self.pool.as_ref());
                return Err(VmError::MapFailed);
            }
            spt.page_mut(vpn).expect("复制目标页消失").frame = Some(id);
        }
        self.frames.commit(
            id,
            Occupant {
                space: dst.clone(),
                vpn,
            },
        );
        Ok(())
    }

    /// 进程退出时销毁整个地址空间：写回所有脏的文件内容，
    /// 释放所有帧和交换槽，清空补充页表。
    ///
    /// 某一页写回失败时记下首个错误、强制回收其余资源，最后把
    /// 错误上抛——内容丢失必须上报，但资源不能泄漏。
    pub fn destroy_space(&self, space: &Arc<MemorySpace<PT>>) -> VmResult<()> {
        let vpns = space.lock_inner().vpns();
        let mut first_err = None;
        for vpn in vpns {
            match self.detach_vpn(space, vpn, true) {
                Ok(()) | Err(VmError::NotMapped) => {}
                Err(e) => {
                    first_err.get_or_insert(e);
                    let _ = self.detach_vpn(space, vpn, false);
                }
            }
        }
        space.lock_inner().mmaps.clear();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// 源页的锁外快照
enum PageSnapshot {
    Uninit {
        writable: bool,
        target: TargetKind,
        init: Option<PageInit>,
    },
    AnonSwapped {
        writable: bool,
        slot: usize,
    },
    FileEvicted {
        writable: bool,
        file: Arc<dyn crate::file::VmFile>,
        offset: usize,
        len: usize,
    },
    Resident {
        writable: bool,
        kind: PageKind,
    },
}

fn snapshot_of(page: &Page) -> PageSnapshot {
    let writable = page.writable();
    if page.is_resident() {
        // 驻留页在子空间中以同类型、全新帧再现；匿名页不带槽
        let kind = match page.kind() {
            PageKind::Anon { .. } => PageKind::Anon { slot: None },
            PageKind::File { file, offset, len } => PageKind::File {
                file: file.clone(),
                offset: *offset,
                len: *len,
            },
            PageKind::Uninit { .. } => unreachable!("Uninit 页不可能驻留"),
        };
        return PageSnapshot::Resident { writable, kind };
    }
    match page.kind() {
        PageKind::Uninit { target, init } => PageSnapshot::Uninit {
            writable,
            target: target.clone(),
            init: init.clone(),
        },
        PageKind::Anon { slot: Some(slot) } => PageSnapshot::AnonSwapped {
            writable,
            slot: *slot,
        },
        // 未换出且不驻留的匿名页：从未被填充过，等价于零填充的 Uninit
        PageKind::Anon { slot: None } => PageSnapshot::Uninit {
            writable,
            target: TargetKind::Anon,
            init: None,
        },
        PageKind::File { file, offset, len } => PageSnapshot::FileEvicted {
            writable,
            file: file.clone(),
            offset: *offset,
            len: *len,
        },
    }
}

//! 页描述符与按类型的行为
//!
//! 每个虚拟页用一个 [`Page`] 描述，类型标签 [`PageKind`] 携带各自的
//! 负载，换入/换出/销毁按标签分派：
//!
//! - [`Uninit`]：延迟初始化的占位。首次缺页时一次性转变为目标类型，
//!   转变是单向的。
//! - [`Anon`]：与文件无关的匿名页。换出时总是占用一个交换槽，
//!   内容只存在于内存或交换槽中。
//! - [`File`]：文件映射页。内容总可从文件恢复，因此从不占用交换槽：
//!   驱逐脏页等价于写回，驱逐干净页等价于直接丢弃。
//!
//! 状态机：`Uninit → {Anon, File}`（一次性）⇄ `Swapped`（可反复）。
//! 驻留与否由 `frame` 字段表达，匿名页的换出状态由 `slot` 表达。
//!
//! [`Uninit`]: PageKind::Uninit
//! [`Anon`]: PageKind::Anon
//! [`File`]: PageKind::File

use crate::addr::Vpn;
use crate::error::{VmError, VmResult};
use crate::file::VmFile;
use crate::frame::{self, FrameId};
use crate::swap::SwapSpace;
use alloc::sync::Arc;

/// 延迟初始化器
///
/// 首次缺页、默认填充完成之后对帧内容执行一次；返回 `false` 时
/// 本次缺页失败（进程将被终止）。捕获的环境即原设计中的不透明参数。
pub type PageInit = Arc<dyn Fn(&mut [u8]) -> bool + Send + Sync>;

/// Uninit 页将要成为的目标类型
#[derive(Clone)]
pub enum TargetKind {
    /// 匿名页：默认填充为全零
    Anon,
    /// 文件页：默认填充为文件内容，`len` 之后、页尾之前零填充
    File {
        /// 文件句柄（映射自己持有的一份）
        file: Arc<dyn VmFile>,
        /// 此页对应的文件字节偏移
        offset: usize,
        /// 此页覆盖的文件字节数（最后一个不满页小于页大小）
        len: usize,
    },
}

/// 页的类型标签与负载
pub enum PageKind {
    /// 尚未初始化，等待首次缺页
    Uninit {
        /// 首次缺页后成为的类型
        target: TargetKind,
        /// 可选的延迟初始化器，恰好执行一次
        init: Option<PageInit>,
    },
    /// 匿名页
    Anon {
        /// 换出后占用的交换槽；`None` 表示未换出
        slot: Option<usize>,
    },
    /// 文件映射页
    File {
        /// 文件句柄
        file: Arc<dyn VmFile>,
        /// 此页对应的文件字节偏移
        offset: usize,
        /// 此页覆盖的文件字节数
        len: usize,
    },
}

/// 虚拟页描述符
///
/// 由所属地址空间的补充页表独占拥有；`frame` 只是指向物理帧注册表
/// 的非占有句柄，销毁任何一方都不会连带销毁另一方。
pub struct Page {
    pub(crate) vpn: Vpn,
    pub(crate) writable: bool,
    pub(crate) frame: Option<FrameId>,
    /// 正处于需要 I/O 的状态迁移中（填充、换出、写回）。
    /// busy 期间页不可被移除，也不可被再次选作迁移对象。
    pub(crate) busy: bool,
    pub(crate) kind: PageKind,
}

/// 填充动作：在补充页表锁内摘取，在锁外执行
pub(crate) struct PopulatePlan {
    pub(crate) step: PopulateStep,
    pub(crate) init: Option<PageInit>,
}

/// 无锁执行的填充步骤
pub(crate) enum PopulateStep {
    /// 零填充（匿名页首次使用）
    Zero,
    /// 从文件读入 `len` 字节，其余零填充
    FileRead {
        file: Arc<dyn VmFile>,
        offset: usize,
        len: usize,
    },
    /// 从交换槽读回
    SwapRead { slot: usize },
}

/// 驱逐动作：同样在锁内摘取、锁外执行
pub(crate) enum EvictStep {
    /// 写入新分配的交换槽（匿名页）
    SwapOut,
    /// 写回文件（脏的文件页）
    WriteBack {
        file: Arc<dyn VmFile>,
        offset: usize,
        len: usize,
    },
    /// 直接丢弃（干净的文件页）
    Drop,
}

impl Page {
    /// 新建一个 Uninit 页。
    pub(crate) fn new_uninit(
        vpn: Vpn,
        writable: bool,
        target: TargetKind,
        init: Option<PageInit>,
    ) -> Self {
        Page {
            vpn,
            writable,
            frame: None,
            busy: false,
            kind: PageKind::Uninit { target, init },
        }
    }

    /// 新建一个给定类型的非驻留页（整表复制时使用）。
    pub(crate) fn new_with_kind(vpn: Vpn, writable: bool, kind: PageKind) -> Self {
        Page {
            vpn,
            writable,
            frame: None,
            busy: false,
            kind,
        }
    }

    /// 页码。
    pub fn vpn(&self) -> Vpn {
        self.vpn
    }

    /// 是否可写。
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// 当前驻留的帧句柄。
    pub fn frame(&self) -> Option<FrameId> {
        self.frame
    }

    /// 是否驻留在物理内存中。
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    /// 类型标签与负载。
    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    /// 摘取填充计划。调用方已确认页不驻留、不 busy。
    pub(crate) fn populate_plan(&self) -> PopulatePlan {
        debug_assert!(self.frame.is_none());
        match &self.kind {
            PageKind::Uninit { target, init } => {
                let step = match target {
                    TargetKind::Anon => PopulateStep::Zero,
                    TargetKind::File { file, offset, len } => PopulateStep::FileRead {
                        file: file.clone(),
                        offset: *offset,
                        len: *len,
                    },
                };
                PopulatePlan {
                    step,
                    init: init.clone(),
                }
            }
            PageKind::Anon { slot } => PopulatePlan {
                step: match slot {
                    // 从未换出过：首次使用，零填充
                    None => PopulateStep::Zero,
                    Some(slot) => PopulateStep::SwapRead { slot: *slot },
                },
                init: None,
            },
            PageKind::File { file, offset, len } => PopulatePlan {
                step: PopulateStep::FileRead {
                    file: file.clone(),
                    offset: *offset,
                    len: *len,
                },
                init: None,
            },
        }
    }

    /// 提交填充结果：完成 Uninit 转变并绑定帧。
    /// 返回需要归还的交换槽（匿名页换入后槽即空闲）。
    pub(crate) fn commit_populate(&mut self, frame: FrameId) -> Option<usize> {
        self.frame = Some(frame);
        let kind = core::mem::replace(&mut self.kind, PageKind::Anon { slot: None });
        let (kind, freed_slot) = match kind {
            // 单向转变：初始化器随 Uninit 负载一起丢弃，不会再执行
            PageKind::Uninit { target, .. } => (
                match target {
                    TargetKind::Anon => PageKind::Anon { slot: None },
                    TargetKind::File { file, offset, len } => {
                        PageKind::File { file, offset, len }
                    }
                },
                None,
            ),
            PageKind::Anon { slot } => (PageKind::Anon { slot: None }, slot),
            kind @ PageKind::File { .. } => (kind, None),
        };
        self.kind = kind;
        freed_slot
    }

    /// 摘取驱逐计划。`hw_dirty` 是硬件页表此刻的 DIRTY 位。
    pub(crate) fn evict_plan(&self, hw_dirty: bool) -> EvictStep {
        debug_assert!(self.frame.is_some());
        match &self.kind {
            PageKind::Anon { .. } => EvictStep::SwapOut,
            PageKind::File { file, offset, len } => {
                if hw_dirty && self.writable {
                    EvictStep::WriteBack {
                        file: file.clone(),
                        offset: *offset,
                        len: *len,
                    }
                } else {
                    EvictStep::Drop
                }
            }
            // Uninit 页从不驻留，不会成为驱逐对象
            PageKind::Uninit { .. } => unreachable!("evict_plan: Uninit 页不可能驻留"),
        }
    }

    /// 提交驱逐结果：解除帧绑定，匿名页记录其交换槽。
    pub(crate) fn commit_evict(&mut self, slot: Option<usize>) {
        self.frame = None;
        if let PageKind::Anon { slot: own } = &mut self.kind {
            debug_assert!(own.is_none(), "commit_evict: 槽被重复占用");
            *own = slot;
        } else {
            debug_assert!(slot.is_none());
        }
    }

    /// 移除前需要写回的内容：驻留、可写且硬件报告为脏的文件页。
    pub(crate) fn detach_writeback(
        &self,
        hw_dirty: bool,
    ) -> Option<(Arc<dyn VmFile>, usize, usize)> {
        if !self.is_resident() || !self.writable || !hw_dirty {
            return None;
        }
        match &self.kind {
            PageKind::File { file, offset, len } => Some((file.clone(), *offset, *len)),
            _ => None,
        }
    }
}

/// 在 `kva` 指向的帧上执行填充计划。不得持有任何锁调用。
pub(crate) fn run_populate(plan: &PopulatePlan, kva: usize, swap: &SwapSpace) -> VmResult<()> {
    // SAFETY: kva 指向一个保留状态的帧，当前线程独占
    let buf = unsafe { frame::frame_bytes_mut(kva) };
    match &plan.step {
        PopulateStep::Zero => buf.fill(0),
        PopulateStep::FileRead { file, offset, len } => {
            let read = file
                .read_at(*offset, &mut buf[..*len])
                .map_err(|_| VmError::FileIo)?;
            // 短读（越过文件末尾）以及映射长度之后的部分一律零填充
            buf[read..].fill(0);
        }
        PopulateStep::SwapRead { slot } => swap.read_page(*slot, buf)?,
    }
    if let Some(init) = &plan.init {
        if !init(buf) {
            return Err(VmError::InitFailed);
        }
    }
    Ok(())
}

/// 在 `kva` 指向的帧上执行驱逐计划，返回匿名页占用的新交换槽。
/// 不得持有任何锁调用。
pub(crate) fn run_evict(step: &EvictStep, kva: usize, swap: &SwapSpace) -> VmResult<Option<usize>> {
    // SAFETY: 帧已被保留，驱逐期间无人复用
    let buf = unsafe { frame::frame_bytes(kva) };
    match step {
        EvictStep::SwapOut => {
            let slot = swap.alloc_slot()?;
            if let Err(e) = swap.write_page(slot, buf) {
                swap.free_slot(slot);
                return Err(e);
            }
            Ok(Some(slot))
        }
        EvictStep::WriteBack { file, offset, len } => {
            let written = file
                .write_at(*offset, &buf[..*len])
                .map_err(|_| VmError::FileIo)?;
            if written != *len {
                log::error!(
                    "page: 写回不完整，offset={} 期望 {} 实际 {}",
                    offset,
                    len,
                    written
                );
                return Err(VmError::FileIo);
            }
            Ok(None)
        }
        EvictStep::Drop => Ok(None),
    }
}

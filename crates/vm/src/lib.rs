//! 虚拟内存子系统
//!
//! 为用户进程提供按需分页：延迟填充、匿名页、文件映射页，以及
//! 物理内存吃紧时的透明换出。
//!
//! # 模块组成
//!
//! - [`addr`]：虚拟地址与页码抽象
//! - [`space`]：地址空间与补充页表（SPT），页描述符的拥有者
//! - [`page`]：页描述符与 Uninit / Anon / File 三种类型行为
//! - [`frame`]：全局物理帧注册表与时钟驱逐
//! - [`swap`]：交换槽位图与页粒度的扇区传输
//! - [`manager`]：子系统入口 [`VmManager`]，缺页处理与 mmap 在
//!   其上以方法呈现
//!
//! 外部协作者以 trait 消费：物理页池（[`FramePool`]）、硬件页表
//! 驱动（[`HwPageTable`]）、交换块设备（[`SectorDevice`]）、文件
//! 句柄（[`VmFile`]）。
//!
//! # 并发模型
//!
//! 抢占式内核线程；缺页在出错线程的内核栈上同步解决，设备 I/O
//! 是唯一挂起点。三把锁——每空间的 SPT 锁、帧表锁、交换位图锁
//! ——都不会跨 I/O 持有：需要 I/O 的状态迁移一律"锁内摘计划、
//! 锁外做 I/O、锁内提交"，迁移中的页以 busy 标记挡住并发者，
//! 迁移中的帧以 reserved 标记挡住并发驱逐。

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod addr;
pub mod config;
pub mod error;
pub mod file;
pub mod frame;
pub mod hw;
pub mod manager;
pub mod page;
pub mod pool;
pub mod space;
pub mod swap;

mod fault;
mod mmap;

#[cfg(test)]
mod tests;

pub use addr::{Vaddr, Vpn, VpnRange};
pub use error::{VmError, VmResult};
pub use file::VmFile;
pub use frame::{FrameId, FrameTable};
pub use hw::{HwPageTable, PteFlags};
pub use manager::VmManager;
pub use page::{Page, PageInit, PageKind, TargetKind};
pub use pool::FramePool;
pub use space::MemorySpace;
pub use swap::{SectorDevice, SwapSpace};

//! 虚拟内存子系统的配置常量
//!
//! 扇区与页的比例在配置期固定；换入换出始终以
//! [`SECTORS_PER_PAGE`] 次连续扇区传输完成一页。

/// 页大小（字节）
pub const PAGE_SIZE: usize = 4096;

/// 交换设备的扇区大小（字节）
pub const SECTOR_SIZE: usize = 512;

/// 每页占用的扇区数
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// 内核地址空间起始。用户缺页落在此之上一律不可解决。
pub const KERNEL_BASE: usize = 0xC000_0000;

/// 用户栈顶（栈自此向下增长）
pub const USER_STACK_TOP: usize = KERNEL_BASE;

/// 用户栈允许增长到的最大尺寸
pub const USER_STACK_MAX_SIZE: usize = 0x10_0000;

/// 栈指针下方多远以内的访问仍视为压栈
/// （x86 的 PUSHA 一次最多在栈指针下方 32 字节处写入）
pub const STACK_PUSH_SLOP: usize = 32;

//! 错误类型
//!
//! 错误按处理策略分为三类：
//!
//! - **资源耗尽**（[`OutOfFrames`]、[`SwapExhausted`]）：本层之下不存在
//!   恢复手段，只能显式上抛；是否终止进程或停机由调用链顶端决定。
//! - **非法访问**（[`KernelAddress`]、[`NotMapped`]、[`WriteProtected`]）：
//!   缺页无法解决，调用方应终止出错进程，本层不做重试。
//! - **可返回的失败**（[`AddressConflict`]、[`InvalidArgument`]、
//!   [`DiskIo`]、[`FileIo`]）：作为普通错误返回给调用方；
//!   地址冲突保证零副作用，I/O 失败保证不被吞掉。
//!
//! [`OutOfFrames`]: VmError::OutOfFrames
//! [`SwapExhausted`]: VmError::SwapExhausted
//! [`KernelAddress`]: VmError::KernelAddress
//! [`NotMapped`]: VmError::NotMapped
//! [`WriteProtected`]: VmError::WriteProtected
//! [`AddressConflict`]: VmError::AddressConflict
//! [`InvalidArgument`]: VmError::InvalidArgument
//! [`DiskIo`]: VmError::DiskIo
//! [`FileIo`]: VmError::FileIo

/// 虚拟内存操作中可能发生的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 物理帧耗尽且没有可驱逐的帧
    OutOfFrames,
    /// 交换槽耗尽
    SwapExhausted,
    /// 目标地址范围已被占用
    AddressConflict,
    /// 地址未在补充页表中登记
    NotMapped,
    /// 内核地址上的缺页，无法从用户上下文解决
    KernelAddress,
    /// 对只读页的写访问
    WriteProtected,
    /// 硬件映射安装失败
    MapFailed,
    /// 交换设备 I/O 失败
    DiskIo,
    /// 文件读写失败或写回不完整
    FileIo,
    /// 延迟初始化器报告失败
    InitFailed,
    /// 参数无效（未对齐、为零、越界等）
    InvalidArgument,
}

/// 虚拟内存操作的结果类型
pub type VmResult<T> = Result<T, VmError>;

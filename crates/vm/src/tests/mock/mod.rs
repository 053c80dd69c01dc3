//! Mock 实现模块（宿主机单元测试专用）

pub mod device;
pub mod fs;
pub mod mm;

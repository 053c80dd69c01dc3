//! 测试支持 crate
//!
//! 为宿主机单元测试提供外部接口（物理页池、硬件页表、交换设备、
//! 文件）的 Mock 实现。
//!
//! 本 crate 依赖 `vm` 并直接实现其 trait，而 `vm` 以 dev-dependency
//! 引用本 crate——这是 Cargo 允许的开发期循环，正式构建不受影响。

#![no_std]

extern crate alloc;

pub mod mock;

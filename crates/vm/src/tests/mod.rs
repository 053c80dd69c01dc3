//! 场景测试
//!
//! 用 Mock 外部接口在宿主机上驱动整个子系统：容量受限的物理页池
//! 让驱逐可以被确定性触发，`user_read`/`user_write` 帮助函数模拟
//! 用户访问——未映射时先走缺页处理，再像 MMU 一样置访问/脏位。

pub(crate) mod mock;

mod basic;

use crate::addr::Vaddr;
use crate::config::{SECTORS_PER_PAGE, USER_STACK_TOP};
use crate::manager::VmManager;
use crate::space::MemorySpace;
use alloc::sync::Arc;
use crate::tests::mock::device::MockSectorDevice;
use crate::tests::mock::mm::{MockFramePool, MockPageTable};

type TestVm = VmManager<MockPageTable>;
type TestSpace = Arc<MemorySpace<MockPageTable>>;

/// 不会触发栈增长判定的栈指针
const SP: usize = USER_STACK_TOP - 64;

/// 池容量 `frames` 页、交换空间 `swap_pages` 槽的子系统。
fn setup(
    frames: usize,
    swap_pages: usize,
) -> (TestVm, TestSpace, Arc<MockFramePool>, Arc<MockSectorDevice>) {
    let pool = MockFramePool::new(frames);
    let device = MockSectorDevice::new(swap_pages * SECTORS_PER_PAGE);
    let vm = VmManager::new(pool.clone(), device.clone());
    let space = MemorySpace::new(MockPageTable::new());
    (vm, space, pool, device)
}

/// 再开一个共享同一子系统的地址空间。
fn new_space() -> TestSpace {
    MemorySpace::new(MockPageTable::new())
}

/// 模拟用户读一个字节；未映射时先解决缺页。
/// 并发压力下刚换入的页可能立刻再被挤出，访问与缺页循环到成功为止。
fn user_read(vm: &TestVm, space: &TestSpace, va: usize) -> u8 {
    loop {
        if let Some(byte) = space.hw().user_read(va) {
            return byte;
        }
        vm.handle_fault(space, Vaddr::new(va), false, true, Vaddr::new(SP))
            .expect("读缺页应当可解决");
    }
}

/// 模拟用户写一个字节；未映射时先解决缺页。
fn user_write(vm: &TestVm, space: &TestSpace, va: usize, byte: u8) {
    loop {
        if space.hw().user_write(va, byte) {
            return;
        }
        vm.handle_fault(space, Vaddr::new(va), true, true, Vaddr::new(SP))
            .expect("写缺页应当可解决");
    }
}

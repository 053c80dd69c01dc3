//! 登记、首次缺页与延迟初始化

use super::*;
use crate::error::VmError;
use crate::page::{PageKind, TargetKind};
use core::sync::atomic::{AtomicUsize, Ordering};

const VA: usize = 0x4000_0000;

#[test]
fn test_alloc_then_first_fault_zero_fills() {
    let (vm, space, pool, _) = setup(4, 4);
    vm.alloc_page(&space, Vaddr::new(VA), true, TargetKind::Anon, None)
        .unwrap();

    // 登记后处于 Uninit 状态，尚无物理帧
    let is_uninit = space
        .with_page(Vaddr::new(VA), |p| {
            !p.is_resident() && matches!(p.kind(), PageKind::Uninit { .. })
        })
        .unwrap();
    assert!(is_uninit);
    assert_eq!(pool.in_use(), 0);

    // 首次缺页：转变为匿名页并零填充
    assert_eq!(user_read(&vm, &space, VA), 0);
    assert_eq!(user_read(&vm, &space, VA + 0xFFF), 0);
    let is_anon = space
        .with_page(Vaddr::new(VA), |p| {
            p.is_resident() && matches!(p.kind(), PageKind::Anon { slot: None })
        })
        .unwrap();
    assert!(is_anon);
    assert_eq!(pool.in_use(), 1);
    assert_eq!(vm.frames().frames_in_use(), 1);
}

#[test]
fn test_duplicate_alloc_fails_without_side_effects() {
    let (vm, space, _, _) = setup(4, 4);
    vm.alloc_page(&space, Vaddr::new(VA), true, TargetKind::Anon, None)
        .unwrap();
    user_write(&vm, &space, VA + 5, 0x77);

    // 同页再次登记（含页内偏移的变体）失败，第一个页不受影响
    assert_eq!(
        vm.alloc_page(&space, Vaddr::new(VA), false, TargetKind::Anon, None),
        Err(VmError::AddressConflict)
    );
    assert_eq!(
        vm.alloc_page(&space, Vaddr::new(VA + 8), false, TargetKind::Anon, None),
        Err(VmError::AddressConflict)
    );
    assert_eq!(user_read(&vm, &space, VA + 5), 0x77);
    assert!(space.with_page(Vaddr::new(VA), |p| p.writable()).unwrap());
}

#[test]
fn test_claim_is_idempotent() {
    let (vm, space, pool, _) = setup(4, 4);
    vm.alloc_page(&space, Vaddr::new(VA), true, TargetKind::Anon, None)
        .unwrap();
    vm.claim(&space, Vaddr::new(VA)).unwrap();
    vm.claim(&space, Vaddr::new(VA)).unwrap();
    assert_eq!(pool.in_use(), 1);

    // 未登记的地址无法 claim
    assert_eq!(
        vm.claim(&space, Vaddr::new(VA + 0x1000)),
        Err(VmError::NotMapped)
    );
}

#[test]
fn test_deferred_initializer_runs_exactly_once() {
    let (vm, space, _, _) = setup(1, 4);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    vm.alloc_page(
        &space,
        Vaddr::new(VA),
        true,
        TargetKind::Anon,
        Some(Arc::new(move |buf: &mut [u8]| {
            counter.fetch_add(1, Ordering::Relaxed);
            buf.fill(0x5A);
            true
        })),
    )
    .unwrap();

    assert_eq!(user_read(&vm, &space, VA + 100), 0x5A);
    assert_eq!(runs.load(Ordering::Relaxed), 1);

    // 挤占出去再换回来：内容来自交换槽，初始化器不再执行
    vm.alloc_page(&space, Vaddr::new(VA + 0x1000), true, TargetKind::Anon, None)
        .unwrap();
    vm.claim(&space, Vaddr::new(VA + 0x1000)).unwrap();
    assert!(!space.hw().mapped(VA));

    assert_eq!(user_read(&vm, &space, VA + 100), 0x5A);
    assert_eq!(runs.load(Ordering::Relaxed), 1);
}

#[test]
fn test_failed_initializer_aborts_fault() {
    let (vm, space, pool, _) = setup(4, 4);
    vm.alloc_page(
        &space,
        Vaddr::new(VA),
        true,
        TargetKind::Anon,
        Some(Arc::new(|_: &mut [u8]| false)),
    )
    .unwrap();

    assert_eq!(
        vm.claim(&space, Vaddr::new(VA)),
        Err(VmError::InitFailed)
    );
    // 失败的缺页不留下任何驻留：帧已归还，页保持 Uninit
    assert_eq!(pool.in_use(), 0);
    let still_uninit = space
        .with_page(Vaddr::new(VA), |p| matches!(p.kind(), PageKind::Uninit { .. }))
        .unwrap();
    assert!(still_uninit);
}

#[test]
fn test_remove_page_releases_everything() {
    let (vm, space, pool, _) = setup(4, 4);
    vm.alloc_page(&space, Vaddr::new(VA), true, TargetKind::Anon, None)
        .unwrap();
    user_write(&vm, &space, VA, 0x11);

    vm.remove_page(&space, Vaddr::new(VA)).unwrap();
    assert!(!space.contains(Vaddr::new(VA)));
    assert!(!space.hw().mapped(VA));
    assert_eq!(pool.in_use(), 0);
    assert_eq!(vm.frames().frames_in_use(), 0);
}

#[test]
fn test_remove_swapped_page_frees_slot() {
    let (vm, space, _, _) = setup(1, 4);
    vm.alloc_page(&space, Vaddr::new(VA), true, TargetKind::Anon, None)
        .unwrap();
    user_write(&vm, &space, VA, 0x22);

    // 第二个页把第一个挤进交换槽
    vm.alloc_page(&space, Vaddr::new(VA + 0x1000), true, TargetKind::Anon, None)
        .unwrap();
    vm.claim(&space, Vaddr::new(VA + 0x1000)).unwrap();
    assert_eq!(vm.swap().used_slots(), 1);

    vm.remove_page(&space, Vaddr::new(VA)).unwrap();
    assert_eq!(vm.swap().used_slots(), 0);
}

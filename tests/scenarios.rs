//! End-to-end scenario tests for the sector store (see the design notes).
//!
//! These exercise cross-thread pinning, maintenance ticks and a random-load
//! stress pass, the things unit tests inside the crate can't easily cover
//! because they need several public modules working together at once.

use rand::Rng;
use sector_store::{ComponentDescriptor, ComponentOps, SectorStore, StoreConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

unsafe fn move_u64(src: *mut u8, dst: *mut u8) {
    let v = std::ptr::read(src as *const u64);
    std::ptr::write(dst as *mut u64, v);
}
unsafe fn copy_u64(src: *const u8, dst: *mut u8) {
    let v = std::ptr::read(src as *const u64);
    std::ptr::write(dst as *mut u64, v);
}
unsafe fn drop_u64(_ptr: *mut u8) {}

fn u64_descriptor() -> ComponentDescriptor {
    ComponentDescriptor {
        size: 8,
        align: 8,
        is_trivially_relocatable: true,
        ops: ComponentOps {
            move_ctor: move_u64,
            copy_ctor: Some(copy_u64),
            drop_fn: drop_u64,
        },
    }
}

fn new_store(chunk_capacity: usize) -> SectorStore {
    SectorStore::create(&[u64_descriptor()], chunk_capacity).unwrap()
}

fn put(store: &SectorStore, id: u32, value: u64) {
    unsafe { store.insert(id, 0, value).unwrap() };
}

// Scenario C: a pin on another thread blocks an async erase until released.
#[test]
fn scenario_pin_blocks_erase_across_threads() {
    let store = Arc::new(new_store(16));
    for id in 0..128u32 {
        put(&store, id, id as u64);
    }

    let pinned_signal = Arc::new(AtomicBool::new(false));

    let pinner_store = Arc::clone(&store);
    let pinner_signal = Arc::clone(&pinned_signal);
    let pinner = std::thread::spawn(move || {
        let pin = pinner_store.pin(37).unwrap();
        pinner_signal.store(true, Ordering::Release);
        std::thread::sleep(Duration::from_millis(50));
        drop(pin);
    });

    while !pinned_signal.load(Ordering::Acquire) {
        std::thread::yield_now();
    }

    store.erase_async(37);
    assert!(store.find(37).is_some(), "erase_async must not remove a pinned sector");

    pinner.join().unwrap();

    store.process_pending();
    assert!(store.find(37).is_none(), "deferred erase must complete once unpinned");
}

// Scenario F: sustained concurrent load across readers and writers.
#[test]
fn scenario_high_load_random_stress() {
    const N: u32 = 512;
    let config = StoreConfig::builder()
        .chunk_capacity(64)
        .dead_ratio_threshold(0.25)
        .build();
    let store = Arc::new(SectorStore::create_with_config(&[u64_descriptor()], config).unwrap());
    for id in 0..N {
        put(&store, id, id as u64);
    }

    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                while !stop.load(Ordering::Relaxed) {
                    let id = rng.gen_range(0..N);
                    if let Ok(pin) = store.pin(id) {
                        if let Some(sector) = pin.get() {
                            std::hint::black_box(sector.id());
                        }
                    }
                }
            })
        })
        .collect();

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                while !stop.load(Ordering::Relaxed) {
                    match rng.gen_range(0..4) {
                        0 => store.erase_async(rng.gen_range(0..N)),
                        1 => store.process_pending(),
                        2 => {
                            store.try_defragment();
                        }
                        _ => store.reserve(rng.gen_range(0..N as usize)),
                    }
                }
            })
        })
        .collect();

    std::thread::sleep(Duration::from_millis(2000));
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        reader.join().unwrap();
    }
    for writer in writers {
        writer.join().unwrap();
    }

    store.process_pending();

    // Invariant 1: strictly increasing ids across the live range.
    let ids: Vec<u32> = store.iter().map(|s| s.id()).collect();
    for window in ids.windows(2) {
        assert!(window[0] < window[1], "dense order must stay strictly increasing");
    }

    // Invariant 2: every id still present resolves back to itself.
    for &id in &ids {
        assert!(store.contains(id));
        assert_eq!(store.find(id).unwrap().id(), id);
    }
}

#[test]
fn binary_search_insert_position_boundaries() {
    let store = new_store(8);
    // Empty store: any id inserts at position 0.
    put(&store, 10, 10);
    assert_eq!(store.iter().map(|s| s.id()).collect::<Vec<_>>(), vec![10]);

    // All-smaller: new id goes to the end.
    put(&store, 20, 20);
    assert_eq!(store.iter().map(|s| s.id()).collect::<Vec<_>>(), vec![10, 20]);

    // All-greater: new id goes to the front.
    put(&store, 1, 1);
    assert_eq!(store.iter().map(|s| s.id()).collect::<Vec<_>>(), vec![1, 10, 20]);
}

#[test]
fn clone_then_take_round_trip_is_observationally_equivalent() {
    let original = new_store(4);
    for id in 0..8u32 {
        put(&original, id, (id * 3) as u64);
    }

    let cloned = original.clone_store().unwrap();
    let mut destination = new_store(4);
    let mut movable = cloned;
    destination.take(&mut movable);

    let original_ids: Vec<u32> = original.iter().map(|s| s.id()).collect();
    let destination_ids: Vec<u32> = destination.iter().map(|s| s.id()).collect();
    assert_eq!(original_ids, destination_ids);

    for id in original_ids {
        let original_value = unsafe { *original.find(id).unwrap().field::<u64>(0).unwrap() };
        let destination_value = unsafe { *destination.find(id).unwrap().field::<u64>(0).unwrap() };
        assert_eq!(original_value, destination_value);
    }
}

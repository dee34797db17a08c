use kextkit::{AllocFlags, HostAllocator, Ledger, LedgerConfig};
use proptest::prelude::*;

/// Plain libc heap standing in for the kernel allocator.
struct LibcHost;

unsafe impl HostAllocator for LibcHost {
    fn raw_allocate(&self, size: usize, flags: AllocFlags) -> *mut u8 {
        let size = size.max(1);
        unsafe {
            if flags.contains(AllocFlags::ZERO) {
                libc::calloc(1, size).cast()
            } else {
                libc::malloc(size).cast()
            }
        }
    }

    unsafe fn raw_free(&self, addr: *mut u8) {
        unsafe { libc::free(addr.cast()) }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Allocate(usize),
    Release(usize),
    ReleaseNull,
    Resize(usize, usize),
}

struct Live {
    ptr: *mut u8,
    size: usize,
    fill: u8,
}

fn check_fill(block: &Live, len: usize) {
    let bytes = unsafe { std::slice::from_raw_parts(block.ptr, len) };
    assert!(
        bytes.iter().all(|&b| b == block.fill),
        "block contents changed"
    );
}

proptest! {
    #[test]
    fn counter_tracks_live_blocks(ops in proptest::collection::vec(
        prop_oneof![
            (0usize..256).prop_map(Op::Allocate),
            any::<usize>().prop_map(Op::Release),
            Just(Op::ReleaseNull),
            (any::<usize>(), 0usize..256).prop_map(|(i, n)| Op::Resize(i, n)),
        ],
        1..64
    )) {
        let ledger = Ledger::new(LibcHost);
        let mut live: Vec<Live> = Vec::new();
        let mut next_fill = 1u8;

        for op in ops {
            match op {
                Op::Allocate(size) => {
                    let ptr = ledger.allocate(size, AllocFlags::WAITOK).unwrap().as_ptr();
                    let fill = next_fill;
                    next_fill = next_fill.wrapping_add(1);
                    unsafe { ptr.write_bytes(fill, size) };
                    live.push(Live { ptr, size, fill });
                }
                Op::Release(i) if !live.is_empty() => {
                    let block = live.swap_remove(i % live.len());
                    check_fill(&block, block.size);
                    unsafe { ledger.release(block.ptr) };
                }
                Op::Release(_) | Op::ReleaseNull => {
                    unsafe { ledger.release(std::ptr::null_mut()) };
                }
                Op::Resize(i, new_size) if !live.is_empty() => {
                    let idx = i % live.len();
                    let block = &mut live[idx];
                    let ptr = unsafe {
                        ledger.resize(block.ptr, block.size, new_size, AllocFlags::WAITOK)
                    }
                    .unwrap()
                    .as_ptr();
                    if new_size == block.size {
                        prop_assert_eq!(ptr, block.ptr);
                    }
                    let kept = block.size.min(new_size);
                    block.ptr = ptr;
                    check_fill(block, kept);
                    unsafe { ptr.write_bytes(block.fill, new_size) };
                    block.size = new_size;
                }
                Op::Resize(_, new_size) => {
                    let ptr = unsafe {
                        ledger.resize(std::ptr::null_mut(), 0, new_size, AllocFlags::ZERO)
                    }
                    .unwrap()
                    .as_ptr();
                    let block = Live { ptr, size: new_size, fill: 0 };
                    check_fill(&block, new_size);
                    live.push(block);
                }
            }
            prop_assert_eq!(ledger.outstanding(), live.len() as i64);
        }

        for block in live.drain(..) {
            unsafe { ledger.release(block.ptr) };
        }
        ledger.assert_balanced();
    }

    #[test]
    fn noop_resize_zero_fill_follows_config(size in 1usize..128, zero in any::<bool>()) {
        let ledger = Ledger::with_config(LibcHost, LedgerConfig { zero_on_noop_resize: zero });
        let p = ledger.allocate(size, AllocFlags::WAITOK).unwrap();
        unsafe { p.as_ptr().write_bytes(0x77, size) };

        let q = unsafe { ledger.resize(p.as_ptr(), size, size, AllocFlags::ZERO) }.unwrap();
        prop_assert_eq!(p, q);
        prop_assert_eq!(ledger.outstanding(), 1);

        let expect = if zero { 0 } else { 0x77 };
        let bytes = unsafe { std::slice::from_raw_parts(q.as_ptr(), size) };
        prop_assert!(bytes.iter().all(|&b| b == expect));

        unsafe { ledger.release(q.as_ptr()) };
        ledger.assert_balanced();
    }
}

mod common;

use std::sync::Arc;

use ferrokern::define::vm::{NUM_PHYS_PAGES, PAGE_SIZE};
use ferrokern::machine::mmu::EntryFlags;
use ferrokern::syscall::transfer::{read_buffer_from_user, write_buffer_to_user};
use ferrokern::vm::{AddressSpace, Executable, LoadPolicy, ReplacementPolicy};
use ferrokern::Kernel;

use common::{put_file, scratch_kernel};

fn space_for(
    kernel: &Arc<Kernel>,
    name: &str,
    image: &[u8],
    pid: usize,
    policy: LoadPolicy,
) -> Arc<AddressSpace> {
    let file = put_file(&kernel.file_system, name, image);
    AddressSpace::new(kernel, file, pid, policy).expect("address space")
}

#[test]
fn demand_loading_matches_eager_loading() {
    let code: Vec<u8> = (0..300).map(|i| (i % 97) as u8 | 1).collect();
    let data: Vec<u8> = (0..300).map(|i| (i % 83) as u8).collect();
    let image = Executable::build_image(&code, &data, 400);

    let eager_kernel = scratch_kernel(LoadPolicy::Eager, ReplacementPolicy::Fifo);
    let eager = space_for(&eager_kernel, "prog", &image, 1, LoadPolicy::Eager);
    let demand_kernel = scratch_kernel(LoadPolicy::Demand, ReplacementPolicy::Fifo);
    let demand = space_for(&demand_kernel, "prog", &image, 1, LoadPolicy::Demand);

    assert_eq!(eager.num_pages(), demand.num_pages());
    let size = eager.num_pages() * PAGE_SIZE;

    let from_eager = read_buffer_from_user(&eager_kernel.machine, &eager, 0, size).unwrap();
    let from_demand = read_buffer_from_user(&demand_kernel.machine, &demand, 0, size).unwrap();
    assert_eq!(from_eager, from_demand);

    // And both match the image: code, then data, then zeroes.
    assert_eq!(&from_eager[..code.len()], &code[..]);
    assert_eq!(&from_eager[code.len()..code.len() + data.len()], &data[..]);
    assert!(from_eager[code.len() + data.len()..].iter().all(|&b| b == 0));
}

#[test]
fn code_pages_are_read_only_under_demand_loading() {
    // Two full pages of code.
    let code = vec![0x42u8; 2 * PAGE_SIZE];
    let image = Executable::build_image(&code, &[], PAGE_SIZE);
    let kernel = scratch_kernel(LoadPolicy::Demand, ReplacementPolicy::Fifo);
    let space = space_for(&kernel, "prog", &image, 1, LoadPolicy::Demand);

    // Reading code works; writing it must not.
    let read = read_buffer_from_user(&kernel.machine, &space, 0, PAGE_SIZE).unwrap();
    assert!(read.iter().all(|&b| b == 0x42));
    assert!(write_buffer_to_user(&kernel.machine, &space, 0, &[0]).is_err());
    // The data/stack region stays writable.
    write_buffer_to_user(&kernel.machine, &space, 2 * PAGE_SIZE, &[7]).unwrap();

    let table = space.page_table_snapshot();
    assert!(table[0].flags.contains(EntryFlags::READ_ONLY));
    assert!(!table[2].flags.contains(EntryFlags::READ_ONLY));
}

#[test]
fn pages_survive_eviction_through_swap() {
    // More pages than physical frames, so reads and writes force
    // evictions all the way through.
    let uninit = (NUM_PHYS_PAGES + 8) * PAGE_SIZE;
    let code: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 11) as u8).collect();
    let image = Executable::build_image(&code, &[], uninit);

    let kernel = scratch_kernel(LoadPolicy::DemandSwap, ReplacementPolicy::Fifo);
    let space = space_for(&kernel, "prog", &image, 1, LoadPolicy::DemandSwap);
    assert!(space.num_pages() > NUM_PHYS_PAGES);

    // Fill the writable region with a recognizable pattern.
    let start = PAGE_SIZE; // skip the read-only code page
    let len = space.num_pages() * PAGE_SIZE - start;
    let pattern: Vec<u8> = (0..len).map(|i| (i % 249) as u8 | 1).collect();
    write_buffer_to_user(&kernel.machine, &space, start, &pattern).unwrap();

    // Everything written must come back intact, eviction or not.
    let back = read_buffer_from_user(&kernel.machine, &space, start, len).unwrap();
    assert_eq!(back, pattern);
    // The code page went through at least one eviction too.
    let code_back = read_buffer_from_user(&kernel.machine, &space, 0, PAGE_SIZE).unwrap();
    assert_eq!(code_back, code);
    assert!(kernel.core_map().invariants_hold());

    // Tearing the space down removes its swap file and leaks nothing.
    drop(space);
    assert!(kernel.file_system.list().iter().all(|n| !n.starts_with("SWAP")));
    assert!(kernel.file_system.check());
}

#[test]
fn fifo_evicts_the_oldest_page() {
    let uninit = (NUM_PHYS_PAGES + 4) * PAGE_SIZE;
    let image = Executable::build_image(&[], &[], uninit);
    let kernel = scratch_kernel(LoadPolicy::DemandSwap, ReplacementPolicy::Fifo);
    let space = space_for(&kernel, "prog", &image, 1, LoadPolicy::DemandSwap);

    for vpn in 0..NUM_PHYS_PAGES {
        read_buffer_from_user(&kernel.machine, &space, vpn * PAGE_SIZE, 1).unwrap();
    }
    let resident: Vec<usize> = kernel.core_map().resident_pages().iter().map(|&(_, v)| v).collect();
    assert!(resident.contains(&0));

    // One more fault: the first page in is the first page out.
    read_buffer_from_user(&kernel.machine, &space, NUM_PHYS_PAGES * PAGE_SIZE, 1).unwrap();
    let resident: Vec<usize> = kernel.core_map().resident_pages().iter().map(|&(_, v)| v).collect();
    assert!(!resident.contains(&0));
    assert!(resident.contains(&NUM_PHYS_PAGES));
    assert!(kernel.core_map().invariants_hold());
}

#[test]
fn lru_spares_recently_used_pages() {
    let uninit = (NUM_PHYS_PAGES + 4) * PAGE_SIZE;
    let image = Executable::build_image(&[], &[], uninit);
    let kernel = scratch_kernel(LoadPolicy::DemandSwap, ReplacementPolicy::Lru);
    let space = space_for(&kernel, "prog", &image, 1, LoadPolicy::DemandSwap);

    for vpn in 0..NUM_PHYS_PAGES {
        read_buffer_from_user(&kernel.machine, &space, vpn * PAGE_SIZE, 1).unwrap();
    }
    // Touch page 0 again: it becomes the youngest.
    read_buffer_from_user(&kernel.machine, &space, 0, 1).unwrap();

    read_buffer_from_user(&kernel.machine, &space, NUM_PHYS_PAGES * PAGE_SIZE, 1).unwrap();
    let resident: Vec<usize> = kernel.core_map().resident_pages().iter().map(|&(_, v)| v).collect();
    assert!(resident.contains(&0), "recently used page was evicted");
    assert!(!resident.contains(&1), "LRU victim should have been page 1");
    assert!(kernel.core_map().invariants_hold());
}

#[test]
fn random_policy_keeps_the_map_consistent() {
    let uninit = (NUM_PHYS_PAGES + 6) * PAGE_SIZE;
    let image = Executable::build_image(&[], &[], uninit);
    let kernel = scratch_kernel(LoadPolicy::DemandSwap, ReplacementPolicy::Random);
    let space = space_for(&kernel, "prog", &image, 1, LoadPolicy::DemandSwap);

    for vpn in 0..space.num_pages() {
        read_buffer_from_user(&kernel.machine, &space, vpn * PAGE_SIZE, 1).unwrap();
        assert!(kernel.core_map().invariants_hold());
    }
    assert_eq!(kernel.core_map().count_clear(), 0);
    assert_eq!(kernel.core_map().resident_pages().len(), NUM_PHYS_PAGES);
}

#[test]
fn tlb_state_follows_context_switches() {
    let image = Executable::build_image(&[], &[], 4 * PAGE_SIZE);
    let kernel = scratch_kernel(LoadPolicy::Demand, ReplacementPolicy::Fifo);
    let space_a = space_for(&kernel, "prog-a", &image, 1, LoadPolicy::Demand);
    let space_b = space_for(&kernel, "prog-b", &image, 2, LoadPolicy::Demand);

    // Dirty a page of A through the TLB.
    write_buffer_to_user(&kernel.machine, &space_a, 0, b"dirty").unwrap();
    let before = space_a.page_table_snapshot();
    assert!(!before[0].flags.contains(EntryFlags::DIRTY));

    // Switching out folds the TLB bits into A's page table.
    space_a.save_state();
    let after = space_a.page_table_snapshot();
    assert!(after[0].flags.contains(EntryFlags::DIRTY));
    assert!(after[0].flags.contains(EntryFlags::USE));
    assert!(kernel.machine.tlb_snapshot().iter().all(|e| !e.is_valid()));

    // Switching B in wipes whatever is left.
    space_b.restore_state();
    assert!(kernel.machine.tlb_snapshot().iter().all(|e| !e.is_valid()));

    // A's data is still there when it comes back.
    let back = read_buffer_from_user(&kernel.machine, &space_a, 0, 5).unwrap();
    assert_eq!(&back, b"dirty");
}

// Pure paging: two processes share half as many frames as their combined
// working set, so pages continuously travel to and from the swap disk
// without ever losing their contents.

mod common;

use std::time::Duration;

use vmkern::vm;
use vmkern::vm::{frame, swap};

#[test]
fn working_sets_survive_replacement() {
    let _vm = common::exclusive();
    const PAGES: usize = 4;
    const ITERATIONS: usize = 40;

    let machine = common::machine(16);
    machine.start(PAGES, PAGES, PAGES, 2).unwrap();

    let mut children = Vec::new();
    for name in ["A", "B"] {
        let letter = name.as_bytes()[0];
        children.push(machine.spawn_user(name, move |proc| {
            let page_size = proc.page_size();
            for _ in 0..ITERATIONS {
                for page in 0..PAGES {
                    proc.write(page * page_size, letter).unwrap();
                }
                for page in 0..PAGES {
                    assert_eq!(proc.read(page * page_size).unwrap(), letter);
                }
            }
        }));
    }
    for pid in children {
        machine.wait(pid);
    }

    let stats = vm::statistics();
    assert!(stats.page_outs > 0, "dirty pages must be written back");
    assert!(stats.page_ins > 0, "evicted pages must be reloaded");
    assert!(stats.replaced >= stats.page_outs);
    assert_eq!(stats.new + stats.page_ins, stats.faults);

    machine.stop();
}

#[test]
fn frame_table_and_page_tables_agree() {
    let _vm = common::exclusive();
    let machine = common::machine(8);
    machine.start(4, 4, 2, 1).unwrap();

    let pid = machine.spawn_user("probe", |proc| {
        let page_size = proc.page_size();
        proc.write(0, 1).unwrap();
        proc.write(page_size, 2).unwrap();
        std::thread::sleep(Duration::from_millis(200));
    });

    std::thread::sleep(Duration::from_millis(80));

    // Quiescent: the child sleeps, the pagers are idle.
    let frames = frame::snapshot();
    let mut resident = 0;
    for (idx, info) in frames.iter().enumerate() {
        if let Some((owner, page)) = info.occupant {
            resident += 1;
            let table = vm::pagetable::get(owner).expect("occupant has a table");
            let table = table.lock();
            let entry = table.entry(page).expect("occupant page in range");
            assert!(entry.incore, "frame {idx} occupant not incore");
            assert_eq!(entry.frame, idx, "reverse map disagrees with PTE");
        } else {
            assert!(!info.busy, "free frame left busy at quiescence");
        }
    }
    assert!(resident <= frames.len());
    let stats = vm::statistics();
    assert_eq!(stats.free_frames + resident, stats.frames);

    machine.wait(pid);

    // After quit nothing may keep the pid.
    for info in frame::snapshot() {
        assert_eq!(info.occupant, None);
        assert!(!info.busy);
    }
    assert!(swap::snapshot().iter().all(Option::is_none));

    machine.stop();
}

#[test]
fn evicted_bytes_come_back_intact() {
    let _vm = common::exclusive();
    let machine = common::machine(8);
    machine.start(3, 3, 1, 1).unwrap();

    let pid = machine.spawn_user("roundtrip", |proc| {
        let page_size = proc.page_size();
        proc.write(5, 0xAB).unwrap();
        // One frame: each touch below evicts the previous page.
        proc.write(page_size, 0x11).unwrap();
        proc.write(2 * page_size, 0x22).unwrap();
        assert_eq!(proc.read(5).unwrap(), 0xAB);
        assert_eq!(proc.read(page_size).unwrap(), 0x11);
        assert_eq!(proc.read(2 * page_size).unwrap(), 0x22);
    });
    machine.wait(pid);

    let stats = vm::statistics();
    assert!(stats.page_ins >= 3);
    assert!(stats.page_outs >= 3);
    assert_eq!(stats.new, 3);

    machine.stop();
}

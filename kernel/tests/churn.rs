// Churn scenario: waves of short-lived processes. Whatever a dead process
// held (frames, swap slots, its table) must be back in the pools before
// the next wave runs.

mod common;

use common::XorShift;
use vmkern::vm;
use vmkern::vm::{frame, swap};

const WAVES: usize = 15;
const WAVE_SIZE: usize = 4;

#[test]
fn short_lived_processes_release_everything() {
    let _vm = common::exclusive();
    let machine = common::machine(16);
    machine.start(4, 4, 4, 2).unwrap();

    for wave in 0..WAVES {
        let mut children = Vec::new();
        for slot in 0..WAVE_SIZE {
            let seed = (wave * WAVE_SIZE + slot + 1) as u64;
            children.push(machine.spawn_user(&format!("churn-{wave}-{slot}"), move |proc| {
                let page_size = proc.page_size();
                let mut rng = XorShift(seed.wrapping_mul(0x2545_F491_4F6C_DD1D));
                let mut last = [0u8, 0u8];
                for _ in 0..10 {
                    let roll = rng.next();
                    let page = (roll >> 4) as usize % 2;
                    if roll % 2 == 0 {
                        let value = (roll >> 16) as u8;
                        proc.write(page * page_size, value).unwrap();
                        last[page] = value;
                    } else {
                        assert_eq!(proc.read(page * page_size).unwrap(), last[page]);
                    }
                }
            }));
        }
        for pid in children {
            machine.wait(pid);
        }

        // Quiescent between waves: everything is back in the pools.
        let stats = vm::statistics();
        assert_eq!(stats.free_frames, stats.frames);
        assert_eq!(stats.free_blocks, stats.blocks);
        for info in frame::snapshot() {
            assert!(!info.busy);
            assert_eq!(info.occupant, None);
        }
        assert!(swap::snapshot().iter().all(Option::is_none));
    }

    let stats = vm::statistics();
    assert_eq!(stats.new + stats.page_ins, stats.faults);

    machine.stop();
}

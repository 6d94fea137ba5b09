// Chaos scenario: four processes hammer four shared frames with random
// writes, verified reads and sleeps. Every verified read must see the last
// value written by that process to that page; untouched pages stay zero.

mod common;

use std::time::Duration;

use common::XorShift;
use vmkern::vm;

const PAGES: usize = 4;
const ITERATIONS: usize = 60;

#[test]
fn random_ops_never_lose_writes() {
    let _vm = common::exclusive();
    let machine = common::machine(32);
    machine.start(PAGES, PAGES, 4, 3).unwrap();

    let mut children = Vec::new();
    for child in 0..4u64 {
        children.push(machine.spawn_user(&format!("chaos-{child}"), move |proc| {
            let page_size = proc.page_size();
            let mut rng = XorShift(0x9E37_79B9 ^ (child + 1));
            let mut last: [Option<u8>; PAGES] = [None; PAGES];
            let marker = |page: usize| page * page_size + 3;

            for _ in 0..ITERATIONS {
                let roll = rng.next();
                match roll % 3 {
                    0 => {
                        let page = (roll >> 8) as usize % PAGES;
                        let value = (roll >> 16) as u8;
                        proc.write(marker(page), value).unwrap();
                        last[page] = Some(value);
                    }
                    1 => {
                        for page in 0..PAGES {
                            let got = proc.read(marker(page)).unwrap();
                            assert_eq!(got, last[page].unwrap_or(0), "page {page} corrupted");
                        }
                    }
                    _ => std::thread::sleep(Duration::from_millis(1)),
                }
            }
            for page in 0..PAGES {
                let got = proc.read(marker(page)).unwrap();
                assert_eq!(got, last[page].unwrap_or(0));
            }
        }));
    }
    for pid in children {
        machine.wait(pid);
    }

    let stats = vm::statistics();
    assert_eq!(stats.new + stats.page_ins, stats.faults);
    assert_eq!(stats.free_frames, stats.frames, "all frames back after quit");

    machine.stop();
}

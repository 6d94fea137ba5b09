// Paging Demo
// Runs the VM subsystem on the simulated machine: two processes share half
// as many frames as they need, so the pagers continuously evict and reload
// their pages through the swap disk.

use vmkern::services::DiskGeometry;
use vmkern::sim::Machine;
use vmkern::vm;

const PAGES: usize = 4;
const FRAMES: usize = 4;
const PAGERS: usize = 2;
const ITERATIONS: usize = 50;

fn main() {
    println!("=== Paging Demo ===\n");

    let machine = Machine::new(
        256,
        DiskGeometry {
            sector_size: 64,
            sectors_per_track: 4,
            tracks: 16,
        },
    );
    machine
        .start(PAGES, PAGES, FRAMES, PAGERS)
        .expect("VM init failed");
    println!(
        "Region: {PAGES} pages per process, {FRAMES} frames, {PAGERS} pagers, \
         16 swap slots\n"
    );

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
    println!("Both working sets survived {ITERATIONS} iterations.\n");
    println!("Statistics:");
    println!("  faults:   {}", stats.faults);
    println!("  new:      {}", stats.new);
    println!("  pageIns:  {}", stats.page_ins);
    println!("  pageOuts: {}", stats.page_outs);
    println!("  replaced: {}", stats.replaced);
    println!("  switches: {}", stats.switches);

    machine.stop();
    println!("\n=== Demo Complete ===");
}

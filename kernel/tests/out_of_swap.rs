// Per-process fatalities: an overcommitting process is killed when the
// swap pool cannot back its next page, and an out-of-region reference is
// killed as an access violation. Other processes keep running either way.

mod common;

use vmkern::vm;

#[test]
fn overcommitter_dies_others_continue() {
    let _vm = common::exclusive();
    // Two frames and only two swap slots: the fifth distinct dirty page
    // cannot be backed anywhere.
    let machine = common::machine(2);
    machine.start(6, 6, 2, 1).unwrap();

    let hog = machine.spawn_user("hog", |proc| {
        let page_size = proc.page_size();
        let mut survived = 0;
        for page in 0..6 {
            match proc.write(page * page_size, 0x55) {
                Ok(()) => survived += 1,
                Err(_) => break,
            }
        }
        assert!(
            (3..6).contains(&survived),
            "hog should die overcommitting, survived {survived} pages"
        );
    });
    machine.wait(hog);

    let stats = vm::statistics();
    assert_eq!(stats.free_frames, stats.frames, "hog frames reclaimed");
    assert_eq!(stats.free_blocks, stats.blocks, "hog slots reclaimed");

    let polite = machine.spawn_user("polite", |proc| {
        proc.write(0, 0x77).unwrap();
        assert_eq!(proc.read(0).unwrap(), 0x77);
    });
    machine.wait(polite);

    machine.stop();
}

#[test]
fn out_of_region_reference_kills_the_process() {
    let _vm = common::exclusive();
    let machine = common::machine(4);
    machine.start(2, 2, 2, 1).unwrap();

    let rogue = machine.spawn_user("rogue", |proc| {
        let page_size = proc.page_size();
        proc.write(0, 1).unwrap();
        assert!(proc.read(2 * page_size).is_err(), "stray read must not succeed");
    });
    machine.wait(rogue);

    let bystander = machine.spawn_user("bystander", |proc| {
        proc.write(0, 9).unwrap();
        assert_eq!(proc.read(0).unwrap(), 9);
    });
    machine.wait(bystander);

    let stats = vm::statistics();
    // One fault never became a page: the violation.
    assert_eq!(stats.new + stats.page_ins + 1, stats.faults);

    machine.stop();
}

use overlord::queen::decision::{decide, should_scale_down, should_scale_up, Decision, Guards, Limits};
use proptest::prelude::*;

fn limits() -> Limits {
    Limits {
        overloaded: 0.7,
        underused: 0.3,
        min_workers: 1,
        max_workers: 5,
    }
}

#[test]
fn test_overload_below_max_scales_up() {
    assert!(should_scale_up(0.9, 2, Guards::default(), &limits()));
    assert_eq!(decide(0.9, 2, Guards::default(), &limits()), Decision::ScaleUp);
}

#[test]
fn test_single_worker_at_min_stays() {
    assert!(!should_scale_down(0.1, 1, Guards::default(), &limits()));
    assert_eq!(decide(0.1, 1, Guards::default(), &limits()), Decision::NoAction);
}

#[test]
fn test_underuse_above_min_scales_down() {
    assert_eq!(decide(0.1, 3, Guards::default(), &limits()), Decision::ScaleDown);
}

#[test]
fn test_thresholds_are_strict() {
    let l = limits();
    assert_eq!(decide(0.7, 2, Guards::default(), &l), Decision::NoAction);
    assert_eq!(decide(0.3, 2, Guards::default(), &l), Decision::NoAction);
    assert_eq!(decide(0.9, 5, Guards::default(), &l), Decision::NoAction);
}

#[test]
fn test_guards_block_both_directions() {
    let l = limits();
    for guards in [
        Guards { waiting_on_change: true, cooling_down: false },
        Guards { waiting_on_change: false, cooling_down: true },
        Guards { waiting_on_change: true, cooling_down: true },
    ] {
        assert!(!guards.clear());
        assert_eq!(decide(0.99, 2, guards, &l), Decision::NoAction);
        assert_eq!(decide(0.01, 4, guards, &l), Decision::NoAction);
    }
}

proptest! {
    #[test]
    fn prop_never_both_directions(
        load in 0.0f64..2.0,
        size in 0usize..10,
        waiting in any::<bool>(),
        cooling in any::<bool>(),
    ) {
        let guards = Guards { waiting_on_change: waiting, cooling_down: cooling };
        let l = limits();
        let up = should_scale_up(load, size, guards, &l);
        let down = should_scale_down(load, size, guards, &l);
        prop_assert!(!(up && down));
        if up {
            prop_assert!(size < l.max_workers);
        }
        if down {
            prop_assert!(size > l.min_workers);
        }
    }
}

//! Distribution expander tests.
//!
//! Every method must return exactly `count` timestamps inside the window,
//! in non-decreasing order, and the same seed must reproduce the same
//! schedule bit-for-bit.

use simcrm_core::{
    distribution::{expand, expand_with, DistributionMethod, BIAS_EXPONENT},
    error::SimError,
    rng::ScheduleRng,
};

const METHODS: [&str; 4] = ["linear", "uniform-random", "front-loaded", "back-loaded"];

#[test]
fn linear_is_evenly_spaced() {
    let out = expand("linear", 5, 0, 100, 0).unwrap();
    assert_eq!(out, vec![0, 25, 50, 75, 100]);
}

#[test]
fn linear_single_record_lands_on_start() {
    assert_eq!(expand("linear", 1, 1000, 2000, 0).unwrap(), vec![1000]);
}

#[test]
fn every_method_honours_count_bounds_and_order() {
    let windows = [(0, 100), (1_000, 2_000), (0, 0), (-500, 500), (1_700_000_000_000, 1_700_086_400_000)];
    for method in METHODS {
        for (start, end) in windows {
            for count in [1, 2, 7, 100, 1_000] {
                let out = expand(method, count, start, end, 0xDEAD_BEEF).unwrap();
                assert_eq!(out.len(), count as usize, "{method} {count} [{start},{end}]");
                assert!(
                    out.iter().all(|t| (start..=end).contains(t)),
                    "{method}: timestamp outside [{start},{end}]"
                );
                assert!(
                    out.windows(2).all(|w| w[0] <= w[1]),
                    "{method}: output not sorted"
                );
            }
        }
    }
}

#[test]
fn single_record_stays_in_window_for_every_method() {
    for method in METHODS {
        let out = expand(method, 1, 1000, 2000, 42).unwrap();
        assert_eq!(out.len(), 1);
        assert!((1000..=2000).contains(&out[0]), "{method}: {out:?}");
    }
}

#[test]
fn zero_count_is_rejected() {
    for method in METHODS.iter().chain(["no-such-method"].iter()) {
        let err = expand(method, 0, 0, 100, 1).unwrap_err();
        assert!(matches!(err, SimError::InvalidRecordCount(0)), "{method}: {err}");
    }
    assert!(matches!(
        expand("linear", -3, 0, 100, 1).unwrap_err(),
        SimError::InvalidRecordCount(-3)
    ));
}

#[test]
fn reversed_window_is_rejected() {
    for method in METHODS {
        let err = expand(method, 5, 200, 100, 1).unwrap_err();
        assert!(
            matches!(err, SimError::InvalidWindow { start: 200, end: 100 }),
            "{method}: {err}"
        );
    }
}

#[test]
fn unknown_method_is_rejected() {
    let err = expand("zigzag", 5, 0, 100, 1).unwrap_err();
    assert!(matches!(err, SimError::UnknownDistributionMethod(ref m) if m == "zigzag"));
}

#[test]
fn same_seed_same_schedule() {
    for method in METHODS {
        let a = expand(method, 250, 0, 86_400_000, 99).unwrap();
        let b = expand(method, 250, 0, 86_400_000, 99).unwrap();
        assert_eq!(a, b, "{method} is not deterministic");
    }
}

#[test]
fn different_seeds_change_random_schedules() {
    let a = expand("uniform-random", 50, 0, 1_000_000, 1).unwrap();
    let b = expand("uniform-random", 50, 0, 1_000_000, 2).unwrap();
    assert_ne!(a, b);
}

#[test]
fn biased_transforms_reproduce_bit_for_bit() {
    let (start, end, seed) = (10_000i64, 70_000i64, 0x1234_5678);
    let span = (end - start) as f64;

    let mut rng = ScheduleRng::new(seed);
    let mut expected_front: Vec<i64> = (0..20)
        .map(|_| start + (rng.next_f64().powf(BIAS_EXPONENT) * span).round() as i64)
        .collect();
    expected_front.sort_unstable();

    let mut rng = ScheduleRng::new(seed);
    let mut expected_back: Vec<i64> = (0..20)
        .map(|_| {
            let u = rng.next_f64();
            start + ((1.0 - (1.0 - u).powf(BIAS_EXPONENT)) * span).round() as i64
        })
        .collect();
    expected_back.sort_unstable();

    assert_eq!(expand("front-loaded", 20, start, end, seed).unwrap(), expected_front);
    assert_eq!(expand("back-loaded", 20, start, end, seed).unwrap(), expected_back);
}

#[test]
fn front_and_back_loading_shift_the_mass() {
    let (count, span) = (2_001i64, 1_000_000i64);
    let mean = |method: DistributionMethod| {
        let mut rng = ScheduleRng::new(7);
        let out = expand_with(method, count, 0, span, &mut rng).unwrap();
        out.iter().map(|t| *t as f64).sum::<f64>() / count as f64 / span as f64
    };
    let front = mean(DistributionMethod::FrontLoaded);
    let uniform = mean(DistributionMethod::UniformRandom);
    let back = mean(DistributionMethod::BackLoaded);

    // Expected means: 1/3, 1/2, 2/3 of the window.
    assert!(front < 0.42, "front-loaded mean {front}");
    assert!((0.44..0.56).contains(&uniform), "uniform mean {uniform}");
    assert!(back > 0.58, "back-loaded mean {back}");
}

use forge_sprt::{Decision, SequentialValidator, SprtParams, Trial};
use proptest::prelude::*;

fn trial() -> impl Strategy<Value = Trial> {
    prop_oneof![Just(Trial::Pass), Just(Trial::Fail)]
}

fn params() -> impl Strategy<Value = SprtParams> {
    (0.01f64..0.2, 0.01f64..0.2, 0.001f64..0.1, 0.15f64..0.6)
        .prop_filter_map("valid parameters", |(alpha, beta, p0, p1)| {
            SprtParams::new(alpha, beta, p0, p1).ok()
        })
}

#[test]
fn test_all_pass_accepts_within_bound() {
    let params = SprtParams::default();
    let bound = params.trials_to_accept();
    let mut v = SequentialValidator::new(params);
    let mut decided_at = None;
    for i in 1..=bound {
        if v.record(Trial::Pass) == Decision::Accept && decided_at.is_none() {
            decided_at = Some(i);
        }
    }
    assert_eq!(decided_at, Some(bound));
}

#[test]
fn test_all_fail_rejects_within_bound() {
    let params = SprtParams::default();
    let mut v = SequentialValidator::new(params);
    let verdict = v.evaluate(&vec![Trial::Fail; params.trials_to_reject()]);
    assert_eq!(verdict.decision, Decision::Reject);
}

#[test]
fn test_params_from_toml() {
    let params: SprtParams = toml::from_str("alpha = 0.01\nbeta = 0.01\np0 = 0.01\np1 = 0.1\n")
        .expect("toml parses");
    assert!(params.validate().is_ok());
    assert!(params.trials_to_accept() > SprtParams::default().trials_to_accept());
}

proptest! {
    #[test]
    fn prop_llr_is_deterministic(trials in prop::collection::vec(trial(), 0..64)) {
        let a = SequentialValidator::default().evaluate(&trials);
        let b = SequentialValidator::default().evaluate(&trials);
        prop_assert_eq!(a.llr.to_bits(), b.llr.to_bits());
        prop_assert_eq!(a.decision, b.decision);
    }

    #[test]
    fn prop_all_passes_accept(params in params(), extra in 0usize..16) {
        let n = params.trials_to_accept() + extra;
        let verdict = SequentialValidator::new(params).evaluate(&vec![Trial::Pass; n]);
        prop_assert_eq!(verdict.decision, Decision::Accept);
    }

    #[test]
    fn prop_all_failures_reject(params in params(), extra in 0usize..16) {
        let n = params.trials_to_reject() + extra;
        let verdict = SequentialValidator::new(params).evaluate(&vec![Trial::Fail; n]);
        prop_assert_eq!(verdict.decision, Decision::Reject);
    }

    #[test]
    fn prop_failure_never_lowers_llr(trials in prop::collection::vec(trial(), 0..32)) {
        let mut v = SequentialValidator::default();
        v.evaluate(&trials);
        let before = v.llr();
        v.record(Trial::Fail);
        prop_assert!(v.llr() > before);
    }

    #[test]
    fn prop_counts_match_input(trials in prop::collection::vec(trial(), 0..64)) {
        let verdict = SequentialValidator::default().evaluate(&trials);
        prop_assert_eq!(verdict.samples, trials.len());
        prop_assert_eq!(verdict.failures, trials.iter().filter(|t| **t == Trial::Fail).count());
    }
}

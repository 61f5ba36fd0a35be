//! Regression transcripts for the classic observable-collection scenarios.
//!
//! Each scenario prints one `update: <payload>` line per `after` delivered
//! to its observer. The expected output below is the contract: a change in
//! wrapping, bubbling, or notification order shows up as a diff here.

use obcol_harness::Scenario;

fn run(scenario: Scenario) -> Vec<String> {
    let dir = tempfile::tempdir().expect("tempdir");
    scenario.run(dir.path()).expect("scenario runs")
}

#[test]
fn basic() {
    assert_eq!(
        run(Scenario::Basic),
        vec![
            r#"update: {"a":"foo"}"#,
            r#"update: {"a":"foo","b":{}}"#,
            r#"update: {"a":"foo","b":{"foo":"bar"}}"#,
        ]
    );
}

#[test]
fn nested_reference_reports_root() {
    assert_eq!(
        run(Scenario::Nested),
        vec![
            r#"update: {"b":{"a":"foo","b":{}}}"#,
            r#"update: {"b":{"a":"foo","b":{},"c":"set from nested reference"}}"#,
        ]
    );
}

#[test]
fn combo_of_sequences_and_maps() {
    assert_eq!(
        run(Scenario::Combo),
        vec![
            r#"update: {"a":[]}"#,
            "update: [1]",
            "update: [1,2]",
            "update: [1,2,{}]",
            r#"update: {"c":"woot"}"#,
            r#"update: [1,2,{"c":"woot"}]"#,
        ]
    );
}

#[test]
fn iteration_with_nested_updates() {
    assert_eq!(
        run(Scenario::Iteration),
        vec![
            "update: [2,3,4]",
            r#"update: [2,3,4,{"foo":"bar"}]"#,
            r#"update: {"foo":"baz"}"#,
            r#"update: [2,3,4,{"foo":"baz"}]"#,
        ]
    );
}

#[test]
fn construct_with_callback_names() {
    assert_eq!(
        run(Scenario::Construct),
        vec![
            r#"Default update: {"a":"foo"}"#,
            r#"Special update: {"a":"foo"}"#,
        ]
    );
}

#[test]
fn always_update_after_reports_reads() {
    assert_eq!(
        run(Scenario::AlwaysUpdateAfter),
        vec![r#"update: {"foo":"bar"}"#]
    );
}

#[test]
fn locking_batches_before() {
    assert_eq!(
        run(Scenario::Locking),
        vec![
            "before: {}",
            r#"update: {"a":1}"#,
            r#"update: {"a":1,"b":{}}"#,
            r#"update: {"a":1,"b":{"c":2}}"#,
        ]
    );
}

#[test]
fn every_scenario_is_repeatable() {
    for scenario in Scenario::ALL {
        assert_eq!(run(*scenario), run(*scenario), "{}", scenario.name());
    }
}

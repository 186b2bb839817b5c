//! Tests for TOML configuration loading.

use std::io::Write;

use reschedule_engine::config::EngineConfig;
use reschedule_engine::error::EngineError;

#[test]
fn empty_document_yields_defaults() {
    let config = EngineConfig::from_toml_str("").unwrap();
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.planner.step_minutes, 15);
    assert_eq!(config.planner.max_slots, 3);
    assert!(config.planner.missing_policy_is_flexible);
    assert!(!config.planner.enforce_shift_bounds);
    assert_eq!(config.schedule.horizon_days, 7);
    assert_eq!(config.schedule.proposal_ttl_hours, 48);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn partial_sections_keep_remaining_defaults() {
    let config = EngineConfig::from_toml_str(
        r#"
        [planner]
        step_minutes = 30
        enforce_shift_bounds = true

        [logging]
        level = "debug"
        "#,
    )
    .unwrap();

    assert_eq!(config.planner.step_minutes, 30);
    assert_eq!(config.planner.max_slots, 3);
    assert!(config.planner.enforce_shift_bounds);
    assert_eq!(config.schedule.lead_time_minutes, 60);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.schedule.lead_time().num_minutes(), 60);
    assert_eq!(config.schedule.batch_timeout().as_secs(), 30);
}

#[test]
fn out_of_range_values_name_the_field() {
    let err = EngineConfig::from_toml_str("[planner]\nstep_minutes = 0\n").unwrap_err();
    match err {
        EngineError::Config(message) => assert!(message.contains("planner.step_minutes")),
        other => panic!("expected config error, got {other:?}"),
    }

    let err = EngineConfig::from_toml_str("[schedule]\nproposal_ttl_hours = -1\n").unwrap_err();
    assert!(err.to_string().contains("schedule.proposal_ttl_hours"));
}

#[test]
fn oversized_values_are_rejected_before_use() {
    let err = EngineConfig::from_toml_str("[schedule]\nhorizon_days = 300000000\n").unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert!(err.to_string().contains("schedule.horizon_days"));

    // Lead time may not reach past the horizon it is carved out of.
    let err = EngineConfig::from_toml_str(
        "[schedule]\nhorizon_days = 1\nlead_time_minutes = 1441\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("schedule.lead_time_minutes"));

    for (doc, field) in [
        ("[planner]\nstep_minutes = 100000\n", "planner.step_minutes"),
        ("[planner]\nmax_slots = 100000\n", "planner.max_slots"),
        ("[schedule]\nproposal_ttl_hours = 9223372036854775807\n", "schedule.proposal_ttl_hours"),
        ("[schedule]\nbatch_timeout_secs = 9999999\n", "schedule.batch_timeout_secs"),
    ] {
        let err = EngineConfig::from_toml_str(doc).unwrap_err();
        assert!(err.to_string().contains(field), "{field}: {err}");
    }
}

#[test]
fn largest_accepted_values_stay_usable() {
    let config = EngineConfig::from_toml_str(
        "[schedule]\nhorizon_days = 366\nlead_time_minutes = 527040\nproposal_ttl_hours = 2160\n",
    )
    .unwrap();
    assert_eq!(config.schedule.horizon().num_days(), 366);
    assert_eq!(config.schedule.proposal_ttl().num_hours(), 2160);
}

#[test]
fn syntax_errors_are_config_errors() {
    let err = EngineConfig::from_toml_str("[planner\nstep_minutes = 15").unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert_eq!(err.status_code(), 500);
}

#[test]
fn load_reads_from_disk() {
    let path = std::env::temp_dir().join(format!("reschedule-config-{}.toml", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "[schedule]\nhorizon_days = 14").unwrap();
    drop(file);

    let config = EngineConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.schedule.horizon().num_days(), 14);
}

#[test]
fn missing_file_is_a_config_error() {
    let err = EngineConfig::load(std::path::Path::new("/nonexistent/reschedule.toml")).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

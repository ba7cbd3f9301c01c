//! Session lifecycle tests against the in-memory dbserver

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use mke_client::session::{AnalysisSession, ExperimentSession, SessionCore};
use mke_client::time::{make_zulu_str, utc_now};
use mke_client::transport::{HttpResponse, MemoryServer};
use mke_client::{Config, Error, Status};
use serde_json::json;

const URI: &str = "http://localhost:8080";

fn server_with_experiment(id: i64, start_offset: TimeDelta, hours: f64) -> Arc<MemoryServer> {
    let server = Arc::new(MemoryServer::new("/data/mke"));
    server
        .insert_row(
            "experiments",
            id,
            json!({
                "status": "WAITING_TO_RUN",
                "start_condition": make_zulu_str(&(utc_now() + start_offset)),
                "duration_expected_hr_dec": hours,
                "devices_json": "[\"WTR\", \"RFC\"]",
                "antenna_id": "test_antenna",
            }),
        )
        .unwrap();
    server
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_construction_resolves_uri_from_lookup() {
    let server = MemoryServer::default();
    let config = Config::from_lookup(|key| (key == "DBSERVER_URI").then(|| URI.to_string()));
    let experiment = ExperimentSession::new(1, &config, &server).unwrap();
    assert_eq!(experiment.core().base_uri(), URI);
    assert!(server.requests().is_empty(), "construction must not do I/O");
}

#[test]
fn test_construction_without_uri_is_configuration_error() {
    let server = MemoryServer::default();
    let config = Config::from_lookup(|_| None);
    assert!(matches!(
        ExperimentSession::new(1, &config, &server),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        AnalysisSession::new(1, &config, &server),
        Err(Error::Configuration(_))
    ));
}

// =============================================================================
// Status transitions and cancellation polling
// =============================================================================

#[test]
fn test_end_to_end_cancel_scenario() {
    let server = server_with_experiment(1, TimeDelta::zero(), 1.0);
    let experiment = ExperimentSession::with_uri(1, URI, Arc::clone(&server)).unwrap();

    let row = experiment.set_status_running().unwrap();
    assert_eq!(row.status().unwrap(), Status::Running);
    assert!(!experiment.check_for_cancel().unwrap());

    // Another actor requests a cancel through the same surface.
    assert!(server.set_status("experiments", 1, "CANCELLING"));
    assert!(experiment.check_for_cancel().unwrap());

    let row = experiment.set_status_cancelling().unwrap();
    assert_eq!(row.status_literal().unwrap(), "CANCELLING");

    let row = experiment.set_status_cancelled().unwrap();
    assert_eq!(row.status().unwrap(), Status::Cancelled);
    assert!(experiment.check_for_cancel().unwrap());
}

#[test]
fn test_set_status_sends_single_patch() {
    let server = server_with_experiment(1, TimeDelta::zero(), 1.0);
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();

    experiment.set_status_finishing().unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "PATCH");
    assert_eq!(requests[0].path, "/experiments/1");
    assert_eq!(requests[0].body, Some(json!({"status": "FINISHING"})));
}

#[test]
fn test_set_unknown_status_without_override_is_validation_error() {
    let server = server_with_experiment(1, TimeDelta::zero(), 1.0);
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();

    let result = experiment.set_status_str("NOT_A_STATUS", false);
    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(server.requests().is_empty(), "no PATCH may be sent");
}

#[test]
fn test_set_unknown_status_with_override_patches_unchanged() {
    let server = server_with_experiment(1, TimeDelta::zero(), 1.0);
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();

    let row = experiment.set_status_str("NOT_A_STATUS", true).unwrap();
    assert_eq!(row.status_literal().unwrap(), "NOT_A_STATUS");
    assert_eq!(
        server.last_request().unwrap().body,
        Some(json!({"status": "NOT_A_STATUS"}))
    );

    // The server now holds a literal outside the registry: schema drift.
    assert!(matches!(
        experiment.check_for_cancel(),
        Err(Error::DataIntegrity(_))
    ));
}

#[test]
fn test_patch_rejected_surfaces_remote_error() {
    let server = server_with_experiment(1, TimeDelta::zero(), 1.0);
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();

    server.fail_next(HttpResponse::new(409, "locked by operator"));
    match experiment.set_status_running() {
        Err(Error::Remote { status, body }) => {
            assert_eq!(status, 409);
            assert_eq!(body, "locked by operator");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[test]
fn test_get_404_preserves_code_and_body() {
    let server = MemoryServer::default();
    let experiment = ExperimentSession::with_uri(99, URI, &server).unwrap();

    let err = experiment.get().unwrap_err();
    assert_eq!(err.status_code(), Some(404));
    match err {
        Error::Remote { body, .. } => assert!(body.contains("experiments/99 not found")),
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[test]
fn test_every_accessor_refetches() {
    let server = server_with_experiment(1, TimeDelta::zero(), 1.0);
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();

    assert_eq!(experiment.status().unwrap(), Status::WaitingToRun);
    server.set_status("experiments", 1, "HOLD");
    assert_eq!(experiment.status().unwrap(), Status::Hold);
    assert_eq!(server.requests().len(), 2);
}

// =============================================================================
// Remaining time
// =============================================================================

#[test]
fn test_remaining_time_clamped_to_zero() {
    let server = server_with_experiment(1, TimeDelta::hours(-2), 1.0);
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();

    let now = utc_now();
    assert!(experiment.remaining_time_hours(now).unwrap().abs() < f64::EPSILON);
    assert_eq!(experiment.remaining_time(now).unwrap(), TimeDelta::zero());
    assert!(experiment.should_stop(now, Duration::from_secs(10)).unwrap());
}

#[test]
fn test_remaining_time_in_hours() {
    let server = server_with_experiment(1, TimeDelta::zero(), 2.0);
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();

    let row = experiment.get().unwrap();
    let start = row.start_condition().unwrap();
    let now = start + TimeDelta::minutes(30);

    let hours = experiment.remaining_time_hours(now).unwrap();
    assert!((hours - 1.5).abs() < 1e-9, "got {hours}");
    assert_eq!(experiment.remaining_time(now).unwrap(), TimeDelta::minutes(90));
}

#[test]
fn test_should_stop_uses_tick_safety_margin() {
    let server = server_with_experiment(1, TimeDelta::zero(), 1.0);
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();
    let end = experiment.get().unwrap().expected_end().unwrap();
    let tick = Duration::from_secs(10);

    // 10.5 s left: more than one tick but inside the margin.
    assert!(experiment
        .should_stop(end - TimeDelta::milliseconds(10_500), tick)
        .unwrap());
    // 12 s left: more than 1.1 ticks.
    assert!(!experiment.should_stop(end - TimeDelta::seconds(12), tick).unwrap());
}

#[test]
fn test_remaining_time_unparsable_start_is_data_integrity_error() {
    let server = server_with_experiment(1, TimeDelta::zero(), 1.0);
    server.set_field("experiments", 1, "start_condition", json!("next tuesday"));
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();

    assert!(matches!(
        experiment.remaining_time_hours(utc_now()),
        Err(Error::DataIntegrity(_))
    ));
}

// =============================================================================
// Start condition
// =============================================================================

#[test]
fn test_wait_for_past_start_condition_returns_immediately() {
    let server = server_with_experiment(1, TimeDelta::hours(-1), 1.0);
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();

    assert_eq!(experiment.time_until_start(utc_now()).unwrap(), Duration::ZERO);
    let started = std::time::Instant::now();
    experiment.wait_for_start_condition().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_wait_for_future_start_condition_blocks() {
    let server = server_with_experiment(1, TimeDelta::seconds(2), 1.0);
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();

    let start = experiment.start_condition().unwrap();
    experiment.wait_for_start_condition().unwrap();
    assert!(utc_now() >= start);
}

// =============================================================================
// Related rows
// =============================================================================

#[test]
fn test_expected_devices() {
    let server = server_with_experiment(1, TimeDelta::zero(), 1.0);
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();
    assert_eq!(experiment.get_expected_devices().unwrap(), vec!["WTR", "RFC"]);

    server.set_field("experiments", 1, "devices_json", json!("not json"));
    assert!(matches!(
        experiment.get_expected_devices(),
        Err(Error::DataIntegrity(_))
    ));
}

#[test]
fn test_get_antenna_follows_antenna_id() {
    let server = server_with_experiment(1, TimeDelta::zero(), 1.0);
    server
        .insert_row("antennas", "test_antenna", json!({"name": "dish"}))
        .unwrap();
    server.insert_row("antennas", 2, json!({"name": "horn"})).unwrap();
    let experiment = ExperimentSession::with_uri(1, URI, &*server).unwrap();

    let antenna = experiment.get_antenna().unwrap();
    assert_eq!(antenna.get("name"), Some(&json!("dish")));
    assert_eq!(server.last_request().unwrap().path, "/antennas/test_antenna");

    server.set_field("experiments", 1, "antenna_id", json!(2));
    let antenna = experiment.get_antenna().unwrap();
    assert_eq!(antenna.get("name"), Some(&json!("horn")));

    server.set_field("experiments", 1, "antenna_id", json!("missing"));
    assert_eq!(experiment.get_antenna().unwrap_err().status_code(), Some(404));

    server.set_field("experiments", 1, "antenna_id", json!(null));
    assert!(matches!(
        experiment.get_antenna(),
        Err(Error::DataIntegrity(_))
    ));
}

#[test]
fn test_analysis_lifecycle() {
    let server = MemoryServer::default();
    server
        .insert_row("analyses", 5, json!({"status": "STARTING"}))
        .unwrap();
    let analysis = AnalysisSession::with_uri(5, URI, &server).unwrap();

    analysis.set_status_running().unwrap();
    assert!(!analysis.check_for_cancel().unwrap());
    analysis.set_status_failed().unwrap();
    assert!(analysis.check_for_cancel().unwrap());
    assert_eq!(analysis.status().unwrap(), Status::Failed);
}

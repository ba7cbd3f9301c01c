//! Experiment Driver Example
//!
//! A remote execution script that drives one experiment against an
//! in-memory dbserver: wait for the start condition, poll for a cancel
//! each tick, register measurement files, and finish cleanly.
//!
//! Run with: RUST_LOG=mke_client=debug cargo run --example experiment_driver

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use mke_client::session::{ExperimentSession, SessionCore};
use mke_client::time::{make_zulu_str, utc_now};
use mke_client::transport::MemoryServer;
use mke_client::Status;
use tracing_subscriber::EnvFilter;

const EXPERIMENT_ID: i64 = 1;
const TICK: Duration = Duration::from_millis(200);
const CANCEL_AFTER_TICKS: usize = 5;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== mke-client Experiment Driver ===\n");

    // -------------------------------------------------------------------------
    // 1. Seed the server with a scheduled experiment
    // -------------------------------------------------------------------------
    let server = Arc::new(MemoryServer::new("/data/mke"));
    server.insert_row(
        "experiments",
        EXPERIMENT_ID,
        serde_json::json!({
            "status": "WAITING_TO_RUN",
            "start_condition": make_zulu_str(&utc_now()),
            "duration_expected_hr_dec": 0.01,
            "devices_json": "[\"WTR\", \"RFC\"]",
        }),
    )?;

    let experiment = ExperimentSession::with_uri(
        EXPERIMENT_ID,
        "http://localhost:8080",
        Arc::clone(&server),
    )?;

    // -------------------------------------------------------------------------
    // 2. Wait for the start condition and start running
    // -------------------------------------------------------------------------
    println!("1. Waiting for start condition {}...", experiment.start_condition()?);
    experiment.wait_for_start_condition()?;
    experiment.set_status(Status::Starting)?;
    experiment.set_status_running()?;

    // -------------------------------------------------------------------------
    // 3. Register files for the first measurement
    // -------------------------------------------------------------------------
    let devices = experiment
        .get_expected_devices()
        .context("experiment row lists no devices")?;
    let files = experiment.register_main_and_aux_files(devices, None, Some("run"))?;
    println!("2. Main data file: {}", files.path);
    for aux in &files.aux_files {
        println!("   Aux file {}: {}", aux.key, aux.path);
    }

    // -------------------------------------------------------------------------
    // 4. Poll until cancelled or out of time
    // -------------------------------------------------------------------------
    println!("3. Polling every {TICK:?}...");
    let mut ticks = 0;
    let cancelled = loop {
        if experiment.check_for_cancel()? {
            break true;
        }
        if experiment.should_stop(utc_now(), TICK)? {
            break false;
        }

        ticks += 1;
        if ticks == CANCEL_AFTER_TICKS {
            // An operator cancels the run from the web interface.
            server.set_status("experiments", EXPERIMENT_ID, Status::Cancelling.as_str());
        }
        thread::sleep(TICK);
    };

    // -------------------------------------------------------------------------
    // 5. Report the outcome
    // -------------------------------------------------------------------------
    if cancelled {
        experiment.set_status_cancelled()?;
    } else {
        experiment.set_status_finishing()?;
        experiment.set_status_finished()?;
    }
    println!(
        "4. Stopped after {ticks} ticks with status {}",
        experiment.status()?
    );

    let requests = server.requests();
    println!("\n{} requests sent to the dbserver", requests.len());
    Ok(())
}

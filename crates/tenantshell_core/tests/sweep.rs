mod common;

use common::{harness, running};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tenantshell_core::kernel::{BackgroundSweep, SweepOptions, SweepOutcome};
use tenantshell_core::model::tenant::{TenantRecord, TenantState};
use tenantshell_core::WorkContextAccessor;

fn sweep_for(h: &common::Harness, interval: Duration) -> Arc<BackgroundSweep> {
    let accessor = Arc::new(WorkContextAccessor::new(Arc::clone(&h.kernel)));
    Arc::new(BackgroundSweep::new(accessor, SweepOptions { interval }))
}

#[test]
fn sweeps_every_available_tenant_and_records_failures() {
    let disabled = TenantRecord::new("Gone")
        .unwrap()
        .with_state(TenantState::Disabled);
    let h = harness(vec![running("Acme"), running("Beta"), disabled]);
    h.enable("Acme", &["tasks"]);
    h.enable("Beta", &["broken"]);
    let sweep = sweep_for(&h, Duration::from_secs(60));

    let SweepOutcome::Completed(report) = sweep.run_once() else {
        panic!("sweep should not be skipped");
    };

    assert_eq!(report.tenants, 2);
    assert_eq!(report.tasks_run, 2);
    assert_eq!(h.tally.tasks_run.load(Ordering::SeqCst), 1);
    assert_eq!(report.failures.len(), 2);

    let task_failure = report
        .failures
        .iter()
        .find(|failure| failure.tenant == "Acme")
        .unwrap();
    assert_eq!(task_failure.task.as_deref(), Some("failing"));
    assert_eq!(task_failure.message, "cannot sweep Acme");

    let tenant_failure = report
        .failures
        .iter()
        .find(|failure| failure.tenant == "Beta")
        .unwrap();
    assert_eq!(tenant_failure.task, None);
}

#[test]
fn overlapping_sweep_is_skipped() {
    let h = harness(vec![running("Acme")]);
    h.enable("Acme", &["gated"]);
    let sweep = sweep_for(&h, Duration::from_secs(60));

    let background = Arc::clone(&sweep);
    let running_sweep = thread::spawn(move || background.run_once());

    h.tally.gate.wait();
    assert_eq!(sweep.run_once(), SweepOutcome::Skipped);
    h.tally.gate.wait();

    let outcome = running_sweep.join().unwrap();
    assert!(matches!(outcome, SweepOutcome::Completed(report) if report.tasks_run == 1));
}

#[test]
fn started_sweep_runs_periodically_until_stopped() {
    let h = harness(vec![running("Acme")]);
    h.enable("Acme", &["tasks"]);
    let sweep = sweep_for(&h, Duration::from_millis(10));

    let handle = sweep.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.tally.tasks_run.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    handle.stop();

    let after_stop = h.tally.tasks_run.load(Ordering::SeqCst);
    assert!(after_stop >= 2);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.tally.tasks_run.load(Ordering::SeqCst), after_stop);
}

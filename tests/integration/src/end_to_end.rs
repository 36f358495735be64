//! End-to-end scenarios across configuration, scheduling and summaries
//!
//! Each test wires the crates together the way the `mirror` binary does:
//! config file -> scheduler -> workers -> tracing -> rotation engine ->
//! mailer, with a recording mailer and a manual clock in place of the real
//! collaborators.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mirror_core::{Scheduler, WorkerOutcome};
use mirror_meta::Config;
use mirror_summary::{
    ManualClock, RotationEngine, RotationSettings, SummaryGroup, SummaryWriter,
};
use mirror_test_utils::{FakeTool, RecordingMailer, TEST_GROUP, TestWorkspace};
use pretty_assertions::assert_eq;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;

fn engine(
    config: &Config,
    mailer: &RecordingMailer,
    clock: &ManualClock,
) -> RotationEngine {
    let mut settings = RotationSettings::from_config(&config.summary);
    settings.sender = "mirror@test".to_string();
    RotationEngine::new(
        SummaryGroup::new(config.summary.group.clone()),
        settings,
        &config.defaults.summary_file,
        &config.defaults.log_state,
        Arc::new(mailer.clone()),
        Arc::new(clock.clone()),
    )
    .unwrap()
}

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2026, 9, 1, 2, 0, 0).unwrap())
}

fn summary_subscriber(writer: SummaryWriter) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(tracing_subscriber::filter::LevelFilter::WARN),
    )
}

#[tokio::test]
async fn test_tool_errors_are_mailed_in_next_summary() {
    let ws = TestWorkspace::new();
    let tool = FakeTool::exit_with(&ws.tools(), 23);
    let config = Config::load(&ws.write_config(&tool, &["fedora", "epel"], 1)).unwrap();
    let mailer = RecordingMailer::new();
    let writer = SummaryWriter::new(engine(&config, &mailer, &clock()));

    let report = {
        let _guard = tracing::subscriber::set_default(summary_subscriber(writer.clone()));
        Scheduler::from_config(&config, false)
            .unwrap()
            .with_poll_interval(Duration::from_millis(20))
            .run_jobs()
            .await
            .unwrap()
    };
    writer.force_rotate().unwrap();

    for name in ["fedora", "epel"] {
        assert!(
            matches!(report.outcome(name), Some(WorkerOutcome::Completed(r)) if r.code() == 23)
        );
    }
    assert_eq!(mailer.count(), 1);
    let message = mailer.last();
    assert_eq!(message.subject, format!("Mirror Activity Summary for {}", TEST_GROUP));
    assert_eq!(message.recipients, vec!["root".to_string()]);
    assert!(message.body.contains("Reason for Notification:  forced"));
    assert_eq!(message.body.matches("failing").count(), 2, "{}", message.body);
    assert!(!message.body.contains("starting"), "{}", message.body);
}

#[tokio::test]
async fn test_clean_run_reports_status_good() {
    let ws = TestWorkspace::new();
    let tool = FakeTool::echo_args(&ws.tools());
    let config = Config::load(&ws.write_config(&tool, &["fedora"], 1)).unwrap();
    let mailer = RecordingMailer::new();
    let writer = SummaryWriter::new(engine(&config, &mailer, &clock()));

    {
        let _guard = tracing::subscriber::set_default(summary_subscriber(writer.clone()));
        Scheduler::from_config(&config, false)
            .unwrap()
            .run_jobs()
            .await
            .unwrap();
    }
    writer.force_rotate().unwrap();

    assert!(mailer.last().body.ends_with("STATUS GOOD!  No warnings or errors to summarize."));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_runs_never_share_a_mirror() {
    let ws = TestWorkspace::new();
    let tool = FakeTool::sleeper(&ws.tools(), 1);
    let config = Config::load(&ws.write_config(&tool, &["a", "b", "c"], 3)).unwrap();

    let first = Scheduler::from_config(&config, false)
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));
    let second = Scheduler::from_config(&config, false)
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));
    let (first, second) = tokio::join!(first.run_jobs(), second.run_jobs());
    let (first, second) = (first.unwrap(), second.unwrap());

    for name in ["a", "b", "c"] {
        let outcomes = [first.outcome(name).unwrap(), second.outcome(name).unwrap()];
        let ran = outcomes
            .iter()
            .filter(|o| matches!(o, WorkerOutcome::Completed(_)))
            .count();
        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o, WorkerOutcome::Skipped))
            .count();
        // Both may run back to back if one finishes first; never together
        assert!(ran >= 1 && ran + skipped == 2, "{}: {:?}", name, outcomes);
    }
    assert_eq!(std::fs::read_dir(ws.locks()).unwrap().count(), 0);
}

#[test]
fn test_age_summary_spans_restart() {
    let ws = TestWorkspace::new();
    let tool = FakeTool::echo_args(&ws.tools());
    let config = Config::load(&ws.write_config(&tool, &[], 1)).unwrap();
    let mailer = RecordingMailer::new();
    let clock = clock();

    {
        let mut first = engine(&config, &mailer, &clock);
        first.write_record(b"WARN fedora: partial transfer\n").unwrap();
    }
    clock.advance(chrono::Duration::seconds(config.summary.interval as i64 + 1));

    let mut second = engine(&config, &mailer, &clock);
    let message = second.rotate_if_due().unwrap().expect("interval has elapsed");

    assert!(message.body.contains("Reason for Notification:  age of logged messages"));
    assert!(message.body.contains("WARN fedora: partial transfer"));
    assert_eq!(mailer.count(), 1);
    assert!(second.rotate_if_due().unwrap().is_none());
}

//! Benchmark Orchestrator and reporting scenarios (thread strategy only;
//! process sweeps are covered next to the worker binary)

use std::time::Duration;

use rollbench::config::{Config, OutputFormat};
use rollbench::engine::Backend;
use rollbench::monitoring::ResourceMonitor;
use rollbench::orchestrator::{BenchmarkOrchestrator, Configuration, RowStatus, SweepPlan};
use rollbench::pool::{ErrorPolicy, Strategy};
use rollbench::report;
use rollbench::HarnessError;
use rollbench_tests::{strings, test_setup, TestDataGenerator};

fn thread_plan(keys: &[&str], policy: ErrorPolicy) -> SweepPlan {
    SweepPlan {
        configurations: Configuration::matrix(&[Strategy::Threads], &Backend::ALL),
        keys: strings(keys),
        columns: strings(&["price"]),
        window: 5,
        workers: Some(2),
        policy,
    }
}

fn orchestrator() -> BenchmarkOrchestrator {
    BenchmarkOrchestrator::new(ResourceMonitor::new(Duration::from_millis(5)))
}

#[test]
fn sweep_rows_follow_configuration_order() {
    test_setup!();
    let ds = TestDataGenerator::default().generate();
    let plan = thread_plan(&["A", "B", "C"], ErrorPolicy::CollectAll);

    let report = orchestrator().run_sweep(&ds, &plan, |_| {}).unwrap();

    let labels: Vec<&str> = report.summary.rows.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["thread-parallel / rowwise", "thread-parallel / streaming"]);
    assert_eq!(report.summary.rows_in_dataset, ds.len());
    assert_eq!(report.summary.workers, Some(2));
    assert!(report.summary.host.logical_cpus >= 1);

    for configuration in &plan.configurations {
        let results = report.results_for(configuration).unwrap();
        assert_eq!(results.keys(), vec!["A", "B", "C"]);
        let row = report.summary.row(configuration).unwrap();
        match &row.status {
            RowStatus::Completed { partitions, failed_partitions, compute_seconds, median_partition_seconds } => {
                assert_eq!(*partitions, 3);
                assert_eq!(*failed_partitions, 0);
                assert!(*compute_seconds >= 0.0);
                assert!(median_partition_seconds.is_some());
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }
}

#[test]
fn failing_configuration_does_not_stop_sweep() {
    test_setup!();
    let ds = TestDataGenerator::default().generate();
    let plan = thread_plan(&["A", "MISSING"], ErrorPolicy::FailFast);
    let mut reported = 0;

    let report = orchestrator()
        .run_sweep(&ds, &plan, |_| reported += 1)
        .unwrap();

    assert_eq!(reported, 2);
    assert_eq!(report.summary.rows.len(), 2);
    assert_eq!(report.summary.failed_rows().count(), 2);
    assert!(report.summary.rows[0].error().unwrap().contains("MISSING"));
}

#[test]
fn duplicate_configuration_is_rejected() {
    test_setup!();
    let ds = TestDataGenerator::default().generate();
    let mut plan = thread_plan(&["A"], ErrorPolicy::CollectAll);
    plan.configurations.push(Configuration::new(Strategy::Threads, Backend::Rowwise));

    let err = orchestrator().run_sweep(&ds, &plan, |_| {}).unwrap_err();
    assert!(matches!(err, HarnessError::Configuration(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn plan_from_config_honors_symbol_subset() {
    test_setup!();
    let ds = TestDataGenerator::default().generate();
    let mut config = Config::default();
    config.data.symbols = strings(&["C", "A"]);
    config.sweep.strategies = vec![Strategy::Threads];
    config.sweep.window = 7;

    let plan = SweepPlan::from_config(&config, &ds);
    assert_eq!(plan.keys, vec!["C", "A"]);
    assert_eq!(plan.configurations.len(), 2);
    assert_eq!(plan.window, 7);

    let report = orchestrator().run_sweep(&ds, &plan, |_| {}).unwrap();
    assert!(report.summary.rows.iter().all(|r| !r.is_failed()));
}

#[test]
fn summary_renders_in_every_format() {
    test_setup!();
    let ds = TestDataGenerator::default().generate();
    let report = orchestrator()
        .run_sweep(&ds, &thread_plan(&["A", "B"], ErrorPolicy::CollectAll), |_| {})
        .unwrap();

    let mut table = Vec::new();
    report::render(&report.summary, OutputFormat::Table, &mut table).unwrap();
    let text = String::from_utf8(table).unwrap();
    assert!(text.contains("thread-parallel / streaming"));

    let mut json = Vec::new();
    report::render(&report.summary, OutputFormat::Json, &mut json).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(value["rows"].as_array().unwrap().len(), 2);

    let mut csv = Vec::new();
    report::render(&report.summary, OutputFormat::Csv, &mut csv).unwrap();
    assert_eq!(String::from_utf8(csv).unwrap().lines().count(), 3);

    let dir = tempfile::tempdir().unwrap();
    let written = report::save_summary(&report.summary, dir.path()).unwrap();
    assert!(written.iter().all(|p| p.exists()));
}

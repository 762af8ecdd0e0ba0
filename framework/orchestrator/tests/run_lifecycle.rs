#![cfg(unix)]

use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use siteload_orchestrator::prelude::*;

const STATS_FIXTURE: &str = "\
Type,Name,Request Count,Failure Count,50%,95%,Max,Average (ms),Requests/s
GET,[GET] /,100,2,40,100,220,55.5,10.5
GET,[GET] /about,50,3,60,130,400,70.2,5.2
,Aggregated,150,5,45,110,400,60.0,15.7
";

const HISTORY_FIXTURE: &str = "\
Timestamp,User Count,Name,Requests/s,Failures/s,50%,95%,99%
1700000000,5,Aggregated,2.5,0.0,40,90,120
1700000001,10,Aggregated,3.0,0.5,45,95,130
";

fn write_engine_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-engine.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn write_result_fixtures(dir: &Path) {
    std::fs::write(dir.join("rapport_stats.csv"), STATS_FIXTURE).unwrap();
    std::fs::write(dir.join("rapport_stats_history.csv"), HISTORY_FIXTURE).unwrap();
}

fn config_for(dir: &Path, engine: PathBuf) -> ScanConfig {
    ScanConfig {
        engine_path: Some(engine),
        csv_dir: dir.to_path_buf(),
        csv_prefix: "rapport".to_string(),
        watchdog_ceiling_secs: 30,
        ..ScanConfig::default()
    }
}

#[test]
fn successful_run_ends_done_with_urls_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    write_result_fixtures(dir.path());
    let engine = write_engine_script(
        dir.path(),
        r#"echo "  [CRAWL] Analyse de : https://example.com"
echo "    - /"
echo "    - /about"
echo "    - /contact"
echo "    - /about"
echo "  3 URL(s) utilisees pour le test de charge."
echo "load test chatter"
exit 0
"#,
    );

    let scanner = Scanner::new(config_for(dir.path(), engine), None);
    scanner.start("https://example.com", None).unwrap();
    scanner.join();

    let ctx = scanner.context();
    assert_eq!(ctx.status(), ScanStatus::Done);
    // Echo lines populate the discovered set in emission order, deduplicated.
    assert_eq!(ctx.discovered(), vec!["/", "/about", "/contact"]);

    let stats = ctx.stats().expect("stats should have been parsed");
    assert_eq!(stats.aggregate.requests, 150);
    assert_eq!(stats.aggregate.failures, 5);
    assert_eq!(stats.aggregate.failure_rate_pct, 3.33);
    assert_eq!(stats.endpoints.len(), 2);
    assert_eq!(stats.history.len(), 2);

    let (_, logs) = ctx.snapshot();
    assert!(logs
        .iter()
        .any(|line| line.contains("URL(s) utilisees pour le test de charge")));
    assert!(logs.iter().any(|line| line.contains("[TERMINÉ]")));
}

#[test]
fn nonzero_exit_without_results_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = write_engine_script(
        dir.path(),
        r#"echo "something went wrong"
exit 1
"#,
    );

    let scanner = Scanner::new(config_for(dir.path(), engine), None);
    scanner.start("https://example.com", None).unwrap();
    scanner.join();

    assert_eq!(scanner.context().status(), ScanStatus::Error);
    assert!(scanner.context().stats().is_none());
}

#[test]
fn nonzero_exit_with_parsable_results_is_still_done() {
    let dir = tempfile::tempdir().unwrap();
    write_result_fixtures(dir.path());
    let engine = write_engine_script(
        dir.path(),
        r#"echo "  1 URL(s) utilisees pour le test de charge."
exit 7
"#,
    );

    let scanner = Scanner::new(config_for(dir.path(), engine), None);
    scanner.start("https://example.com", None).unwrap();
    scanner.join();

    assert_eq!(scanner.context().status(), ScanStatus::Done);
    assert!(scanner.context().stats().is_some());
}

#[test]
fn missing_engine_binary_is_a_fatal_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), dir.path().join("does-not-exist"));

    let scanner = Scanner::new(config, None);
    scanner.start("https://example.com", None).unwrap();
    scanner.join();

    assert_eq!(scanner.context().status(), ScanStatus::Error);
}

#[test]
fn watchdog_terminates_a_hung_engine() {
    let dir = tempfile::tempdir().unwrap();
    write_result_fixtures(dir.path());
    let engine = write_engine_script(
        dir.path(),
        r#"echo "  1 URL(s) utilisees pour le test de charge."
exec sleep 30
"#,
    );

    let mut config = config_for(dir.path(), engine);
    config.watchdog_ceiling_secs = 1;

    let scanner = Scanner::new(config, None);
    let started = std::time::Instant::now();
    scanner.start("https://example.com", None).unwrap();
    scanner.join();

    // The kill is an abrupt but ordinary exit: results were on disk, so the
    // run still counts as done.
    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(scanner.context().status(), ScanStatus::Done);
    assert!(scanner.context().stats().is_some());
}

#[test]
fn second_start_while_active_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_result_fixtures(dir.path());
    let engine = write_engine_script(
        dir.path(),
        r#"echo "  1 URL(s) utilisees pour le test de charge."
exec sleep 5
"#,
    );

    let scanner = Scanner::new(config_for(dir.path(), engine), None);
    scanner.start("https://example.com", None).unwrap();

    let rejected = scanner.start("https://other.example", None);
    assert!(rejected.is_err());
    // The first run's target is untouched.
    assert_eq!(scanner.context().domain(), "https://example.com");

    // Give the worker time to spawn the child so the stop has a target.
    std::thread::sleep(Duration::from_millis(500));
    scanner.stop();
    scanner.join();
    assert!(scanner.context().status().is_terminal());
}

#[test]
fn successful_owned_run_is_offered_to_the_store() {
    let dir = tempfile::tempdir().unwrap();
    write_result_fixtures(dir.path());
    let engine = write_engine_script(
        dir.path(),
        r#"echo "  1 URL(s) utilisees pour le test de charge."
exit 0
"#,
    );

    let store_path = dir.path().join("scans.jsonl");
    let store = Arc::new(JsonLinesStore::new(&store_path));
    let scanner = Scanner::new(config_for(dir.path(), engine), Some(store));
    scanner.start("https://example.com", Some("user-1")).unwrap();
    scanner.join();

    assert_eq!(scanner.context().status(), ScanStatus::Done);
    let content = std::fs::read_to_string(&store_path).unwrap();
    let record: ScanRecord = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(record.domain, "https://example.com");
    assert_eq!(record.owner_id, "user-1");
    assert_eq!(record.total_requests, 150);
    assert_eq!(record.error_rate, 3.33);
}

#[test]
fn anonymous_runs_are_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    write_result_fixtures(dir.path());
    let engine = write_engine_script(
        dir.path(),
        r#"echo "  1 URL(s) utilisees pour le test de charge."
exit 0
"#,
    );

    let store_path = dir.path().join("scans.jsonl");
    let store = Arc::new(JsonLinesStore::new(&store_path));
    let scanner = Scanner::new(config_for(dir.path(), engine), Some(store));
    scanner.start("https://example.com", None).unwrap();
    scanner.join();

    assert_eq!(scanner.context().status(), ScanStatus::Done);
    assert!(!store_path.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribers_observe_the_full_status_sequence() {
    let dir = tempfile::tempdir().unwrap();
    write_result_fixtures(dir.path());
    let engine = write_engine_script(
        dir.path(),
        r#"echo "    - /"
echo "  1 URL(s) utilisees pour le test de charge."
echo "  1 URL(s) utilisees pour le test de charge."
exit 0
"#,
    );

    let scanner = Arc::new(Scanner::new(config_for(dir.path(), engine), None));
    let mut receiver = scanner.subscribe().await.unwrap();

    scanner.start("https://example.com", None).unwrap();
    let joiner = scanner.clone();
    tokio::task::spawn_blocking(move || joiner.join())
        .await
        .unwrap();

    let mut statuses = Vec::new();
    let mut logs = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(500), receiver.recv()).await
    {
        match event {
            Event::Status(status) => statuses.push(status),
            Event::Log(line) => logs.push(line),
        }
    }

    // Duplicate marker lines must not produce a second `running` transition.
    assert_eq!(
        statuses,
        vec![
            ScanStatus::Idle,
            ScanStatus::Crawling,
            ScanStatus::Running,
            ScanStatus::Done
        ]
    );
    assert!(logs.iter().any(|line| line.contains("[DÉMARRAGE]")));
    assert!(logs.iter().any(|line| line.contains("[TERMINÉ]")));
}

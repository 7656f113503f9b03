//! Active run resolution and file access on real directories.

use filetime::{set_file_mtime, FileTime};
use pretty_assertions::assert_eq;
use querygate::error::GatewayError;
use querygate::runs::{self, RunPhase, RunTracker};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

fn make_run(base: &Path, name: &str, age: Duration) -> std::path::PathBuf {
    let dir = base.join(name);
    fs::create_dir_all(&dir).unwrap();
    let mtime = SystemTime::now() - age;
    set_file_mtime(&dir, FileTime::from_system_time(mtime)).unwrap();
    dir
}

#[test]
fn test_run_started_after_stamp_wins() {
    let base = tempfile::tempdir().unwrap();
    make_run(base.path(), "run_A", Duration::from_secs(3600));

    let tracker = RunTracker::new();
    let stamp = tracker.stamp_start();

    let run_b = base.path().join("run_B");
    fs::create_dir(&run_b).unwrap();
    set_file_mtime(
        &run_b,
        FileTime::from_system_time(stamp + Duration::from_secs(1)),
    )
    .unwrap();

    assert_eq!(tracker.resolve_active(base.path()), Some(run_b.clone()));
    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.phase, RunPhase::Resolved);
    assert_eq!(snapshot.active_run, Some(run_b));
}

#[test]
fn test_falls_back_to_newest_directory() {
    let base = tempfile::tempdir().unwrap();
    make_run(base.path(), "run_A", Duration::from_secs(7200));
    let newer = make_run(base.path(), "run_B", Duration::from_secs(3600));

    let tracker = RunTracker::new();
    tracker.stamp_start();

    assert_eq!(tracker.resolve_active(base.path()), Some(newer));
}

#[test]
fn test_new_stamp_forgets_previous_run() {
    let base = tempfile::tempdir().unwrap();
    let old = make_run(base.path(), "run_A", Duration::from_secs(60));

    let tracker = RunTracker::new();
    assert_eq!(tracker.resolve_active(base.path()), Some(old));

    let stamp = tracker.stamp_start();
    assert_eq!(tracker.snapshot().phase, RunPhase::Started);

    let fresh = base.path().join("run_C");
    fs::create_dir(&fresh).unwrap();
    set_file_mtime(
        &fresh,
        FileTime::from_system_time(stamp + Duration::from_secs(1)),
    )
    .unwrap();

    assert_eq!(tracker.resolve_active(base.path()), Some(fresh));
}

#[test]
fn test_missing_base_has_no_run() {
    let tracker = RunTracker::new();
    assert_eq!(tracker.resolve_active(Path::new("/nonexistent/querygate-outputs")), None);
}

#[test]
fn test_files_inside_run() {
    let base = tempfile::tempdir().unwrap();
    let run = make_run(base.path(), "run_A", Duration::from_secs(10));
    fs::create_dir(run.join("tables")).unwrap();
    fs::write(run.join("summary.csv"), "a\n1\n").unwrap();
    fs::write(run.join("tables").join("detail.CSV"), "b\n2\n").unwrap();
    fs::write(run.join("Validation.md"), "# All checks passed").unwrap();

    let data = runs::list_data_files(&run, &["csv".to_string()]);
    assert_eq!(data, vec!["summary.csv", "tables/detail.CSV"]);

    let path = runs::resolve_file(&run, "tables/detail.CSV").unwrap();
    assert!(path.ends_with("detail.CSV"));
    assert_eq!(fs::read(&path).unwrap(), b"b\n2\n");

    assert_eq!(
        runs::validation_report(&run).as_deref(),
        Some("# All checks passed")
    );
}

#[test]
fn test_traversal_and_missing_files() {
    let base = tempfile::tempdir().unwrap();
    let run = make_run(base.path(), "run_A", Duration::from_secs(10));
    fs::write(base.path().join("secret.txt"), "outside").unwrap();

    assert!(matches!(
        runs::resolve_file(&run, "../secret.txt"),
        Err(GatewayError::PathTraversalRejected(_))
    ));
    assert!(matches!(
        runs::resolve_file(&run, "missing.csv"),
        Err(GatewayError::NotFound(_))
    ));
}

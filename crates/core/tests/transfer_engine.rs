use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use teleshare_core::config::SmbSettings;
use teleshare_core::{
    InMemoryShare, ProbeFailurePolicy, RemoteShareConfig, SessionManager, TransferEngine,
    TransferOptions, TransferRequest,
};
use tempfile::TempDir;

fn noon() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn share_config(backup_directory: &str) -> RemoteShareConfig {
    RemoteShareConfig::from_settings(&SmbSettings {
        username: Some("backup".to_string()),
        password: Some("secret".to_string()),
        server: Some("192.0.2.10".to_string()),
        share: Some("archive".to_string()),
        backup_directory: backup_directory.to_string(),
        ..SmbSettings::default()
    })
    .unwrap()
}

fn engine(
    share: &InMemoryShare,
    backup_directory: &str,
    on_probe_failure: ProbeFailurePolicy,
) -> TransferEngine<InMemoryShare> {
    TransferEngine::new(
        SessionManager::new(share_config(backup_directory), share.clone()),
        TransferOptions {
            on_probe_failure,
            now: Some(noon()),
        },
    )
}

fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[tokio::test]
async fn uploaded_bytes_match_the_local_file() {
    let temp = TempDir::new().unwrap();
    let bytes: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let local = write_file(temp.path(), "payload", &bytes);

    let share = InMemoryShare::new();
    let engine = engine(&share, "/backups", ProbeFailurePolicy::Proceed);
    let outcome = engine
        .backup(&TransferRequest::new(&local, "payload.bin").unwrap())
        .await;

    assert!(outcome.success, "{:?}", outcome.diagnostic);
    assert_eq!(outcome.remote_path.as_deref(), Some("/backups/payload.bin"));
    assert_eq!(outcome.bytes, bytes.len() as u64);
    assert_eq!(share.file("/backups/payload.bin").unwrap(), bytes);
}

#[tokio::test]
async fn collision_gets_a_timestamped_name_and_keeps_the_original() {
    let temp = TempDir::new().unwrap();
    let local = write_file(temp.path(), "report", b"new report");

    let share = InMemoryShare::new();
    share.insert_file("/backups/report.pdf", b"old report");
    let engine = engine(&share, "/backups", ProbeFailurePolicy::Proceed);

    let outcome = engine
        .backup(&TransferRequest::new(&local, "report.pdf").unwrap())
        .await;

    assert!(outcome.success);
    assert_eq!(
        outcome.remote_path.as_deref(),
        Some("/backups/report_20240101_120000.pdf")
    );
    assert_eq!(share.file("/backups/report.pdf").unwrap(), b"old report");
    assert_eq!(
        share.file("/backups/report_20240101_120000.pdf").unwrap(),
        b"new report"
    );
}

#[tokio::test]
async fn collision_without_extension_appends_the_suffix() {
    let temp = TempDir::new().unwrap();
    let local = write_file(temp.path(), "notes", b"n");

    let share = InMemoryShare::new();
    share.insert_file("/notes", b"existing");
    let engine = engine(&share, "/", ProbeFailurePolicy::Proceed);

    let outcome = engine
        .backup(&TransferRequest::new(&local, "notes").unwrap())
        .await;
    assert_eq!(outcome.remote_path.as_deref(), Some("/notes_20240101_120000"));
    assert_eq!(share.file("/notes").unwrap(), b"existing");
}

#[tokio::test]
async fn existing_directory_counts_as_a_collision() {
    let temp = TempDir::new().unwrap();
    let local = write_file(temp.path(), "x", b"x");

    let share = InMemoryShare::new();
    share.insert_file("/backups/photos/keep.jpg", b"k");
    let engine = engine(&share, "/backups", ProbeFailurePolicy::Proceed);

    let outcome = engine
        .backup(&TransferRequest::new(&local, "photos").unwrap())
        .await;
    assert!(outcome.success);
    assert_eq!(
        outcome.remote_path.as_deref(),
        Some("/backups/photos_20240101_120000")
    );
}

#[tokio::test]
async fn existing_backup_directory_does_not_block_the_upload() {
    let temp = TempDir::new().unwrap();
    let share = InMemoryShare::new();
    let engine = engine(&share, "/backups", ProbeFailurePolicy::Proceed);

    for name in ["a.txt", "b.txt"] {
        let local = write_file(temp.path(), name, name.as_bytes());
        let outcome = engine
            .backup(&TransferRequest::new(&local, name).unwrap())
            .await;
        assert!(outcome.success, "{name}: {:?}", outcome.diagnostic);
    }

    assert!(share.has_directory("/backups"));
    assert_eq!(
        share.file_paths(),
        vec!["/backups/a.txt".to_string(), "/backups/b.txt".to_string()]
    );
    let calls = share.calls();
    assert_eq!(calls.opens, 2);
    assert_eq!(calls.closes, 2);
}

#[tokio::test]
async fn nested_backup_directory_is_created_level_by_level() {
    let temp = TempDir::new().unwrap();
    let local = write_file(temp.path(), "f", b"f");

    let share = InMemoryShare::new();
    let engine = engine(&share, "/a/b/c", ProbeFailurePolicy::Proceed);
    let outcome = engine
        .backup(&TransferRequest::new(&local, "f.txt").unwrap())
        .await;

    assert!(outcome.success, "{:?}", outcome.diagnostic);
    for dir in ["/a", "/a/b", "/a/b/c"] {
        assert!(share.has_directory(dir), "{dir}");
    }
    assert_eq!(share.file("/a/b/c/f.txt").unwrap(), b"f");
}

#[tokio::test]
async fn refused_connection_touches_nothing_remote() {
    let temp = TempDir::new().unwrap();
    let local = write_file(temp.path(), "f", b"f");

    let share = InMemoryShare::new();
    share.refuse_connections(true);
    let engine = engine(&share, "/backups", ProbeFailurePolicy::Proceed);

    let outcome = engine
        .backup(&TransferRequest::new(&local, "f.txt").unwrap())
        .await;

    assert!(!outcome.success);
    assert!(outcome.remote_path.is_none());
    assert!(outcome.diagnostic.unwrap().contains("connection failed"));
    let calls = share.calls();
    assert_eq!(calls.connect_attempts, 1);
    assert_eq!(calls.directories_created, 0);
    assert_eq!(calls.probes, 0);
    assert_eq!(calls.stores, 0);
    assert_eq!(calls.closes, 0);
}

#[tokio::test]
async fn unreadable_local_file_fails_and_still_closes_the_session() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("gone");

    let share = InMemoryShare::new();
    let engine = engine(&share, "/backups", ProbeFailurePolicy::Proceed);
    let outcome = engine
        .backup(&TransferRequest::new(&missing, "gone.txt").unwrap())
        .await;

    assert!(!outcome.success);
    assert!(share.file_paths().is_empty());
    let calls = share.calls();
    assert_eq!(calls.opens, 1);
    assert_eq!(calls.closes, 1);
    assert_eq!(calls.stores, 0);
}

#[tokio::test]
async fn probe_failure_proceeds_under_the_original_name_by_default() {
    let temp = TempDir::new().unwrap();
    let local = write_file(temp.path(), "r", b"replacement");

    let share = InMemoryShare::new();
    share.insert_file("/backups/report.pdf", b"original");
    share.fail_probes(true);
    let engine = engine(&share, "/backups", ProbeFailurePolicy::default());

    let outcome = engine
        .backup(&TransferRequest::new(&local, "report.pdf").unwrap())
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.remote_path.as_deref(), Some("/backups/report.pdf"));
    assert_eq!(share.file("/backups/report.pdf").unwrap(), b"replacement");
}

#[tokio::test]
async fn probe_failure_aborts_when_configured() {
    let temp = TempDir::new().unwrap();
    let local = write_file(temp.path(), "r", b"replacement");

    let share = InMemoryShare::new();
    share.insert_file("/backups/report.pdf", b"original");
    share.fail_probes(true);
    let engine = engine(&share, "/backups", ProbeFailurePolicy::Abort);

    let outcome = engine
        .backup(&TransferRequest::new(&local, "report.pdf").unwrap())
        .await;

    assert!(!outcome.success);
    assert!(outcome.diagnostic.unwrap().contains("STATUS_IO_TIMEOUT"));
    assert_eq!(share.file("/backups/report.pdf").unwrap(), b"original");
    let calls = share.calls();
    assert_eq!(calls.stores, 0);
    assert_eq!(calls.closes, 1);
}

#[tokio::test]
async fn timestamped_name_that_is_also_taken_gets_a_counter() {
    let temp = TempDir::new().unwrap();
    let local = write_file(temp.path(), "r", b"third");

    let share = InMemoryShare::new();
    share.insert_file("/backups/report.pdf", b"first");
    share.insert_file("/backups/report_20240101_120000.pdf", b"second");
    let engine = engine(&share, "/backups", ProbeFailurePolicy::Proceed);

    let outcome = engine
        .backup(&TransferRequest::new(&local, "report.pdf").unwrap())
        .await;

    assert!(outcome.success, "{:?}", outcome.diagnostic);
    assert_eq!(
        outcome.remote_path.as_deref(),
        Some("/backups/report_20240101_120000_1.pdf")
    );
    assert_eq!(share.file("/backups/report.pdf").unwrap(), b"first");
    assert_eq!(
        share.file("/backups/report_20240101_120000.pdf").unwrap(),
        b"second"
    );
    assert_eq!(
        share.file("/backups/report_20240101_120000_1.pdf").unwrap(),
        b"third"
    );
    assert_eq!(share.calls().probes, 3);
}

#[tokio::test]
async fn same_name_twice_in_one_second_keeps_both_copies() {
    let temp = TempDir::new().unwrap();
    let share = InMemoryShare::new();
    let engine = engine(&share, "/backups", ProbeFailurePolicy::Proceed);

    let mut stored = Vec::new();
    for body in [b"v1".as_slice(), b"v2", b"v3"] {
        let local = write_file(temp.path(), "scan", body);
        let outcome = engine
            .backup(&TransferRequest::new(&local, "scan.png").unwrap())
            .await;
        assert!(outcome.success, "{:?}", outcome.diagnostic);
        stored.push(outcome.remote_path.unwrap());
    }

    assert_eq!(
        stored,
        vec![
            "/backups/scan.png".to_string(),
            "/backups/scan_20240101_120000.png".to_string(),
            "/backups/scan_20240101_120000_1.png".to_string(),
        ]
    );
    assert_eq!(share.file("/backups/scan.png").unwrap(), b"v1");
    assert_eq!(share.file("/backups/scan_20240101_120000.png").unwrap(), b"v2");
    assert_eq!(share.file("/backups/scan_20240101_120000_1.png").unwrap(), b"v3");
}

#[tokio::test]
async fn refused_upload_fails_and_still_closes_the_session() {
    let temp = TempDir::new().unwrap();
    let local = write_file(temp.path(), "f", b"payload");

    let share = InMemoryShare::new();
    share.fail_stores(true);
    let engine = engine(&share, "/backups", ProbeFailurePolicy::Proceed);

    let outcome = engine
        .backup(&TransferRequest::new(&local, "f.txt").unwrap())
        .await;

    assert!(!outcome.success);
    assert!(outcome.remote_path.is_none());
    let diagnostic = outcome.diagnostic.unwrap();
    assert!(diagnostic.contains("/backups/f.txt"), "{diagnostic}");
    assert!(diagnostic.contains("STATUS_ACCESS_DENIED"), "{diagnostic}");
    assert!(share.file_paths().is_empty());
    let calls = share.calls();
    assert_eq!(calls.stores, 1);
    assert_eq!(calls.opens, 1);
    assert_eq!(calls.closes, 1);
}

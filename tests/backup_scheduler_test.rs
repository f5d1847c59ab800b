//! Backup scheduler lifecycle tests.

mod common;

use std::time::Duration;

use common::TestApp;
use stowage::backup::HISTORY_FILE;

#[tokio::test]
async fn test_start_takes_initial_backup() {
    let app = TestApp::with_backup_settings(|settings| stowage::BackupSettings {
        enabled: true,
        ..settings
    })
    .await;
    app.files.create_folder("alice", "", "docs").await.unwrap();
    app.files
        .upload("alice", "docs", "a.txt", b"hello", None)
        .await
        .unwrap();

    app.backups.start();
    assert!(app.backups.is_running());

    let backups = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let backups = app.backups.list_backups().await.unwrap();
            if !backups.is_empty() {
                return backups;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("initial backup was not taken");

    assert_eq!(backups.len(), 1);
    assert!(backups[0].name.starts_with("backup_"));

    app.backups.stop().await;
    assert!(!app.backups.is_running());

    let history = std::fs::read_to_string(app.backup_dir().join(HISTORY_FILE)).unwrap();
    assert_eq!(history.lines().count(), 1);
    assert!(history.contains("SUCCESS"));

    let status = app.backups.status();
    assert!(status.last_success.is_some());
    assert!(!status.running);
}

#[tokio::test]
async fn test_existing_backup_skips_initial_run() {
    let app = TestApp::with_backup_settings(|settings| stowage::BackupSettings {
        enabled: true,
        ..settings
    })
    .await;
    std::fs::create_dir_all(app.backup_dir()).unwrap();
    std::fs::write(
        app.backup_dir().join("backup_2024-01-01_030000.tar.gz"),
        b"old",
    )
    .unwrap();

    app.backups.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    app.backups.stop().await;

    assert_eq!(app.backups.list_backups().await.unwrap().len(), 1);
    assert!(!app.backup_dir().join(HISTORY_FILE).exists());
}

#[tokio::test]
async fn test_restart_after_stop() {
    let app = TestApp::with_backup_settings(|settings| stowage::BackupSettings {
        enabled: true,
        ..settings
    })
    .await;

    app.backups.start();
    app.backups.stop().await;
    assert!(!app.backups.is_running());

    app.backups.start();
    assert!(app.backups.is_running());
    app.backups.stop().await;
    assert!(!app.backups.is_running());
}

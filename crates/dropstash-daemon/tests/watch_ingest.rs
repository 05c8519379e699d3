//! End-to-end: real watchers feeding the engine through staging.

use dropstash_core::{EngineHandle, EngineStats};
use dropstash_daemon::{Daemon, StashConfig};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn drop_dir(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir(&dir).unwrap();
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o2770)).unwrap();
    dir
}

fn write_config(path: &Path, config: &StashConfig) {
    std::fs::write(path, serde_json::to_string_pretty(config).unwrap()).unwrap();
}

async fn wait_processed(handle: &mut EngineHandle, count: u64) -> EngineStats {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let stats = handle.stats();
            if stats.files_processed + stats.failed >= count {
                return stats;
            }
            handle.changed().await.unwrap();
        }
    })
    .await
    .expect("engine did not process dropped files in time")
}

fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn test_dropped_files_are_stashed_and_reload_adds_locations() {
    let root = TempDir::new().unwrap();
    let first = drop_dir(root.path(), "drop1");
    let second = drop_dir(root.path(), "drop2");

    let config_path = root.path().join("config.json");
    let mut config = StashConfig::rooted_at(&root.path().join("home"));
    config.locations = vec![first.clone()];
    write_config(&config_path, &config);

    let mut daemon = Daemon::start(config_path.clone(), config.clone()).unwrap();
    let mut handle = daemon.handle().clone();

    std::fs::write(first.join("report.txt"), b"hello dropstash world").unwrap();
    let stats = wait_processed(&mut handle, 1).await;
    assert_eq!(stats.new_units, 1);

    std::fs::write(first.join("report.txt"), b"hello dropstash").unwrap();
    let stats = wait_processed(&mut handle, 2).await;
    assert_eq!(stats.truncated, 1);
    assert_eq!(entries(&first), 0);

    config.locations = vec![first.clone(), second.clone()];
    write_config(&config_path, &config);
    assert_eq!(daemon.reload().await.unwrap(), 2);
    assert_eq!(daemon.monitors().len(), 2);

    std::fs::write(second.join("other.bin"), b"unrelated bytes").unwrap();
    let stats = wait_processed(&mut handle, 3).await;
    assert_eq!(stats.new_units, 2);
    assert_eq!(stats.failed, 0);

    let stash = daemon.shutdown().await.unwrap();
    assert_eq!(stash.len(), 2);
    let report = stash
        .nodes()
        .iter()
        .find(|n| n.pointers.len() == 2)
        .unwrap();
    assert_eq!(report.size, 21);
    assert!(report.pointers.iter().all(|p| p.name == "report.txt"));
    assert_eq!(report.pointers[1].size, 15);

    assert_eq!(entries(&config.staging_dir), 0);
    assert!(config.paths().meta_path().exists());
    assert!(!config.pid_path().exists());
}

#[tokio::test]
async fn test_location_without_setgid_is_not_watched() {
    let root = TempDir::new().unwrap();
    let good = drop_dir(root.path(), "good");
    let plain = root.path().join("plain");
    std::fs::create_dir(&plain).unwrap();
    std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o770)).unwrap();

    let mut config = StashConfig::rooted_at(&root.path().join("home"));
    config.locations = vec![plain.clone(), good];
    let daemon = Daemon::start(root.path().join("config.json"), config).unwrap();
    assert_eq!(daemon.monitors().len(), 1);

    std::fs::write(plain.join("ignored.txt"), b"not watched").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(plain.join("ignored.txt").exists());

    let stash = daemon.shutdown().await.unwrap();
    assert!(stash.is_empty());
}

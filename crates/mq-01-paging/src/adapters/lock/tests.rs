//! # Lock Tests

use super::*;
use std::fs;

#[test]
fn test_lock_records_owner_pid() {
    let dir = tempfile::tempdir().unwrap();

    let lock = DirectoryLock::acquire(dir.path()).expect("lock should be free");
    let content = fs::read_to_string(lock.path()).unwrap();
    assert_eq!(content.trim().parse::<u32>().unwrap(), std::process::id());
    assert_eq!(lock.pid(), std::process::id());
}

#[test]
fn test_second_lock_times_out() {
    let dir = tempfile::tempdir().unwrap();

    let _held = DirectoryLock::acquire(dir.path()).unwrap();
    let result = DirectoryLock::acquire_with_timeout(dir.path(), Duration::from_millis(60));
    assert!(matches!(result, Err(LockError::AlreadyLocked { .. })));
}

#[test]
fn test_lock_released_on_drop() {
    let dir = tempfile::tempdir().unwrap();

    let first = DirectoryLock::acquire(dir.path()).unwrap();
    drop(first);

    assert!(DirectoryLock::acquire_with_timeout(dir.path(), Duration::from_millis(60)).is_ok());
}

#[test]
fn test_lock_file_stays_on_disk_after_release() {
    let dir = tempfile::tempdir().unwrap();

    let first = DirectoryLock::acquire(dir.path()).unwrap();
    let path = first.path().to_path_buf();
    drop(first);
    assert!(path.exists());

    // A contender that opened the file before the release locks the same
    // inode a newcomer does, so only one of them can win.
    let early = fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
    let second = DirectoryLock::acquire_with_timeout(dir.path(), Duration::from_millis(60)).unwrap();
    assert!(fs2::FileExt::try_lock_exclusive(&early).is_err());
    drop(second);
    assert!(fs2::FileExt::try_lock_exclusive(&early).is_ok());
}

#[test]
fn test_unlocked_file_with_dead_pid_is_taken_over() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("LOCK"), "4294967294\n").unwrap();

    let lock = DirectoryLock::acquire_with_timeout(dir.path(), Duration::from_millis(60)).unwrap();
    assert_eq!(lock.pid(), std::process::id());
}

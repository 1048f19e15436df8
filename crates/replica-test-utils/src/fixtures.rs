//! On-disk fixtures: stub sync procedures and sync log files.

use std::fs;
use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script named `name` into `dir`.
///
/// `body` is everything after the shebang line. Arguments arrive as `$@`.
///
/// # Example
///
/// ```rust,no_run
/// use replica_test_utils::write_stub_script;
///
/// let dir = tempfile::TempDir::new().unwrap();
/// let script = write_stub_script(dir.path(), "sync.sh", "echo \"args: $@\"\nexit 0\n");
/// assert!(script.exists());
/// ```
pub fn write_stub_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body))
        .expect("write_stub_script: failed to write script");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("write_stub_script: failed to chmod script");
    }

    path
}

/// Write `<prefix>-<timestamp>.log` into `dir` and return its path.
pub fn write_log(dir: &Path, prefix: &str, timestamp: &str, content: &str) -> PathBuf {
    fs::create_dir_all(dir).expect("write_log: failed to create log dir");
    let path = dir.join(format!("{}-{}.log", prefix, timestamp));
    fs::write(&path, content).expect("write_log: failed to write log");
    path
}

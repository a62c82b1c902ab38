//! FUSE mount table lookups and `fusermount` unmounts.

use crate::config::PathsConfig;
use crate::error::{ManagerError, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Whether `mount_point` appears in the mount table.
///
/// Reads `/proc/self/mounts`. When the table cannot be read the path is
/// reported as mounted, so callers still attempt an unmount.
pub async fn is_mounted(mount_point: &Path) -> bool {
    match tokio::fs::read_to_string(PathsConfig::MOUNT_TABLE).await {
        Ok(table) => mount_table_contains(&table, mount_point),
        Err(e) => {
            debug!("Cannot read {}: {}", PathsConfig::MOUNT_TABLE, e);
            true
        }
    }
}

fn mount_table_contains(table: &str, mount_point: &Path) -> bool {
    let wanted = mount_point.to_string_lossy();
    let wanted = wanted.trim_end_matches('/');
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|target| unescape_mount_field(target) == wanted)
}

/// Mount table fields escape space, tab, newline and backslash as octal.
fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// Unmount `mount_point` with `fusermount -u`.
///
/// A FUSE server such as `rclone mount` exits on its own once its mount is
/// released.
pub async fn unmount(mount_point: &Path) -> Result<()> {
    fusermount("-u", mount_point).await?;
    info!("Unmounted {}", mount_point.display());
    Ok(())
}

/// Force a lazy unmount of `mount_point` with `fusermount -uz`.
///
/// Used when a plain unmount fails (busy or disconnected mounts), and to
/// clear mounts left over by a previous run.
pub async fn force_unmount(mount_point: &Path) -> Result<()> {
    fusermount("-uz", mount_point).await?;
    info!("Force-unmounted {}", mount_point.display());
    Ok(())
}

async fn fusermount(flags: &str, mount_point: &Path) -> Result<()> {
    debug!("Running {} {} {}", PathsConfig::FUSERMOUNT, flags, mount_point.display());

    let output = Command::new(PathsConfig::FUSERMOUNT)
        .arg(flags)
        .arg(mount_point)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| ManagerError::io_with_path(e, mount_point))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ManagerError::Other(format!(
            "{} {} {} failed ({}): {}",
            PathsConfig::FUSERMOUNT,
            flags,
            mount_point.display(),
            output.status,
            stderr.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TABLE: &str = "\
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
b1: /mnt/b1 fuse.rclone rw,nosuid,nodev,relatime,user_id=0,group_id=0 0 0
b2: /mnt/with\\040space fuse.rclone rw,relatime 0 0
";

    #[test]
    fn test_mount_table_contains() {
        assert!(mount_table_contains(TABLE, Path::new("/mnt/b1")));
        assert!(mount_table_contains(TABLE, Path::new("/mnt/b1/")));
        assert!(mount_table_contains(TABLE, Path::new("/mnt/with space")));
        assert!(!mount_table_contains(TABLE, Path::new("/mnt/b")));
        assert!(!mount_table_contains(TABLE, Path::new("/mnt")));
    }

    #[tokio::test]
    async fn test_temp_dir_is_not_mounted() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!is_mounted(&temp_dir.path().join("nothing")).await);
    }

    #[tokio::test]
    async fn test_unmount_of_plain_directory_fails() {
        // Either fusermount is missing or it refuses a path that is not a
        // mount point; both surface as errors rather than panics.
        let temp_dir = TempDir::new().unwrap();
        assert!(unmount(temp_dir.path()).await.is_err());
        assert!(force_unmount(temp_dir.path()).await.is_err());
    }
}

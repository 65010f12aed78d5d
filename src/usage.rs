use std::io;
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("filesystem statistics unavailable for {path}: {source}")]
    Unavailable { path: String, source: io::Error },
}

/// A point-in-time usage reading for one volume. Produced fresh on every
/// check and never persisted.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VolumeUsageSample {
    pub path: String,
    pub percent_used: f64,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

impl VolumeUsageSample {
    /// The "unknown" sentinel: all fields zero. A zero sample is never over
    /// threshold, so a failed query suppresses alerting rather than firing.
    pub fn zero(path: &str) -> Self {
        VolumeUsageSample {
            path: path.to_string(),
            percent_used: 0.0,
            total_bytes: 0,
            used_bytes: 0,
            free_bytes: 0,
        }
    }

    pub fn total_gib(&self) -> f64 {
        gib(self.total_bytes)
    }

    pub fn used_gib(&self) -> f64 {
        gib(self.used_bytes)
    }

    pub fn free_gib(&self) -> f64 {
        gib(self.free_bytes)
    }
}

pub fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

/// Queries filesystem statistics for `path`. Percent-used is computed
/// against the space visible to unprivileged users (total minus the root
/// reserve), so the figure matches what `df` reports.
pub fn query_usage(path: &str) -> Result<VolumeUsageSample, QueryError> {
    let wrap = |source: io::Error| QueryError::Unavailable { path: path.to_string(), source };

    let total_bytes = fs2::total_space(Path::new(path)).map_err(wrap)?;
    let free_unprivileged = fs2::free_space(Path::new(path)).map_err(wrap)?;
    let available_bytes = fs2::available_space(Path::new(path)).map_err(wrap)?;

    let used_bytes = total_bytes.saturating_sub(free_unprivileged);
    let denominator = used_bytes + available_bytes;
    let percent_used = if denominator == 0 {
        0.0
    } else {
        used_bytes as f64 / denominator as f64 * 100.0
    };

    Ok(VolumeUsageSample {
        path: path.to_string(),
        percent_used,
        total_bytes,
        used_bytes,
        free_bytes: available_bytes,
    })
}

/// A path counts as mounted only when it is byte-for-byte equal to a mount
/// point in the live mount table. No trailing-slash normalization and no
/// symlink resolution; `/mnt/backup/` does not match `/mnt/backup`.
pub fn is_mounted(path: &str) -> bool {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .any(|disk| disk.mount_point().to_str() == Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sample_is_all_zeroes() {
        let s = VolumeUsageSample::zero("/srv/data");
        assert_eq!(s.path, "/srv/data");
        assert_eq!(s.percent_used, 0.0);
        assert_eq!(s.total_bytes, 0);
        assert_eq!(s.used_bytes, 0);
        assert_eq!(s.free_bytes, 0);
    }

    #[test]
    fn query_on_live_filesystem_is_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let sample = query_usage(dir.path().to_str().unwrap()).unwrap();
        assert!(sample.total_bytes > 0);
        assert!(sample.percent_used >= 0.0 && sample.percent_used <= 100.0);
        assert!(sample.used_bytes.saturating_add(sample.free_bytes) <= sample.total_bytes);
    }

    #[test]
    fn query_on_missing_path_fails_explicitly() {
        let err = query_usage("/definitely/not/a/real/path").unwrap_err();
        let QueryError::Unavailable { path, .. } = err;
        assert_eq!(path, "/definitely/not/a/real/path");
    }

    #[test]
    fn gib_formats_to_two_decimals() {
        let sample = VolumeUsageSample {
            path: "/srv/data".to_string(),
            percent_used: 50.0,
            total_bytes: 500 * 1024 * 1024 * 1024,
            used_bytes: 250 * 1024 * 1024 * 1024,
            free_bytes: 250 * 1024 * 1024 * 1024,
        };
        assert_eq!(format!("{:.2}", sample.total_gib()), "500.00");
        assert_eq!(format!("{:.2}", sample.used_gib()), "250.00");
    }

    #[test]
    fn unknown_paths_are_not_mounted() {
        assert!(!is_mounted("/definitely/not/a/mount/point"));
        // Literal match: a trailing slash makes it a different string, so
        // this can never match a mount point recorded as "/".
        assert!(!is_mounted("//"));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point-in-time transfer progress sample, as reported by the rclone
/// daemon's core/stats for a job's stats group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub bytes: u64,
    pub total_bytes: u64,
    pub speed_bytes_per_sec: u64,
    pub files_completed: u64,
    pub files_total: u64,
    /// Absolute time the transfer is expected to finish, derived from the
    /// daemon's relative `eta` seconds. `None` when the daemon reports no
    /// eta (e.g. speed is zero).
    pub eta: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            bytes: 0,
            total_bytes: 0,
            speed_bytes_per_sec: 0,
            files_completed: 0,
            files_total: 0,
            eta: None,
            last_update: DateTime::UNIX_EPOCH,
        }
    }
}

impl Progress {
    /// `100 * bytes / total_bytes`, or 0 when total_bytes is unknown.
    /// Never exceeds 100 even if the daemon briefly over-reports bytes.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let pct = 100.0 * (self.bytes as f64) / (self.total_bytes as f64);
        pct.min(100.0)
    }

    /// Build a `Progress` from the daemon's raw stats fields. `eta_secs`
    /// of `None` or <= 0 means unknown and is not converted to a
    /// timestamp — a zero-speed transfer has no meaningful eta.
    #[allow(clippy::too_many_arguments)]
    pub fn from_daemon_stats(
        bytes: u64,
        total_bytes: u64,
        speed_bytes_per_sec: u64,
        files_completed: u64,
        files_total: u64,
        eta_secs: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        let eta = eta_secs
            .filter(|secs| *secs > 0)
            .map(|secs| now + chrono::Duration::seconds(secs));

        Self {
            bytes,
            total_bytes,
            speed_bytes_per_sec,
            files_completed,
            files_total,
            eta,
            last_update: now,
        }
    }
}

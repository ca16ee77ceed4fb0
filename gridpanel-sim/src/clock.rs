//! Simulated time source.
//!
//! Simulated time is a fixed origin plus the accelerated monotonic delta since
//! construction, with an explicit offset for tests that need to jump forward.

use chrono::{DateTime, NaiveDateTime};
use gridpanel_error::{PanelError, PanelResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub struct SimClock {
    origin: Instant,
    start_epoch_s: f64,
    acceleration: f64,
    /// Extra simulated milliseconds added by `advance`.
    offset_ms: AtomicU64,
}

impl SimClock {
    /// Clock anchored at the host's current wall time.
    pub fn system(acceleration: f64) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self::starting_at(now, acceleration)
    }

    /// Clock anchored at a fixed epoch origin (seconds).
    pub fn starting_at(start_epoch_s: f64, acceleration: f64) -> Self {
        Self {
            origin: Instant::now(),
            start_epoch_s,
            acceleration: acceleration.max(0.0),
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Parse a `simulation_start_time` option into a fixed clock origin.
    /// Accepts RFC 3339 or a bare `YYYY-MM-DDTHH:MM:SS` local timestamp.
    pub fn from_start_time(raw: &str, acceleration: f64) -> PanelResult<Self> {
        let epoch = if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            dt.timestamp() as f64
        } else {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .map_err(|e| {
                    PanelError::Config(format!("malformed simulation_start_time '{raw}': {e}"))
                })?
                .and_utc()
                .timestamp() as f64
        };
        Ok(Self::starting_at(epoch, acceleration))
    }

    /// Current simulated time, seconds since the epoch.
    pub fn now_s(&self) -> f64 {
        let offset = self.offset_ms.load(Ordering::Acquire) as f64 / 1000.0;
        self.start_epoch_s + self.origin.elapsed().as_secs_f64() * self.acceleration + offset
    }

    /// Jump the simulated clock forward.
    pub fn advance(&self, seconds: f64) {
        let ms = (seconds.max(0.0) * 1000.0) as u64;
        self.offset_ms.fetch_add(ms, Ordering::AcqRel);
    }
}

/// Hour of day (0-23) for a simulated timestamp.
pub fn hour_of_day(epoch_s: f64) -> u32 {
    ((epoch_s.rem_euclid(86_400.0)) / 3_600.0) as u32
}

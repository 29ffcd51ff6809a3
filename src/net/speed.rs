//! Download Speed Measurement
//!
//! Sliding-interval byte/time accumulator producing instantaneous and
//! formatted speeds.

use std::time::Instant;

/// Measures instantaneous throughput from successive byte totals.
///
/// Constructed with the byte count already on disk so a resumed transfer
/// does not report a burst on its first update.
#[derive(Debug)]
pub struct SpeedMeter {
    last_bytes: u64,
    last_at: Instant,
    current_bps: f64,
}

impl SpeedMeter {
    pub fn new(initial_bytes: u64) -> Self {
        Self {
            last_bytes: initial_bytes,
            last_at: Instant::now(),
            current_bps: 0.0,
        }
    }

    /// Record the new cumulative byte total.
    ///
    /// Speed is the delta over wall-clock seconds since the previous
    /// update; with no elapsed time the last value is retained. Negative
    /// deltas (truncation on restart) clamp to zero.
    pub fn update(&mut self, bytes_downloaded: u64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_at).as_secs_f64();
        if elapsed > 0.0 {
            let delta = bytes_downloaded as f64 - self.last_bytes as f64;
            self.current_bps = (delta / elapsed).max(0.0);
            self.last_at = now;
            self.last_bytes = bytes_downloaded;
        }
    }

    /// Instantaneous speed in bytes/sec.
    pub fn current(&self) -> f64 {
        self.current_bps
    }

    /// Instantaneous speed as a human-readable string.
    pub fn current_formatted(&self) -> String {
        format_bytes_per_sec(self.current_bps)
    }

    /// Reset the baseline, e.g. after a retry truncated the file.
    pub fn reset(&mut self, bytes: u64) {
        self.last_bytes = bytes;
        self.last_at = Instant::now();
        self.current_bps = 0.0;
    }
}

const RATE_UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];

/// Format a byte rate with binary-unit steps: whole bytes below 1 KB/s,
/// one decimal above.
pub fn format_bytes_per_sec(bps: f64) -> String {
    let mut value = bps.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < RATE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, RATE_UNITS[unit])
    } else {
        format!("{:.1} {}", value, RATE_UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn measures_positive_rate() {
        let mut meter = SpeedMeter::new(0);
        std::thread::sleep(Duration::from_millis(50));
        meter.update(50_000);
        assert!(meter.current() > 0.0);
    }

    #[test]
    fn clamps_negative_delta_to_zero() {
        let mut meter = SpeedMeter::new(1_000_000);
        std::thread::sleep(Duration::from_millis(20));
        meter.update(100);
        assert_eq!(meter.current(), 0.0);
    }

    #[test]
    fn resumed_start_reports_no_burst() {
        let mut meter = SpeedMeter::new(5_000_000);
        std::thread::sleep(Duration::from_millis(20));
        meter.update(5_000_100);
        // Only the 100-byte delta counts, not the resumed 5 MB
        assert!(meter.current() < 100_000.0);
    }

    #[test]
    fn rate_formatting_walks_the_unit_ladder() {
        assert_eq!(format_bytes_per_sec(0.0), "0 B/s");
        assert_eq!(format_bytes_per_sec(812.0), "812 B/s");
        assert_eq!(format_bytes_per_sec(4096.0), "4.0 KB/s");
        assert_eq!(format_bytes_per_sec(1_572_864.0), "1.5 MB/s");
        assert_eq!(format_bytes_per_sec(3.0 * 1024.0 * 1024.0 * 1024.0), "3.0 GB/s");
        // Negative deltas render as zero, never a sign
        assert_eq!(format_bytes_per_sec(-10.0), "0 B/s");
    }
}

//! Progress reporting and run aggregation.

use std::time::Instant;

/// Emits a status line whenever completions cross a new multiple of the
/// configured percentage resolution.
///
/// Emission is boundary-driven: a completion that jumps several boundaries
/// at once produces one line reporting the current state, and no boundary
/// is ever reported twice.
pub struct ProgressReporter {
    total: usize,
    resolution: f64,
    last_boundary: u64,
}

impl ProgressReporter {
    /// Create a reporter for `total` work units at `resolution` percent.
    /// Resolution is clamped to (0, 100].
    pub fn new(total: usize, resolution: f64) -> Self {
        let resolution = if resolution > 0.0 && resolution <= 100.0 {
            resolution
        } else {
            10.0
        };
        Self {
            total,
            resolution,
            last_boundary: 0,
        }
    }

    /// Record that `completed` units have finished. Returns true when a
    /// status line was emitted.
    pub fn observe(&mut self, completed: usize) -> bool {
        if self.total == 0 || completed == 0 {
            return false;
        }

        let pct = (completed as f64 / self.total as f64) * 100.0;
        let boundary = (pct / self.resolution).floor() as u64;

        if boundary > self.last_boundary {
            self.last_boundary = boundary;
            log::info!(
                "{:.1}% complete ({}/{} files)",
                pct,
                completed,
                self.total
            );
            return true;
        }
        false
    }
}

/// Aggregate statistics for a pipeline pass.
#[derive(Debug)]
pub struct RunSummary {
    /// Files processed (succeeded or failed).
    pub files: usize,
    /// Files that failed to read or parse.
    pub failures: usize,
    /// Total particles seen across all files.
    pub particles: u64,
    /// Particles classified as optically focused.
    pub focused: u64,
    started: Instant,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            files: 0,
            failures: 0,
            particles: 0,
            focused: 0,
            started: Instant::now(),
        }
    }

    pub fn record_success(&mut self, particles: u64, focused: u64) {
        self.files += 1;
        self.particles += particles;
        self.focused += focused;
    }

    pub fn record_failure(&mut self) {
        self.files += 1;
        self.failures += 1;
    }

    /// Wall time since the summary was created.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

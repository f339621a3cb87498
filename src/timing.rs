//! Stage timing.

use std::time::{Duration, Instant};

/// Measures one pipeline stage.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    /// Print the elapsed time and return it.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        println!("  [{}] {}", format_duration(elapsed), self.name);
        elapsed
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}

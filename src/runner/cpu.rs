use std::time::Duration;

use tokio::time::Instant;

/// CPU usage above this (hundredths of a percent) triggers a warning.
pub const CPU_WARNING_THRESHOLD_X100: u64 = 9000;

/// Samples this process's CPU usage between two calls.
#[derive(Debug, Clone, Copy)]
pub struct CpuMonitor {
    last_wall: Instant,
    last_cpu: Option<Duration>,
}

impl Default for CpuMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_wall: Instant::now(),
            last_cpu: process_cpu_time(),
        }
    }

    /// CPU usage since the previous sample, in hundredths of a percent of one core.
    pub fn sample(&mut self) -> u64 {
        let now = Instant::now();
        let cpu = process_cpu_time();
        let wall = now.saturating_duration_since(self.last_wall);
        let usage = match (cpu, self.last_cpu) {
            (Some(current), Some(previous)) => {
                usage_x100(current.saturating_sub(previous), wall)
            }
            (Some(_) | None, None) | (None, Some(_)) => 0,
        };
        self.last_wall = now;
        self.last_cpu = cpu;
        usage
    }
}

fn usage_x100(cpu: Duration, wall: Duration) -> u64 {
    let wall_us = wall.as_micros();
    if wall_us == 0 {
        return 0;
    }
    let usage = cpu
        .as_micros()
        .saturating_mul(10_000)
        .checked_div(wall_us)
        .unwrap_or(0);
    u64::try_from(usage).unwrap_or(u64::MAX)
}

/// Formats hundredths of a percent as `12.34`.
#[must_use]
pub fn format_percent_x100(value: u64) -> String {
    format!("{}.{:02}", value / 100, value % 100)
}

#[cfg(unix)]
fn process_cpu_time() -> Option<Duration> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // Safety: getrusage writes into the provided struct; it was zero-initialised
    // and is only read after a successful return.
    let result = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if result != 0 {
        return None;
    }
    // Safety: getrusage returned 0, so the struct is fully initialised.
    let usage = unsafe { usage.assume_init() };
    Some(timeval_to_duration(usage.ru_utime).saturating_add(timeval_to_duration(usage.ru_stime)))
}

#[cfg(not(unix))]
fn process_cpu_time() -> Option<Duration> {
    None
}

#[cfg(unix)]
fn timeval_to_duration(value: libc::timeval) -> Duration {
    let secs = u64::try_from(value.tv_sec).unwrap_or(0);
    let micros = u64::try_from(value.tv_usec).unwrap_or(0);
    Duration::from_secs(secs).saturating_add(Duration::from_micros(micros))
}

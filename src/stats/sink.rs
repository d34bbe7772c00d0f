use std::io::Write;

use tracing::warn;

use super::{RequestStats, error_report_lines, stats_table_lines};
use crate::runner::RunState;

/// What a sink receives on every stats tick and once at shutdown.
#[derive(Debug, Clone, Copy)]
pub struct StatsView<'a> {
    pub state: RunState,
    pub user_count: u64,
    pub stats: &'a RequestStats,
    pub is_final: bool,
}

pub trait StatsSink: Send {
    fn publish(&mut self, view: &StatsView<'_>);
}

/// Prints the stats table to stderr, next to the log output.
pub struct ConsoleSink {
    out: Box<dyn Write + Send>,
    only_summary: bool,
}

impl ConsoleSink {
    #[must_use]
    pub fn stderr(only_summary: bool) -> Self {
        Self::new(Box::new(std::io::stderr()), only_summary)
    }

    #[must_use]
    pub fn new(out: Box<dyn Write + Send>, only_summary: bool) -> Self {
        Self { out, only_summary }
    }

    fn write_lines(&mut self, lines: &[String]) -> std::io::Result<()> {
        for line in lines {
            writeln!(self.out, "{}", line)?;
        }
        writeln!(self.out)?;
        self.out.flush()
    }
}

impl StatsSink for ConsoleSink {
    fn publish(&mut self, view: &StatsView<'_>) {
        if self.only_summary && !view.is_final {
            return;
        }
        let mut lines = stats_table_lines(view.stats);
        if view.is_final {
            lines.extend(error_report_lines(view.stats));
        }
        if let Err(err) = self.write_lines(&lines) {
            warn!("Failed to print stats: {}", err);
        }
    }
}

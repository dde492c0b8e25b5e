//! Step information for stepped simulations
//!
//! A raw file does not record where one `.step` run ends and the next
//! begins. The step table comes from a [`StepSource`], usually the log file
//! written next to the raw file, and the point offsets are recovered from the
//! axis restarting at its first value.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::element::Params;
use crate::encoding::read_text_file;
use crate::waveform::{valid_offsets, Plot};

/// Parameters of every step, and optionally where each step starts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepTable {
    pub steps: Vec<Params>,
    pub offsets: Option<Vec<usize>>,
}

impl StepTable {
    pub fn new(steps: Vec<Params>) -> Self {
        Self { steps, offsets: None }
    }

    pub fn with_offsets(steps: Vec<Params>, offsets: Vec<usize>) -> Self {
        Self {
            steps,
            offsets: Some(offsets),
        }
    }
}

/// Supplies step tables to the raw reader
pub trait StepSource: fmt::Debug + Send + Sync {
    /// Step table for `plot`, read from `raw_path`. `None` means the plot is a
    /// single run.
    fn step_table(&self, raw_path: Option<&Path>, plot: &Plot) -> Option<StepTable>;
}

// ============================================================================
// Sources
// ============================================================================

/// Reads `.step` lines from the `.log` file next to the raw file. Used only
/// for plots flagged `stepped`; when the log is unusable the runs are
/// numbered from the axis restarts instead.
#[derive(Debug, Clone, Default)]
pub struct LogFileSteps {
    log_path: Option<PathBuf>,
}

impl LogFileSteps {
    /// Read from an explicit log file instead of `<raw stem>.log`.
    pub fn from_log(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: Some(path.into()),
        }
    }
}

impl StepSource for LogFileSteps {
    fn step_table(&self, raw_path: Option<&Path>, plot: &Plot) -> Option<StepTable> {
        if !plot.has_flag("stepped") {
            return None;
        }
        let log = self
            .log_path
            .clone()
            .or_else(|| raw_path.map(|p| p.with_extension("log")));
        let steps = match log.as_deref().map(read_text_file) {
            Some(Ok((text, _))) => parse_step_lines(&text),
            Some(Err(e)) => {
                warn!(error = %e, "Log file unreadable; numbering steps from the axis");
                Vec::new()
            }
            None => Vec::new(),
        };
        if !steps.is_empty() {
            return Some(StepTable::new(steps));
        }

        let offsets = restart_offsets(plot);
        debug!(steps = offsets.len(), "Steps numbered from axis restarts");
        let steps = (1..=offsets.len())
            .map(|run| Params::from_iter([("run", run.to_string())]))
            .collect();
        Some(StepTable::with_offsets(steps, offsets))
    }
}

/// An explicit step table
#[derive(Debug, Clone, Default)]
pub struct FixedSteps(pub StepTable);

impl FixedSteps {
    pub fn new(steps: Vec<Params>) -> Self {
        Self(StepTable::new(steps))
    }
}

impl StepSource for FixedSteps {
    fn step_table(&self, _raw_path: Option<&Path>, _plot: &Plot) -> Option<StepTable> {
        Some(self.0.clone())
    }
}

/// Treat every plot as a single run
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSteps;

impl StepSource for NoSteps {
    fn step_table(&self, _raw_path: Option<&Path>, _plot: &Plot) -> Option<StepTable> {
        None
    }
}

// ============================================================================
// Log parsing
// ============================================================================

/// `key=value` words of a step description.
fn step_params(text: &str) -> Params {
    text.split_whitespace()
        .filter_map(|word| word.split_once('='))
        .collect()
}

/// Step tables from LTspice (`.step r=1k`) and QSPICE
/// (`2 of 4 steps: .step r=1k`) log lines.
pub fn parse_step_lines(log: &str) -> Vec<Params> {
    log.lines()
        .filter_map(|line| {
            if let Some(rest) = line.strip_prefix(".step") {
                return Some(step_params(rest));
            }
            let (counter, rest) = line.split_once(" steps:")?;
            let mut words = counter.split_whitespace();
            let numbered = matches!(
                (words.next(), words.next(), words.next(), words.next()),
                (Some(n), Some("of"), Some(m), None)
                    if n.parse::<usize>().is_ok() && m.parse::<usize>().is_ok()
            );
            let step = rest.trim_start().strip_prefix(".step")?;
            numbered.then(|| step_params(step))
        })
        .collect()
}

// ============================================================================
// Offsets
// ============================================================================

/// Indices where the axis returns to its first value; every point for plots
/// without an axis.
pub(crate) fn restart_offsets(plot: &Plot) -> Vec<usize> {
    let Some(axis) = plot.axis_trace() else {
        return (0..plot.point_count().max(1)).collect();
    };
    let Some(first) = axis.data.get(0) else {
        return vec![0];
    };
    (0..axis.data.len())
        .filter(|&i| axis.data.get(i) == Some(first))
        .collect()
}

/// Attach a step table to a freshly read plot. Offsets given by the source
/// are used when they fit, otherwise they are recovered from the axis. A
/// table that does not fit the data leaves the plot as a single run.
pub(crate) fn apply_step_table(plot: &mut Plot, table: StepTable) {
    let count = table.steps.len();
    if count == 0 {
        return;
    }
    let offsets = match table.offsets {
        Some(offsets) if valid_offsets(&offsets, count, plot.points) => offsets,
        Some(offsets) => {
            warn!(
                offsets = offsets.len(),
                steps = count,
                "Step offsets do not fit the data; recovering them from the axis"
            );
            restart_offsets(plot)
        }
        None => restart_offsets(plot),
    };
    if !valid_offsets(&offsets, count, plot.points) {
        warn!(
            expected = count,
            found = offsets.len(),
            plot = plot.plot_name(),
            "Step count does not match the data; reading as a single run"
        );
        return;
    }
    plot.steps = table.steps;
    plot.step_offsets = offsets;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::{Trace, VectorData};

    fn swept_plot() -> Plot {
        let axis = Trace::new("time", "time", VectorData::Real(vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]));
        let v = Trace::new("V(a)", "voltage", VectorData::Real(vec![1.0; 6]));
        Plot::new("Transient Analysis", Some(axis), vec![v]).unwrap()
    }

    #[test]
    fn test_parse_ltspice_and_qspice_logs() {
        let log = "Circuit: * test\n.step r=1k c=1n\n.step r=2k c=1n\nDate: today\n";
        let steps = parse_step_lines(log);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].get("r"), Some("2k"));
        assert_eq!(steps[1].get("C"), Some("1n"));

        let log = "1 of 2 steps:   .step vin=1\n2 of 2 steps:   .step vin=2\nfoo of bar steps: .step x=1\n";
        let steps = parse_step_lines(log);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].get("vin"), Some("1"));
    }

    #[test]
    fn test_offsets_from_axis() {
        let mut plot = swept_plot();
        assert_eq!(restart_offsets(&plot), vec![0, 3]);
        apply_step_table(&mut plot, StepTable::new(vec![Params::new(), Params::new()]));
        assert_eq!(plot.step_offsets(), &[0, 3]);
    }

    #[test]
    fn test_count_mismatch_falls_back_to_single_run() {
        let mut plot = swept_plot();
        apply_step_table(
            &mut plot,
            StepTable::new(vec![Params::new(), Params::new(), Params::new()]),
        );
        assert_eq!(plot.step_count(), 1);
        assert!(plot.step_params(0).is_none());
    }

    #[test]
    fn test_log_source_requires_stepped_flag() {
        let plot = swept_plot();
        assert!(LogFileSteps::default().step_table(None, &plot).is_none());

        let mut stepped = plot;
        stepped.flags.push("stepped".to_string());
        let table = LogFileSteps::default().step_table(None, &stepped).unwrap();
        assert_eq!(table.offsets, Some(vec![0, 3]));
        assert_eq!(table.steps[1].get("run"), Some("2"));
    }
}

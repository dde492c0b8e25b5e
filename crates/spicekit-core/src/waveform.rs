//! In-memory model of a raw waveform file: plots, traces and steps

use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;

use num_complex::Complex64;

use crate::element::Params;
use crate::encoding::TextEncoding;
use crate::types::{Result, SpiceError};

// ============================================================================
// Constants
// ============================================================================

/// Plot names whose first variable is an ordinary trace, not an axis
pub const PLOTS_WITHOUT_AXIS: &[&str] = &["Operating Point", "Transfer Function", "Integrated Noise"];

// ============================================================================
// Enums
// ============================================================================

/// Simulator that produced a raw file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    LtSpice,
    QSpice,
    NgSpice,
    Xyce,
    /// No `Command:` header: plain SPICE3 output, doubles throughout.
    Spice3,
}

impl Dialect {
    /// Detect the dialect from the `Command:` header. When several names
    /// appear the last match in LTspice, QSPICE, ngspice, Xyce order wins.
    pub fn detect(command: &str) -> Option<Dialect> {
        let command = command.to_ascii_lowercase();
        [
            ("ltspice", Dialect::LtSpice),
            ("qspice", Dialect::QSpice),
            ("ngspice", Dialect::NgSpice),
            ("xyce", Dialect::Xyce),
        ]
        .into_iter()
        .filter(|(name, _)| command.contains(name))
        .map(|(_, dialect)| dialect)
        .last()
    }

    pub fn name(self) -> &'static str {
        match self {
            Dialect::LtSpice => "ltspice",
            Dialect::QSpice => "qspice",
            Dialect::NgSpice => "ngspice",
            Dialect::Xyce => "xyce",
            Dialect::Spice3 => "spice3",
        }
    }

    /// `Command:` value written for plots that did not carry one.
    pub(crate) fn command(self) -> Option<&'static str> {
        match self {
            Dialect::LtSpice => Some("Linear Technology Corporation LTspice"),
            Dialect::QSpice => Some("QSPICE64"),
            Dialect::NgSpice => Some("ngspice"),
            Dialect::Xyce => Some("Xyce"),
            Dialect::Spice3 => None,
        }
    }
}

impl FromStr for Dialect {
    type Err = SpiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ltspice" => Ok(Dialect::LtSpice),
            "qspice" => Ok(Dialect::QSpice),
            "ngspice" => Ok(Dialect::NgSpice),
            "xyce" => Ok(Dialect::Xyce),
            "spice3" => Ok(Dialect::Spice3),
            other => Err(SpiceError::InvalidValue(format!("unknown raw file dialect '{}'", other))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage type of one variable in the data section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericType {
    /// 4-byte float
    Real32,
    /// 8-byte float
    Real64,
    /// Two 8-byte floats
    Complex,
}

impl NumericType {
    pub fn byte_size(self) -> usize {
        match self {
            NumericType::Real32 => 4,
            NumericType::Real64 => 8,
            NumericType::Complex => 16,
        }
    }
}

/// How samples are arranged in a binary data section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataLayout {
    /// One record per point holding every variable (row-major).
    Normal,
    /// Each variable's samples stored contiguously (column-major).
    #[default]
    FastAccess,
}

/// Data section encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueFormat {
    /// `Binary:` section
    #[default]
    Binary,
    /// `Values:` section
    Ascii,
}

/// Samples of one trace
#[derive(Debug, Clone, PartialEq)]
pub enum VectorData {
    Real32(Vec<f32>),
    Real(Vec<f64>),
    Complex(Vec<Complex64>),
}

impl VectorData {
    pub(crate) fn with_capacity(kind: NumericType, capacity: usize) -> Self {
        match kind {
            NumericType::Real32 => VectorData::Real32(Vec::with_capacity(capacity)),
            NumericType::Real64 => VectorData::Real(Vec::with_capacity(capacity)),
            NumericType::Complex => VectorData::Complex(Vec::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VectorData::Real32(v) => v.len(),
            VectorData::Real(v) => v.len(),
            VectorData::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn numeric_type(&self) -> NumericType {
        match self {
            VectorData::Real32(_) => NumericType::Real32,
            VectorData::Real(_) => NumericType::Real64,
            VectorData::Complex(_) => NumericType::Complex,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, VectorData::Complex(_))
    }

    /// Sample `index` as a complex number.
    pub fn get(&self, index: usize) -> Option<Complex64> {
        match self {
            VectorData::Real32(v) => v.get(index).map(|&x| Complex64::new(f64::from(x), 0.0)),
            VectorData::Real(v) => v.get(index).map(|&x| Complex64::new(x, 0.0)),
            VectorData::Complex(v) => v.get(index).copied(),
        }
    }

    /// Real samples widened to `f64`; `None` for complex data.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            VectorData::Real32(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            VectorData::Real(v) => Some(v.clone()),
            VectorData::Complex(_) => None,
        }
    }

    pub fn as_complex(&self) -> Option<&[Complex64]> {
        match self {
            VectorData::Complex(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn slice(&self, range: Range<usize>) -> VectorData {
        match self {
            VectorData::Real32(v) => VectorData::Real32(v[range].to_vec()),
            VectorData::Real(v) => VectorData::Real(v[range].to_vec()),
            VectorData::Complex(v) => VectorData::Complex(v[range].to_vec()),
        }
    }

    fn abs(self) -> VectorData {
        match self {
            VectorData::Real32(v) => VectorData::Real32(v.into_iter().map(f32::abs).collect()),
            VectorData::Real(v) => VectorData::Real(v.into_iter().map(f64::abs).collect()),
            other => other,
        }
    }
}

// ============================================================================
// Traces and plots
// ============================================================================

/// One named variable of a plot
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub name: String,
    /// Variable type from the header (`time`, `voltage`, `device_current`, ...)
    pub kind: String,
    pub data: VectorData,
}

impl Trace {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, data: VectorData) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            data,
        }
    }
}

/// One result set of a raw file
#[derive(Debug, Clone)]
pub struct Plot {
    pub(crate) properties: Vec<(String, String)>,
    pub(crate) annotations: Vec<String>,
    pub(crate) flags: Vec<String>,
    pub(crate) dialect: Dialect,
    pub(crate) encoding: TextEncoding,
    pub(crate) format: ValueFormat,
    pub(crate) layout: DataLayout,
    pub(crate) has_axis: bool,
    /// Axis first when the plot has one.
    pub(crate) traces: Vec<Trace>,
    pub(crate) points: usize,
    pub(crate) steps: Vec<Params>,
    /// Start index of every step; always holds at least `0`.
    pub(crate) step_offsets: Vec<usize>,
}

impl Plot {
    /// Build a plot from an optional axis and traces of equal length.
    pub fn new(plot_name: &str, axis: Option<Trace>, traces: Vec<Trace>) -> Result<Plot> {
        let has_axis = axis.is_some();
        let traces: Vec<Trace> = axis.into_iter().chain(traces).collect();
        let points = traces.first().map_or(0, |t| t.data.len());
        if let Some(bad) = traces.iter().find(|t| t.data.len() != points) {
            return Err(SpiceError::InvalidValue(format!(
                "trace '{}' has {} points, expected {}",
                bad.name,
                bad.data.len(),
                points
            )));
        }
        let complex = traces.iter().any(|t| t.data.is_complex());
        Ok(Plot {
            properties: vec![("Plotname".to_string(), plot_name.to_string())],
            annotations: Vec::new(),
            flags: vec![if complex { "complex" } else { "real" }.to_string()],
            dialect: Dialect::Spice3,
            encoding: TextEncoding::Utf8,
            format: ValueFormat::Binary,
            layout: DataLayout::FastAccess,
            has_axis,
            traces,
            points,
            steps: Vec::new(),
            step_offsets: vec![0],
        })
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set or replace a header property such as `Title` or `Date`.
    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        match self.properties.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some((_, v)) => *v = value.to_string(),
            None => self.properties.push((key.to_string(), value.to_string())),
        }
        self
    }

    /// Attach step information. `offsets` holds the first point of every step.
    pub fn with_steps(mut self, steps: Vec<Params>, offsets: Vec<usize>) -> Result<Self> {
        if !valid_offsets(&offsets, steps.len(), self.points) {
            return Err(SpiceError::InvalidValue(format!(
                "{} step offsets do not describe {} steps over {} points",
                offsets.len(),
                steps.len(),
                self.points
            )));
        }
        let stepped = !steps.is_empty();
        self.steps = steps;
        self.step_offsets = offsets;
        if stepped && !self.flags.iter().any(|f| f.eq_ignore_ascii_case("stepped")) {
            self.flags.push("stepped".to_string());
        }
        Ok(self)
    }

    // ------------------------------------------------------------------------
    // Header
    // ------------------------------------------------------------------------

    /// Header property by key, case-insensitive.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }

    /// `.param` and `.alias` lines found in the header.
    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    pub fn title(&self) -> &str {
        self.property("Title").unwrap_or_default()
    }

    pub fn date(&self) -> &str {
        self.property("Date").unwrap_or_default()
    }

    pub fn plot_name(&self) -> &str {
        self.property("Plotname").unwrap_or_default()
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn format(&self) -> ValueFormat {
        self.format
    }

    pub fn layout(&self) -> DataLayout {
        self.layout
    }

    pub fn has_axis(&self) -> bool {
        self.has_axis
    }

    pub fn is_complex(&self) -> bool {
        self.traces.iter().any(|t| t.data.is_complex())
    }

    pub fn point_count(&self) -> usize {
        self.points
    }

    // ------------------------------------------------------------------------
    // Traces
    // ------------------------------------------------------------------------

    pub fn traces(&self) -> &[Trace] {
        &self.traces
    }

    pub fn trace_names(&self) -> Vec<&str> {
        self.traces.iter().map(|t| t.name.as_str()).collect()
    }

    /// Trace by name; exact match first, then case-insensitive.
    pub fn trace(&self, name: &str) -> Result<&Trace> {
        self.traces
            .iter()
            .find(|t| t.name == name)
            .or_else(|| self.traces.iter().find(|t| t.name.eq_ignore_ascii_case(name)))
            .ok_or_else(|| SpiceError::MissingComponent(name.to_string()))
    }

    pub fn axis_trace(&self) -> Option<&Trace> {
        if self.has_axis {
            self.traces.first()
        } else {
            None
        }
    }

    // ------------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------------

    pub fn step_count(&self) -> usize {
        self.step_offsets.len()
    }

    /// Parameters of a step, when step information was found.
    pub fn step_params(&self, step: usize) -> Option<&Params> {
        self.steps.get(step)
    }

    pub fn step_offsets(&self) -> &[usize] {
        &self.step_offsets
    }

    /// Steps whose parameters match every `(name, value)` pair given.
    pub fn steps_matching(&self, query: &[(&str, &str)]) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, params)| query.iter().all(|(k, v)| params.get(k) == Some(*v)))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn step_range(&self, step: usize) -> Result<Range<usize>> {
        let start = *self.step_offsets.get(step).ok_or_else(|| {
            SpiceError::InvalidValue(format!(
                "step {} out of range, plot has {} steps",
                step,
                self.step_count()
            ))
        })?;
        let end = self.step_offsets.get(step + 1).copied().unwrap_or(self.points);
        Ok(start..end)
    }

    /// Samples of a trace for one step.
    pub fn wave(&self, name: &str, step: usize) -> Result<VectorData> {
        let range = self.step_range(step)?;
        Ok(self.trace(name)?.data.slice(range))
    }

    /// Axis samples for one step. LTspice may store negative `time` values
    /// when compression is on; those are returned as absolute values.
    pub fn axis(&self, step: usize) -> Result<VectorData> {
        let axis = self
            .axis_trace()
            .ok_or_else(|| SpiceError::MissingComponent(format!("axis of '{}'", self.plot_name())))?;
        let data = axis.data.slice(self.step_range(step)?);
        if axis.name.eq_ignore_ascii_case("time") {
            Ok(data.abs())
        } else {
            Ok(data)
        }
    }
}

/// Offsets start at zero, increase strictly and stay inside the data.
pub(crate) fn valid_offsets(offsets: &[usize], steps: usize, points: usize) -> bool {
    offsets.len() == steps.max(1)
        && offsets.first() == Some(&0)
        && offsets.windows(2).all(|w| w[0] < w[1])
        && offsets.last().is_some_and(|&last| last < points.max(1))
}

// ============================================================================
// Raw file
// ============================================================================

/// A raw file: one or more plots
#[derive(Debug, Clone)]
pub struct RawFile {
    pub(crate) plots: Vec<Plot>,
    pub(crate) path: Option<PathBuf>,
}

impl RawFile {
    /// Wrap plots for writing.
    pub fn new(plots: Vec<Plot>) -> Result<RawFile> {
        if plots.is_empty() {
            return Err(SpiceError::InvalidValue("a raw file needs at least one plot".to_string()));
        }
        Ok(RawFile { plots, path: None })
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    pub fn plots(&self) -> &[Plot] {
        &self.plots
    }

    pub fn plot_names(&self) -> Vec<&str> {
        self.plots.iter().map(Plot::plot_name).collect()
    }

    /// First plot whose name matches, case-insensitive.
    pub fn plot(&self, name: &str) -> Option<&Plot> {
        self.plots.iter().find(|p| p.plot_name().eq_ignore_ascii_case(name))
    }

    fn first(&self) -> &Plot {
        &self.plots[0]
    }

    // Shortcuts to the first plot

    pub fn trace_names(&self) -> Vec<&str> {
        self.first().trace_names()
    }

    pub fn trace(&self, name: &str) -> Result<&Trace> {
        self.first().trace(name)
    }

    pub fn wave(&self, name: &str, step: usize) -> Result<VectorData> {
        self.first().wave(name, step)
    }

    pub fn axis(&self, step: usize) -> Result<VectorData> {
        self.first().axis(step)
    }

    pub fn step_count(&self) -> usize {
        self.first().step_count()
    }

    pub fn step_params(&self, step: usize) -> Option<&Params> {
        self.first().step_params(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stepped_plot() -> Plot {
        let axis = Trace::new("time", "time", VectorData::Real(vec![0.0, -1.0, 2.0, 0.0, 1.0]));
        let out = Trace::new("V(out)", "voltage", VectorData::Real32(vec![1.0, 2.0, 3.0, 4.0, 5.0]));
        Plot::new("Transient Analysis", Some(axis), vec![out])
            .unwrap()
            .with_steps(
                vec![
                    Params::from_iter([("R1", "1k")]),
                    Params::from_iter([("R1", "2k")]),
                ],
                vec![0, 3],
            )
            .unwrap()
    }

    #[test]
    fn test_dialect_detection() {
        assert_eq!(
            Dialect::detect("Linear Technology Corporation LTspice XVII"),
            Some(Dialect::LtSpice)
        );
        assert_eq!(Dialect::detect("QSPICE64"), Some(Dialect::QSpice));
        assert_eq!(Dialect::detect("ngspice-44"), Some(Dialect::NgSpice));
        assert_eq!(Dialect::detect("version 3"), None);
        assert_eq!("XYCE".parse::<Dialect>().unwrap(), Dialect::Xyce);
    }

    #[test]
    fn test_waves_by_step() {
        let plot = stepped_plot();
        assert_eq!(plot.step_count(), 2);
        assert_eq!(plot.wave("v(OUT)", 1).unwrap(), VectorData::Real32(vec![4.0, 5.0]));
        assert_eq!(plot.axis(0).unwrap(), VectorData::Real(vec![0.0, 1.0, 2.0]));
        assert_eq!(plot.step_params(1).unwrap().get("r1"), Some("2k"));
        assert_eq!(plot.steps_matching(&[("R1", "1k")]), vec![0]);
        assert!(plot.wave("V(out)", 2).is_err());
        assert!(matches!(plot.trace("V(in)"), Err(SpiceError::MissingComponent(_))));
    }

    #[test]
    fn test_plot_validation() {
        let a = Trace::new("a", "voltage", VectorData::Real(vec![1.0, 2.0]));
        let b = Trace::new("b", "voltage", VectorData::Real(vec![1.0]));
        assert!(Plot::new("Operating Point", None, vec![a.clone(), b]).is_err());

        let plot = Plot::new("Operating Point", None, vec![a]).unwrap();
        assert!(plot.axis(0).is_err());
        assert!(plot.clone().with_steps(vec![Params::new(), Params::new()], vec![0, 2]).is_err());
        assert!(plot.with_steps(vec![Params::new(), Params::new()], vec![0, 1]).is_ok());
        assert!(RawFile::new(Vec::new()).is_err());
    }
}

//! Raw waveform file reader
//!
//! Supports binary and ASCII data sections, normal and fastaccess layouts,
//! UTF-8 and UTF-16LE headers, and files holding several plots.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use num_complex::Complex64;
use tracing::{debug, info, instrument, warn};

use crate::encoding::TextEncoding;
use crate::reader::RawCursor;
use crate::steps::{apply_step_table, LogFileSteps, StepSource};
use crate::types::{Result, SpiceError};
use crate::waveform::{
    DataLayout, Dialect, NumericType, Plot, RawFile, Trace, ValueFormat, VectorData, PLOTS_WITHOUT_AXIS,
};

/// Options for reading raw files
#[derive(Debug, Clone)]
pub struct RawReadOptions {
    /// Where step tables come from.
    pub steps: Arc<dyn StepSource>,
    /// Force a dialect instead of detecting it from the `Command:` header.
    pub dialect: Option<Dialect>,
}

impl Default for RawReadOptions {
    fn default() -> Self {
        Self {
            steps: Arc::new(LogFileSteps::default()),
            dialect: None,
        }
    }
}

impl RawReadOptions {
    pub fn with_steps(mut self, steps: impl StepSource + 'static) -> Self {
        self.steps = Arc::new(steps);
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }
}

/// Parsed header of one plot
#[derive(Debug, Default)]
struct RawHeader {
    properties: Vec<(String, String)>,
    annotations: Vec<String>,
    variables: Vec<(String, String)>,
    format: Option<ValueFormat>,
}

impl RawHeader {
    fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn count(&self, key: &str) -> Result<usize> {
        let value = self
            .property(key)
            .ok_or_else(|| SpiceError::Format(format!("missing '{}' header", key)))?;
        value
            .trim()
            .parse()
            .map_err(|_| SpiceError::Format(format!("invalid '{}' header: {}", key, value)))
    }
}

// ============================================================================
// Entry points
// ============================================================================

impl RawFile {
    /// Read a raw file with default options.
    pub fn read(path: impl AsRef<Path>) -> Result<RawFile> {
        Self::read_with(path, &RawReadOptions::default())
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn read_with(path: impl AsRef<Path>, options: &RawReadOptions) -> Result<RawFile> {
        let path = path.as_ref();
        info!("Reading raw file");
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(SpiceError::Format("empty raw file".into()));
        }
        let mmap = unsafe { Mmap::map(&file)? };
        let mut raw = parse_raw(&mmap, Some(path), options)?;
        raw.path = Some(path.to_path_buf());
        Ok(raw)
    }

    /// Parse raw file contents already in memory.
    pub fn from_bytes(bytes: &[u8], options: &RawReadOptions) -> Result<RawFile> {
        parse_raw(bytes, None, options)
    }
}

fn parse_raw(bytes: &[u8], path: Option<&Path>, options: &RawReadOptions) -> Result<RawFile> {
    let mut cursor = RawCursor::new(bytes);
    let mut plots = Vec::new();

    loop {
        cursor.skip_blank();
        if cursor.remaining() == 0 {
            break;
        }
        let start = cursor.position();
        let encoding = cursor.detect_encoding();
        let header = parse_header(&mut cursor, encoding)?;
        if header.format.is_none() {
            if plots.is_empty() {
                return Err(SpiceError::Format("no data section found in raw file".into()));
            }
            debug!(offset = start, "Ignoring trailing text after the last plot");
            break;
        }
        let mut plot = read_plot(&mut cursor, header, encoding, plots.len(), options.dialect)?;
        if let Some(table) = options.steps.step_table(path, &plot) {
            apply_step_table(&mut plot, table);
        }
        debug!(
            plot = plots.len(),
            name = plot.plot_name(),
            points = plot.point_count(),
            variables = plot.traces.len(),
            steps = plot.step_count(),
            "Plot read"
        );
        plots.push(plot);
    }

    if plots.is_empty() {
        return Err(SpiceError::Format("raw file holds no plots".into()));
    }
    info!(plots = plots.len(), "Raw file read");
    Ok(RawFile { plots, path: None })
}

// ============================================================================
// Header
// ============================================================================

fn parse_header(cursor: &mut RawCursor, encoding: TextEncoding) -> Result<RawHeader> {
    let mut header = RawHeader::default();
    let mut in_variables = false;

    while let Some(line) = cursor.read_line(encoding) {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("Binary:") {
            header.format = Some(ValueFormat::Binary);
            break;
        }
        if trimmed.eq_ignore_ascii_case("Values:") {
            header.format = Some(ValueFormat::Ascii);
            break;
        }
        if in_variables {
            if trimmed.is_empty() {
                continue;
            }
            let mut parts: Vec<&str> = trimmed.split('\t').map(str::trim).collect();
            if parts.len() < 3 {
                parts = trimmed.split_whitespace().collect();
            }
            if parts.len() < 3 {
                return Err(SpiceError::Format(format!("invalid variable line: {}", trimmed)));
            }
            header.variables.push((parts[1].to_string(), parts[2].to_string()));
        } else if trimmed.starts_with('.') {
            header.annotations.push(trimmed.to_string());
        } else if trimmed.eq_ignore_ascii_case("Variables:") {
            in_variables = true;
        } else if let Some((key, value)) = line.split_once(':') {
            header.properties.push((key.trim().to_string(), value.trim().to_string()));
        } else if !trimmed.is_empty() {
            debug!(line = trimmed, "Unrecognized raw header line");
        }
    }
    Ok(header)
}

fn resolve_dialect(header: &RawHeader, forced: Option<Dialect>, plot: usize) -> Dialect {
    let detected = header.property("Command").and_then(Dialect::detect);
    match (forced, detected) {
        (Some(forced), Some(detected)) if forced != detected => {
            warn!(plot, %forced, %detected, "Dialect override differs from the file's Command header");
            forced
        }
        (Some(forced), _) => forced,
        (None, Some(detected)) => detected,
        (None, None) => Dialect::Spice3,
    }
}

/// Storage type of every variable, axis first.
fn variable_types(header: &RawHeader, flags: &[String], dialect: Dialect) -> Vec<NumericType> {
    let has_flag = |flag: &str| flags.iter().any(|f| f.eq_ignore_ascii_case(flag));
    let plot_name = header.property("Plotname").unwrap_or_default();
    let trace_type = if has_flag("complex") || plot_name.eq_ignore_ascii_case("AC Analysis") {
        NumericType::Complex
    } else if dialect != Dialect::LtSpice || has_flag("double") {
        NumericType::Real64
    } else {
        NumericType::Real32
    };
    let first_type = match trace_type {
        NumericType::Real32 => NumericType::Real64,
        NumericType::Complex if dialect == Dialect::QSpice => NumericType::Real64,
        other => other,
    };
    (0..header.variables.len())
        .map(|i| if i == 0 { first_type } else { trace_type })
        .collect()
}

// ============================================================================
// Data
// ============================================================================

fn read_plot(
    cursor: &mut RawCursor,
    header: RawHeader,
    encoding: TextEncoding,
    index: usize,
    forced: Option<Dialect>,
) -> Result<Plot> {
    let points = header.count("No. Points")?;
    let variables = header.count("No. Variables")?;
    if variables != header.variables.len() {
        return Err(SpiceError::Format(format!(
            "plot {} declares {} variables but lists {}",
            index,
            variables,
            header.variables.len()
        )));
    }

    let dialect = resolve_dialect(&header, forced, index);
    let flags: Vec<String> = header
        .property("Flags")
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let types = variable_types(&header, &flags, dialect);
    let layout = if flags.iter().any(|f| f.eq_ignore_ascii_case("fastaccess")) {
        DataLayout::FastAccess
    } else {
        DataLayout::Normal
    };
    let format = header.format.unwrap_or_default();

    let columns = match format {
        ValueFormat::Binary => read_binary(cursor, &types, points, layout, index)?,
        ValueFormat::Ascii => read_ascii(cursor, &types, points, encoding, index)?,
    };

    let plot_name = header.property("Plotname").unwrap_or_default();
    let has_axis = !PLOTS_WITHOUT_AXIS.iter().any(|p| p.eq_ignore_ascii_case(plot_name));
    let traces = header
        .variables
        .into_iter()
        .zip(columns)
        .map(|((name, kind), data)| Trace { name, kind, data })
        .collect();

    Ok(Plot {
        properties: header.properties,
        annotations: header.annotations,
        flags,
        dialect,
        encoding,
        format,
        layout,
        has_axis,
        traces,
        points,
        steps: Vec::new(),
        step_offsets: vec![0],
    })
}

fn read_value(cursor: &mut RawCursor, column: &mut VectorData) -> Result<()> {
    match column {
        VectorData::Real32(v) => v.push(cursor.read_f32()?),
        VectorData::Real(v) => v.push(cursor.read_f64()?),
        VectorData::Complex(v) => v.push(cursor.read_complex()?),
    }
    Ok(())
}

fn read_binary(
    cursor: &mut RawCursor,
    types: &[NumericType],
    points: usize,
    layout: DataLayout,
    plot: usize,
) -> Result<Vec<VectorData>> {
    let record: usize = types.iter().map(|t| t.byte_size()).sum();
    // A point count that overflows cannot fit in the file either.
    let expected = points.checked_mul(record).unwrap_or(usize::MAX);
    if cursor.remaining() < expected {
        return Err(SpiceError::TruncatedRawFile {
            plot,
            expected,
            available: cursor.remaining(),
        });
    }

    let mut columns: Vec<VectorData> = types
        .iter()
        .map(|&t| VectorData::with_capacity(t, points))
        .collect();
    match layout {
        DataLayout::FastAccess => {
            for column in columns.iter_mut() {
                for _ in 0..points {
                    read_value(cursor, column)?;
                }
            }
        }
        DataLayout::Normal => {
            for _ in 0..points {
                for column in columns.iter_mut() {
                    read_value(cursor, column)?;
                }
            }
        }
    }
    Ok(columns)
}

fn parse_number(text: &str, plot: usize) -> Result<f64> {
    text.trim()
        .parse()
        .map_err(|_| SpiceError::Format(format!("plot {}: invalid value '{}'", plot, text)))
}

fn push_ascii(column: &mut VectorData, text: &str, plot: usize) -> Result<()> {
    match column {
        VectorData::Complex(v) => {
            let (re, im) = text
                .split_once(',')
                .ok_or_else(|| SpiceError::Format(format!("plot {}: '{}' is not a complex value", plot, text)))?;
            v.push(Complex64::new(parse_number(re, plot)?, parse_number(im, plot)?));
        }
        VectorData::Real32(v) => {
            let value = text
                .trim()
                .parse::<f32>()
                .map_err(|_| SpiceError::Format(format!("plot {}: invalid value '{}'", plot, text)))?;
            v.push(value);
        }
        VectorData::Real(v) => v.push(parse_number(text, plot)?),
    }
    Ok(())
}

/// `Values:` section: each point starts with `index<TAB>value`, followed by
/// one line per remaining variable.
fn read_ascii(
    cursor: &mut RawCursor,
    types: &[NumericType],
    points: usize,
    encoding: TextEncoding,
    plot: usize,
) -> Result<Vec<VectorData>> {
    // Every value takes at least two bytes of text, so the header count is
    // never trusted beyond what the remaining data could hold.
    let capacity = points.min(cursor.remaining() / 2);
    let mut columns: Vec<VectorData> = types
        .iter()
        .map(|&t| VectorData::with_capacity(t, capacity))
        .collect();
    let expected = points.saturating_mul(types.len());
    let mut read = 0;

    for point in 0..points {
        let mut var = 0;
        while var < columns.len() {
            let Some(line) = cursor.read_line(encoding) else {
                return Err(SpiceError::TruncatedRawFile {
                    plot,
                    expected,
                    available: read,
                });
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value = if var == 0 {
                let (index, value) = line
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| SpiceError::Format(format!("plot {}: missing point index in '{}'", plot, line)))?;
                if index.parse::<usize>().ok() != Some(point) {
                    return Err(SpiceError::Format(format!(
                        "plot {}: point {} out of sequence (found '{}')",
                        plot, point, index
                    )));
                }
                value
            } else {
                line
            };
            push_ascii(&mut columns[var], value, plot)?;
            var += 1;
            read += 1;
        }
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::NoSteps;

    fn ltspice_header(flags: &str, points: usize, sentinel: &str) -> String {
        format!(
            "Title: * test\nDate: Thu Jan  1 00:00:00 2026\nPlotname: Transient Analysis\nFlags: {}\n\
             No. Variables: 2\nNo. Points: {}\nOffset:   0.0000000000000000e+000\n\
             Command: Linear Technology Corporation LTspice XVII\nVariables:\n\t0\ttime\ttime\n\t1\tV(out)\tvoltage\n{}\n",
            flags, points, sentinel
        )
    }

    #[test]
    fn test_ltspice_normal_layout_uses_float_traces() {
        let mut bytes = ltspice_header("real forward", 2, "Binary:").into_bytes();
        for (t, v) in [(0.0f64, 1.5f32), (-1e-3, 2.5)] {
            bytes.extend_from_slice(&t.to_le_bytes());
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let raw = RawFile::from_bytes(&bytes, &RawReadOptions::default()).unwrap();
        let plot = &raw.plots()[0];
        assert_eq!(plot.dialect(), Dialect::LtSpice);
        assert_eq!(plot.layout(), DataLayout::Normal);
        assert_eq!(raw.wave("V(out)", 0).unwrap(), VectorData::Real32(vec![1.5, 2.5]));
        assert_eq!(raw.axis(0).unwrap(), VectorData::Real(vec![0.0, 1e-3]));
        assert_eq!(plot.trace("time").unwrap().data, VectorData::Real(vec![0.0, -1e-3]));
    }

    #[test]
    fn test_fastaccess_layout_is_column_major() {
        let mut bytes = ltspice_header("real forward fastaccess", 2, "Binary:").into_bytes();
        for t in [0.0f64, 1.0] {
            bytes.extend_from_slice(&t.to_le_bytes());
        }
        for v in [3.0f32, 4.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let raw = RawFile::from_bytes(&bytes, &RawReadOptions::default()).unwrap();
        assert_eq!(raw.wave("v(out)", 0).unwrap(), VectorData::Real32(vec![3.0, 4.0]));
        assert_eq!(raw.axis(0).unwrap(), VectorData::Real(vec![0.0, 1.0]));
    }

    #[test]
    fn test_ascii_complex_values() {
        let text = "Title: ac\nDate: now\nPlotname: AC Analysis\nFlags: complex\nNo. Variables: 2\n\
                    No. Points: 2\nVariables:\n\t0\tfrequency\tfrequency\n\t1\tv(out)\tvoltage\nValues:\n\
                    0\t1.0e3,0.0\n\t0.5,-0.25\n\n1\t2.0e3,0.0\n\t0.25,-0.5\n";
        let raw = RawFile::from_bytes(text.as_bytes(), &RawReadOptions::default()).unwrap();
        let plot = &raw.plots()[0];
        assert_eq!(plot.dialect(), Dialect::Spice3);
        assert_eq!(plot.format(), ValueFormat::Ascii);
        let out = raw.wave("v(out)", 0).unwrap();
        assert_eq!(out.as_complex().unwrap()[1], Complex64::new(0.25, -0.5));
    }

    #[test]
    fn test_truncated_ascii_section() {
        let text = "Plotname: Operating Point\nFlags: real\nNo. Variables: 2\nNo. Points: 1\n\
                    Variables:\n\t0\tv(a)\tvoltage\n\t1\tv(b)\tvoltage\nValues:\n0\t1.0\n";
        let err = RawFile::from_bytes(text.as_bytes(), &RawReadOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            SpiceError::TruncatedRawFile { plot: 0, expected: 2, available: 1 }
        ));
    }

    #[test]
    fn test_huge_ascii_point_count_is_truncation() {
        let text = "Plotname: Operating Point\nFlags: real\nNo. Variables: 2\nNo. Points: 1000000000000000\n\
                    Variables:\n\t0\tv(a)\tvoltage\n\t1\tv(b)\tvoltage\nValues:\n0\t1.0\n\t2.0\n";
        let err = RawFile::from_bytes(text.as_bytes(), &RawReadOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            SpiceError::TruncatedRawFile { plot: 0, expected: 2_000_000_000_000_000, available: 2 }
        ));
    }

    #[test]
    fn test_overflowing_binary_point_count_is_truncation() {
        let mut bytes = ltspice_header("real forward", usize::MAX, "Binary:").into_bytes();
        bytes.extend_from_slice(&0.0f64.to_le_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        let err = RawFile::from_bytes(&bytes, &RawReadOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            SpiceError::TruncatedRawFile { plot: 0, expected: usize::MAX, available: 12 }
        ));
    }

    #[test]
    fn test_qspice_ac_axis_is_double() {
        let header = "Title: q\nPlotname: AC Analysis\nFlags: complex\nNo. Variables: 2\nNo. Points: 1\n\
                      Command: QSPICE64\nVariables:\n\t0\tFrequency\tfrequency\n\t1\tV(out)\tvoltage\nBinary:\n";
        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(&100.0f64.to_le_bytes());
        bytes.extend_from_slice(&1.0f64.to_le_bytes());
        bytes.extend_from_slice(&(-1.0f64).to_le_bytes());
        let raw = RawFile::from_bytes(&bytes, &RawReadOptions::default().with_steps(NoSteps)).unwrap();
        assert_eq!(raw.axis(0).unwrap(), VectorData::Real(vec![100.0]));
        assert_eq!(
            raw.wave("V(out)", 0).unwrap(),
            VectorData::Complex(vec![Complex64::new(1.0, -1.0)])
        );
    }

    #[test]
    fn test_header_errors() {
        let err = RawFile::from_bytes(b"Title: nothing\n", &RawReadOptions::default()).unwrap_err();
        assert!(matches!(err, SpiceError::Format(_)));

        let text = "Plotname: x\nFlags: real\nNo. Variables: 3\nNo. Points: 1\nVariables:\n\t0\ta\tvoltage\nValues:\n";
        let err = RawFile::from_bytes(text.as_bytes(), &RawReadOptions::default()).unwrap_err();
        assert!(matches!(err, SpiceError::Format(_)));
    }
}

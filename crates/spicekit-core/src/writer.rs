//! Raw waveform file writer

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, info, instrument};

use crate::encoding::{encode_text, TextEncoding};
use crate::types::Result;
use crate::waveform::{DataLayout, Dialect, NumericType, Plot, RawFile, ValueFormat, VectorData};

/// Options for writing raw files
#[derive(Debug, Clone, Copy, Default)]
pub struct RawWriteOptions {
    /// Sample ordering of binary sections. Defaults to fastaccess.
    pub layout: DataLayout,
    /// Binary (`Binary:`) or ASCII (`Values:`) data.
    pub format: ValueFormat,
    /// Header encoding; UTF-16LE variants write UTF-16LE, anything else UTF-8.
    pub encoding: TextEncoding,
}

impl RawWriteOptions {
    pub fn with_layout(mut self, layout: DataLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_format(mut self, format: ValueFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// Header keys the writer generates itself
const GENERATED_KEYS: &[&str] = &["Title", "Date", "Plotname", "Flags", "No. Variables", "No. Points"];

/// Flags replaced by the writer according to what it writes
const GENERATED_FLAGS: &[&str] = &["real", "complex", "double", "fastaccess"];

/// How a plot's variables are stored on disk
struct Storage {
    types: Vec<NumericType>,
    complex: bool,
    /// LTspice `double` flag: real traces written as doubles.
    double: bool,
}

fn storage(plot: &Plot) -> Storage {
    let count = plot.traces.len();
    let dialect = plot.dialect();
    if plot.is_complex() || plot.plot_name().eq_ignore_ascii_case("AC Analysis") {
        let first = if dialect == Dialect::QSpice {
            NumericType::Real64
        } else {
            NumericType::Complex
        };
        return Storage {
            types: (0..count)
                .map(|i| if i == 0 { first } else { NumericType::Complex })
                .collect(),
            complex: true,
            double: false,
        };
    }

    let single = dialect == Dialect::LtSpice
        && plot
            .traces
            .iter()
            .skip(1)
            .all(|t| t.data.numeric_type() == NumericType::Real32);
    let trace_type = if single { NumericType::Real32 } else { NumericType::Real64 };
    Storage {
        types: (0..count)
            .map(|i| if i == 0 { NumericType::Real64 } else { trace_type })
            .collect(),
        complex: false,
        double: dialect == Dialect::LtSpice && !single,
    }
}

fn write_header(out: &mut String, plot: &Plot, storage: &Storage, options: &RawWriteOptions) {
    let mut flags = vec![if storage.complex { "complex" } else { "real" }.to_string()];
    flags.extend(
        plot.flags()
            .iter()
            .filter(|f| !GENERATED_FLAGS.iter().any(|g| g.eq_ignore_ascii_case(f)))
            .cloned(),
    );
    if storage.double {
        flags.push("double".to_string());
    }
    if options.format == ValueFormat::Binary && options.layout == DataLayout::FastAccess {
        flags.push("fastaccess".to_string());
    }

    let mut line = |key: &str, value: &str| {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    };
    line("Title", plot.title());
    line("Date", plot.date());
    line("Plotname", plot.plot_name());
    line("Flags", &flags.join(" "));
    line("No. Variables", &plot.traces.len().to_string());
    line("No. Points", &plot.point_count().to_string());
    for (key, value) in plot.properties() {
        if !GENERATED_KEYS.iter().any(|g| g.eq_ignore_ascii_case(key)) {
            line(key, value);
        }
    }
    if plot.property("Command").is_none() {
        if let Some(command) = plot.dialect().command() {
            line("Command", command);
        }
    }

    for annotation in plot.annotations() {
        out.push_str(annotation);
        out.push('\n');
    }
    out.push_str("Variables:\n");
    for (i, trace) in plot.traces.iter().enumerate() {
        out.push_str(&format!("\t{}\t{}\t{}\n", i, trace.name, trace.kind));
    }
    out.push_str(match options.format {
        ValueFormat::Binary => "Binary:\n",
        ValueFormat::Ascii => "Values:\n",
    });
}

/// Write one sample in its storage type. Real data is widened losslessly.
fn write_sample(out: &mut Vec<u8>, data: &VectorData, index: usize, kind: NumericType) -> Result<()> {
    let sample = data.get(index).unwrap_or_default();
    match kind {
        NumericType::Real32 => {
            let value = match data {
                VectorData::Real32(v) => v[index],
                _ => sample.re as f32,
            };
            out.write_f32::<LittleEndian>(value)?;
        }
        NumericType::Real64 => out.write_f64::<LittleEndian>(sample.re)?,
        NumericType::Complex => {
            out.write_f64::<LittleEndian>(sample.re)?;
            out.write_f64::<LittleEndian>(sample.im)?;
        }
    }
    Ok(())
}

fn ascii_sample(data: &VectorData, index: usize, kind: NumericType) -> String {
    let sample = data.get(index).unwrap_or_default();
    match (kind, data) {
        (NumericType::Real32, VectorData::Real32(v)) => format!("{:e}", v[index]),
        (NumericType::Complex, _) => format!("{:e},{:e}", sample.re, sample.im),
        _ => format!("{:e}", sample.re),
    }
}

fn write_plot(out: &mut Vec<u8>, plot: &Plot, options: &RawWriteOptions) -> Result<()> {
    let encoding = if options.encoding.is_utf16() {
        TextEncoding::Utf16Le
    } else {
        TextEncoding::Utf8
    };
    let storage = storage(plot);
    let types = &storage.types;
    let mut header = String::new();
    write_header(&mut header, plot, &storage, options);
    out.extend_from_slice(&encode_text(&header, encoding));

    let points = plot.point_count();
    match options.format {
        ValueFormat::Binary => match options.layout {
            DataLayout::FastAccess => {
                for (trace, &kind) in plot.traces.iter().zip(types) {
                    for i in 0..points {
                        write_sample(out, &trace.data, i, kind)?;
                    }
                }
            }
            DataLayout::Normal => {
                for i in 0..points {
                    for (trace, &kind) in plot.traces.iter().zip(types) {
                        write_sample(out, &trace.data, i, kind)?;
                    }
                }
            }
        },
        ValueFormat::Ascii => {
            let mut text = String::new();
            for i in 0..points {
                for (var, (trace, &kind)) in plot.traces.iter().zip(types).enumerate() {
                    if var == 0 {
                        text.push_str(&i.to_string());
                    }
                    text.push('\t');
                    text.push_str(&ascii_sample(&trace.data, i, kind));
                    text.push('\n');
                }
            }
            out.extend_from_slice(&encode_text(&text, encoding));
        }
    }
    debug!(name = plot.plot_name(), points, variables = types.len(), "Plot written");
    Ok(())
}

impl RawFile {
    /// Encode every plot.
    pub fn to_bytes(&self, options: &RawWriteOptions) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for plot in &self.plots {
            write_plot(&mut out, plot, options)?;
        }
        Ok(out)
    }

    #[instrument(skip_all, fields(output = %path.as_ref().display()))]
    pub fn write(&self, path: impl AsRef<Path>, options: &RawWriteOptions) -> Result<()> {
        info!("Writing raw file");
        let bytes = self.to_bytes(options)?;
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&bytes)?;
        writer.flush()?;
        info!(bytes = bytes.len(), "Write complete");
        Ok(())
    }
}

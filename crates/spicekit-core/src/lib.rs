//! # SpiceKit - Core Library
//!
//! Editors and codecs for the files that SPICE simulators read and write.
//!
//! ## Supported Formats
//!
//! - SPICE netlists (`.net`, `.cir`, `.sp`) with `.SUBCKT`, `.LIB`/`.INC` and `.CONTROL` blocks
//! - LTspice schematics (`.asc`)
//! - QSPICE schematics (`.qsch`)
//! - Raw waveform files (binary and ASCII, LTspice, QSPICE, ngspice and Xyce dialects)
//!
//! ## Features
//!
//! - Lossless round trip: lines that were not edited are written back byte for byte
//! - Hierarchical component paths (`X1:R1`) with per-instance copy-on-write of subcircuits
//! - Read-only, lazily loaded library definitions
//! - Memory-mapped raw file reading, normal and fastaccess layouts, stepped data
//! - Structured logging via `tracing` for diagnostics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spicekit_core::Netlist;
//!
//! let mut netlist = Netlist::read("amplifier.net").unwrap();
//! println!("R1 = {}", netlist.component_value("R1").unwrap());
//!
//! // Only instance X1 is changed; X2 keeps the shared definition.
//! netlist.set_component_value("X1:R1", 4700.0).unwrap();
//! netlist.add_instruction(".tran 1m").unwrap();
//! netlist.save("amplifier_edited.net").unwrap();
//! ```
//!
//! ## Reading Waveforms
//!
//! ```rust,no_run
//! use spicekit_core::RawFile;
//!
//! let raw = RawFile::read("amplifier.raw").unwrap();
//! for step in 0..raw.step_count() {
//!     let out = raw.wave("V(out)", step).unwrap();
//!     println!("step {}: {} points", step, out.len());
//! }
//! ```
//!
//! ## Enabling Logging
//!
//! This library uses `tracing` for structured logging. To see log output,
//! initialize a tracing subscriber in your application:
//!
//! ```rust,ignore
//! // Add tracing-subscriber to your Cargo.toml
//! tracing_subscriber::fmt::init();
//!
//! // Now library logs will be visible
//! let netlist = spicekit_core::Netlist::read("amplifier.net").unwrap();
//! ```

mod circuit;
mod config;
mod element;
mod encoding;
mod library;
mod netlist;
mod placement;
mod prefix;
mod qsch;
mod raw_parser;
mod reader;
mod schematic;
mod steps;
mod tokenizer;
mod types;
mod units;
mod waveform;
mod writer;

// Re-export public types
pub use types::{
    // Editor scoping
    EditorKind,
    // Error types
    Result,
    SpiceError,
    // Constants
    MAX_LINE_WIDTH,
    SUBCKT_DIVIDER,
    UNIQUE_SIMULATION_INSTRUCTIONS,
};

// Netlist model and editor
pub use circuit::{Circuit, ControlBlock, Instruction, NetlistItem, Subcircuit};
pub use element::{Element, Params, ToSpiceValue};
pub use library::Library;
pub use netlist::{ElementHandle, Netlist};
pub use prefix::{PrefixRegistry, PrefixRule, ValueSlot};

// Schematic editor
pub use placement::{AttributeSlot, Placement, PlacementTable};
pub use schematic::{Flag, IoPin, Rotation, Schematic, SchematicItem, Symbol, Text, TextKind, Wire};
pub use qsch::{QschTag, QspiceSchematic, QSCH_HEADER};

// Raw waveform codec
pub use raw_parser::RawReadOptions;
pub use steps::{parse_step_lines, FixedSteps, LogFileSteps, NoSteps, StepSource, StepTable};
pub use waveform::{
    DataLayout, Dialect, NumericType, Plot, RawFile, Trace, ValueFormat, VectorData, PLOTS_WITHOUT_AXIS,
};
pub use writer::RawWriteOptions;

// Configuration and utilities
pub use config::{library_paths, reset_library_paths, set_library_paths};
pub use encoding::{decode_text, encode_text, read_text_file, write_text_file, TextEncoding};
pub use tokenizer::{join_continuations, parse_assignments, quote_value, split_comment, split_param, tokenize};
pub use units::{format_eng, to_float};

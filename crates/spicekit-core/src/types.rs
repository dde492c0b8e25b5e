//! Common types, errors, and constants shared by the editors and the raw codec

use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

/// Separator between instance names in a hierarchical reference (`X1:R1`)
pub const SUBCKT_DIVIDER: char = ':';

/// Analyses of which a netlist may hold only one at a time
pub const UNIQUE_SIMULATION_INSTRUCTIONS: &[&str] = &[".AC", ".DC", ".TRAN", ".NOISE", ".TF", ".OP"];

/// Column after which re-rendered netlist lines are wrapped with `+`
pub const MAX_LINE_WIDTH: usize = 80;

// ============================================================================
// Enums
// ============================================================================

/// Which editor a piece of process-wide configuration applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditorKind {
    /// SPICE netlist editor (`.net`, `.cir`, `.sp`)
    Netlist,
    /// LTspice schematic editor (`.asc`)
    Schematic,
    /// QSPICE schematic editor (`.qsch`)
    Qspice,
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for every editor and codec operation
#[derive(Debug, Error)]
pub enum SpiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Input the grammar cannot place: bad nesting, malformed records, unknown
    /// device kinds passed to the strict element parser.
    #[error("unrecognized format at line {line}: {message}")]
    UnrecognizedFormat { line: usize, message: String },

    #[error("subcircuit '{name}' comes from library '{library}' and is read-only")]
    ImmutableLibrary { name: String, library: String },

    #[error("component '{0}' not found")]
    MissingComponent(String),

    #[error("parameter '{0}' not found")]
    MissingParameter(String),

    /// `expected` and `available` count bytes for binary data and values for
    /// ASCII data.
    #[error("truncated raw file: plot {plot} is missing data ({available} of {expected} available)")]
    TruncatedRawFile {
        plot: usize,
        expected: usize,
        available: usize,
    },

    /// Only surfaced by strict lookups; editors log it and carry on.
    #[error("no value placement known for symbol '{symbol}' used by '{component}'")]
    AmbiguousAttribute { component: String, symbol: String },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("Format error: {0}")]
    Format(String),
}

impl SpiceError {
    pub(crate) fn unrecognized(line: usize, message: impl Into<String>) -> Self {
        SpiceError::UnrecognizedFormat {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SpiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SpiceError::unrecognized(12, "unbalanced .ENDS");
        assert_eq!(err.to_string(), "unrecognized format at line 12: unbalanced .ENDS");

        let err = SpiceError::TruncatedRawFile {
            plot: 0,
            expected: 16000,
            available: 160,
        };
        assert!(err.to_string().contains("16000"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SpiceError = io.into();
        assert!(matches!(err, SpiceError::Io(_)));
    }
}

//! Lazily loaded `.LIB` / `.INCLUDE` files
//!
//! A library file is only read the first time a lookup misses the editable
//! definitions. Everything found in it is read-only.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::circuit::{parse_circuit, LibraryDirective, NetlistItem, Subcircuit};
use crate::config::find_in_search_paths;
use crate::encoding::read_text_file;
use crate::prefix::PrefixRegistry;
use crate::types::EditorKind;

/// One library reference of a netlist
#[derive(Debug, Clone)]
pub struct Library {
    file: String,
    section: Option<String>,
    definitions: OnceCell<Vec<Subcircuit>>,
}

impl Library {
    pub(crate) fn new(directive: LibraryDirective) -> Self {
        Self {
            file: directive.file,
            section: directive.section,
            definitions: OnceCell::new(),
        }
    }

    /// File name as written in the netlist.
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn section(&self) -> Option<&str> {
        self.section.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.definitions.get().is_some()
    }

    /// Definitions in this library, loading the file on first use.
    pub(crate) fn definitions(&self, base_dir: Option<&Path>, registry: &PrefixRegistry) -> &[Subcircuit] {
        self.definitions
            .get_or_init(|| self.load(base_dir, registry))
    }

    pub(crate) fn find(
        &self,
        name: &str,
        base_dir: Option<&Path>,
        registry: &PrefixRegistry,
    ) -> Option<&Subcircuit> {
        self.definitions(base_dir, registry)
            .iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }

    fn resolve(&self, base_dir: Option<&Path>) -> Option<PathBuf> {
        find_in_search_paths(&self.file, base_dir, EditorKind::Netlist)
    }

    fn load(&self, base_dir: Option<&Path>, registry: &PrefixRegistry) -> Vec<Subcircuit> {
        let Some(path) = self.resolve(base_dir) else {
            warn!(file = %self.file, "Library file not found in any search path");
            return Vec::new();
        };
        let text = match read_text_file(&path) {
            Ok((text, _)) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Library file could not be read");
                return Vec::new();
            }
        };
        let parsed = match parse_circuit(&text, registry) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Library file could not be parsed");
                return Vec::new();
            }
        };

        let origin = path.display().to_string();
        let mut definitions = Vec::new();
        collect_definitions(parsed.circuit.items, &origin, &mut definitions);
        if !parsed.libraries.is_empty() {
            debug!(path = %origin, nested = parsed.libraries.len(), "Nested library references are not followed");
        }
        info!(path = %origin, definitions = definitions.len(), "Library loaded");
        definitions
    }
}

/// Top-level definitions of a library file. `.LIB` section markers are plain
/// instructions, so definitions inside sections are top-level too.
fn collect_definitions(items: Vec<NetlistItem>, origin: &str, out: &mut Vec<Subcircuit>) {
    for item in items {
        if let NetlistItem::Subcircuit(mut sub) = item {
            sub.library = Some(origin.to_string());
            out.push(sub);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_once_and_marks_read_only() {
        let dir = std::env::temp_dir().join("spicekit_library_unit");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("parts.lib"),
            "* parts\n.subckt buf in out\nE1 out 0 in 0 1\n.ends buf\n.model D1N D(Is=1e-14)\n",
        )
        .unwrap();

        let lib = Library::new(LibraryDirective {
            file: "parts.lib".into(),
            section: None,
        });
        assert!(!lib.is_loaded());
        let registry = PrefixRegistry::standard();
        let buf = lib.find("BUF", Some(&dir), &registry).unwrap();
        assert!(buf.is_library());
        assert!(lib.is_loaded());
        assert!(lib.find("nothing", Some(&dir), &registry).is_none());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let lib = Library::new(LibraryDirective {
            file: "does_not_exist_anywhere.lib".into(),
            section: None,
        });
        let registry = PrefixRegistry::standard();
        assert!(lib.definitions(None, &registry).is_empty());
    }
}

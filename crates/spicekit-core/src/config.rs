//! Process-wide library search paths
//!
//! Each editor kind keeps its own list. Setting a list replaces it; there is
//! no merging with earlier values.

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::types::EditorKind;

struct SearchPaths {
    netlist: Vec<PathBuf>,
    schematic: Vec<PathBuf>,
    qspice: Vec<PathBuf>,
}

impl SearchPaths {
    fn get(&self, kind: EditorKind) -> &Vec<PathBuf> {
        match kind {
            EditorKind::Netlist => &self.netlist,
            EditorKind::Schematic => &self.schematic,
            EditorKind::Qspice => &self.qspice,
        }
    }

    fn get_mut(&mut self, kind: EditorKind) -> &mut Vec<PathBuf> {
        match kind {
            EditorKind::Netlist => &mut self.netlist,
            EditorKind::Schematic => &mut self.schematic,
            EditorKind::Qspice => &mut self.qspice,
        }
    }
}

static SEARCH_PATHS: RwLock<SearchPaths> = RwLock::new(SearchPaths {
    netlist: Vec::new(),
    schematic: Vec::new(),
    qspice: Vec::new(),
});

// A panic while holding the lock cannot leave a Vec half-written, so a
// poisoned lock is still safe to use.
fn read_paths() -> RwLockReadGuard<'static, SearchPaths> {
    SEARCH_PATHS.read().unwrap_or_else(|e| e.into_inner())
}

fn write_paths() -> RwLockWriteGuard<'static, SearchPaths> {
    SEARCH_PATHS.write().unwrap_or_else(|e| e.into_inner())
}

/// Current search paths for an editor kind.
pub fn library_paths(kind: EditorKind) -> Vec<PathBuf> {
    read_paths().get(kind).clone()
}

/// Replace the search paths for an editor kind.
pub fn set_library_paths<I, P>(kind: EditorKind, paths: I)
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
    debug!(?kind, count = paths.len(), "Library search paths replaced");
    *write_paths().get_mut(kind) = paths;
}

/// Clear the search paths for an editor kind.
pub fn reset_library_paths(kind: EditorKind) {
    write_paths().get_mut(kind).clear();
}

/// Find `file_name` in `local_dir` first, then in the search paths for `kind`.
///
/// Absolute names are returned as-is when they exist.
pub(crate) fn find_in_search_paths(
    file_name: &str,
    local_dir: Option<&Path>,
    kind: EditorKind,
) -> Option<PathBuf> {
    let name = Path::new(file_name);
    if name.is_absolute() {
        return name.exists().then(|| name.to_path_buf());
    }
    local_dir
        .into_iter()
        .map(Path::to_path_buf)
        .chain(library_paths(kind))
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

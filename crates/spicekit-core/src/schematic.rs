//! LTspice schematic (`.asc`) editor
//!
//! A schematic is a list of line records. `WINDOW` and `SYMATTR` lines belong
//! to the `SYMBOL` record above them; every other record stands alone.
//! Records that were not edited are written back exactly as read, and record
//! kinds the editor does not model (`LINE`, `RECTANGLE`, `DATAFLAG`, ...) are
//! kept verbatim.
//!
//! Symbols whose `.asy` declares `SymbolType BLOCK` are hierarchical: the
//! sheet with the same stem (`amp.asy` / `amp.asc`) is loaded on read and its
//! components are addressed as `XU1:R1`. Every instance of a block shares the
//! one sheet file, so an edit through one instance shows through all of them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, instrument, warn};

use crate::config::find_in_search_paths;
use crate::element::{Params, ToSpiceValue};
use crate::encoding::{read_text_file, write_text_file, TextEncoding};
use crate::placement::{AttributeSlot, Placement, PlacementTable};
use crate::tokenizer::{parse_assignments, split_param};
use crate::types::{EditorKind, Result, SpiceError, SUBCKT_DIVIDER, UNIQUE_SIMULATION_INSTRUCTIONS};

// ============================================================================
// Records
// ============================================================================

/// Symbol orientation: rotation, optionally mirrored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    R0,
    R90,
    R180,
    R270,
    M0,
    M90,
    M180,
    M270,
}

impl FromStr for Rotation {
    type Err = SpiceError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "R0" => Rotation::R0,
            "R90" => Rotation::R90,
            "R180" => Rotation::R180,
            "R270" => Rotation::R270,
            "M0" => Rotation::M0,
            "M90" => Rotation::M90,
            "M180" => Rotation::M180,
            "M270" => Rotation::M270,
            other => return Err(SpiceError::InvalidValue(format!("unknown rotation '{}'", other))),
        })
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Rotation::R0 => "R0",
            Rotation::R90 => "R90",
            Rotation::R180 => "R180",
            Rotation::R270 => "R270",
            Rotation::M0 => "M0",
            Rotation::M90 => "M90",
            Rotation::M180 => "M180",
            Rotation::M270 => "M270",
        };
        f.write_str(text)
    }
}

/// A placed component with its windows and attributes
#[derive(Debug, Clone)]
pub struct Symbol {
    name: String,
    x: i32,
    y: i32,
    rotation: Rotation,
    windows: Vec<String>,
    attributes: Vec<(String, String)>,
    source: Vec<String>,
    dirty: bool,
}

impl Symbol {
    /// Symbol type, e.g. `res` or `Opamps\\LT1001`.
    pub fn symbol(&self) -> &str {
        &self.name
    }

    /// Instance name from `SYMATTR InstName`.
    pub fn inst_name(&self) -> Option<&str> {
        self.attribute("InstName")
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set an attribute, appending it when the symbol does not have it yet.
    pub fn set_attribute(&mut self, key: &str, value: &str) {
        match self.attributes.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some((_, slot)) => *slot = value.to_string(),
            None => self.attributes.push((key.to_string(), value.to_string())),
        }
        self.dirty = true;
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        self.dirty = true;
        Some(self.attributes.remove(index).1)
    }

    fn render(&self) -> Vec<String> {
        if !self.dirty {
            return self.source.clone();
        }
        let mut lines = vec![format!("SYMBOL {} {} {} {}", self.name, self.x, self.y, self.rotation)];
        lines.extend(self.windows.iter().cloned());
        lines.extend(self.attributes.iter().map(|(k, v)| {
            if v.is_empty() {
                format!("SYMATTR {}", k)
            } else {
                format!("SYMATTR {} {}", k, v)
            }
        }));
        lines
    }
}

/// What a `TEXT` record holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    /// `!` prefix: simulator directive.
    Directive,
    /// `;` prefix: comment.
    Comment,
    /// No prefix: plain label.
    Label,
}

/// A `TEXT` record
#[derive(Debug, Clone)]
pub struct Text {
    x: i32,
    y: i32,
    justify: String,
    size: String,
    kind: TextKind,
    /// Content without the kind prefix, with `\n` kept as the two-character escape.
    content: String,
    source: Option<String>,
}

impl Text {
    pub fn kind(&self) -> TextKind {
        self.kind
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// Content lines; LTspice writes line breaks as a literal `\n`.
    pub fn lines(&self) -> Vec<&str> {
        self.content.split("\\n").collect()
    }

    /// Content with line breaks restored.
    pub fn content(&self) -> String {
        self.content.replace("\\n", "\n")
    }

    fn set_content(&mut self, text: &str) {
        self.content = text.trim_end_matches('\n').replace("\r\n", "\n").replace('\n', "\\n");
        self.source = None;
    }

    fn set_kind(&mut self, kind: TextKind) {
        self.kind = kind;
        self.source = None;
    }

    fn render(&self) -> String {
        if let Some(source) = &self.source {
            return source.clone();
        }
        let marker = match self.kind {
            TextKind::Directive => "!",
            TextKind::Comment => ";",
            TextKind::Label => "",
        };
        format!(
            "TEXT {} {} {} {} {}{}",
            self.x, self.y, self.justify, self.size, marker, self.content
        )
    }
}

/// `WIRE x1 y1 x2 y2`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wire {
    pub start: (i32, i32),
    pub end: (i32, i32),
}

/// `FLAG x y name`: a net label; `0` is ground
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    pub position: (i32, i32),
    pub name: String,
}

/// `IOPIN x y direction`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoPin {
    pub position: (i32, i32),
    pub direction: String,
}

/// One record of a schematic, in file order
#[derive(Debug, Clone)]
pub enum SchematicItem {
    Wire(Wire, String),
    Flag(Flag, String),
    IoPin(IoPin, String),
    Symbol(Symbol),
    Text(Text),
    /// `Version`, `SHEET`, graphics and anything else, kept verbatim.
    Other(String),
}

impl SchematicItem {
    fn coordinates(&self) -> Vec<(i32, i32)> {
        match self {
            SchematicItem::Wire(w, _) => vec![w.start, w.end],
            SchematicItem::Flag(f, _) => vec![f.position],
            SchematicItem::IoPin(p, _) => vec![p.position],
            SchematicItem::Symbol(s) => vec![s.position()],
            SchematicItem::Text(t) => vec![t.position()],
            SchematicItem::Other(_) => Vec::new(),
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn coordinate(token: Option<&str>, line: usize) -> Result<i32> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| SpiceError::unrecognized(line, "expected an integer coordinate"))
}

/// Split `line` after `count` whitespace separated words, returning the words
/// and the untouched remainder.
fn split_words(line: &str, count: usize) -> (Vec<&str>, &str) {
    let mut words = Vec::with_capacity(count);
    let mut rest = line;
    for _ in 0..count {
        let trimmed = rest.trim_start();
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        if end == 0 {
            break;
        }
        words.push(&trimmed[..end]);
        rest = &trimmed[end..];
    }
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    (words, rest)
}

fn parse_text(line: &str, line_no: usize) -> Result<Text> {
    let (words, rest) = split_words(line, 5);
    if words.len() < 5 {
        return Err(SpiceError::unrecognized(line_no, "TEXT needs position, alignment and size"));
    }
    let (kind, content) = if let Some(c) = rest.strip_prefix('!') {
        (TextKind::Directive, c)
    } else if let Some(c) = rest.strip_prefix(';') {
        (TextKind::Comment, c)
    } else {
        (TextKind::Label, rest)
    };
    Ok(Text {
        x: coordinate(words.get(1).copied(), line_no)?,
        y: coordinate(words.get(2).copied(), line_no)?,
        justify: words[3].to_string(),
        size: words[4].to_string(),
        kind,
        content: content.to_string(),
        source: Some(line.to_string()),
    })
}

fn parse_symbol(line: &str, line_no: usize) -> Result<Symbol> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.len() < 5 {
        return Err(SpiceError::unrecognized(line_no, "SYMBOL needs a name, position and rotation"));
    }
    let n = words.len();
    let rotation = words[n - 1]
        .parse::<Rotation>()
        .map_err(|e| SpiceError::unrecognized(line_no, e.to_string()))?;
    Ok(Symbol {
        name: words[1..n - 3].join(" "),
        x: coordinate(Some(words[n - 3]), line_no)?,
        y: coordinate(Some(words[n - 2]), line_no)?,
        rotation,
        windows: Vec::new(),
        attributes: Vec::new(),
        source: vec![line.to_string()],
        dirty: false,
    })
}

fn parse_items(lines: &[&str]) -> Result<Vec<SchematicItem>> {
    let mut items: Vec<SchematicItem> = Vec::with_capacity(lines.len());
    for (i, &line) in lines.iter().enumerate() {
        let line_no = i + 1;
        let mut words = line.split_whitespace();
        let keyword = words.next().unwrap_or_default();
        let item = match keyword {
            "WIRE" => {
                let wire = Wire {
                    start: (coordinate(words.next(), line_no)?, coordinate(words.next(), line_no)?),
                    end: (coordinate(words.next(), line_no)?, coordinate(words.next(), line_no)?),
                };
                SchematicItem::Wire(wire, line.to_string())
            }
            "FLAG" => {
                let position = (coordinate(words.next(), line_no)?, coordinate(words.next(), line_no)?);
                let name = words.collect::<Vec<_>>().join(" ");
                SchematicItem::Flag(Flag { position, name }, line.to_string())
            }
            "IOPIN" => {
                let position = (coordinate(words.next(), line_no)?, coordinate(words.next(), line_no)?);
                let direction = words.next().unwrap_or_default().to_string();
                SchematicItem::IoPin(IoPin { position, direction }, line.to_string())
            }
            "SYMBOL" => SchematicItem::Symbol(parse_symbol(line, line_no)?),
            "WINDOW" | "SYMATTR" => {
                let Some(SchematicItem::Symbol(symbol)) = items.last_mut() else {
                    return Err(SpiceError::unrecognized(
                        line_no,
                        format!("{} outside of a SYMBOL record", keyword),
                    ));
                };
                symbol.source.push(line.to_string());
                if keyword == "WINDOW" {
                    symbol.windows.push(line.to_string());
                } else {
                    let (words, value) = split_words(line, 2);
                    let key = words.get(1).copied().unwrap_or_default();
                    symbol.attributes.push((key.to_string(), value.to_string()));
                }
                continue;
            }
            "TEXT" => SchematicItem::Text(parse_text(line, line_no)?),
            _ => SchematicItem::Other(line.to_string()),
        };
        items.push(item);
    }
    Ok(items)
}

// ============================================================================
// Schematic
// ============================================================================

/// A sheet loaded for a hierarchical block
#[derive(Debug, Clone)]
struct SubSheet {
    path: PathBuf,
    schematic: Schematic,
    /// Reached through a mutating call; written back on save.
    touched: bool,
}

/// An editable LTspice schematic
#[derive(Debug, Clone)]
pub struct Schematic {
    items: Vec<SchematicItem>,
    placements: PlacementTable,
    path: Option<PathBuf>,
    encoding: TextEncoding,
    newline: &'static str,
    trailing_newline: bool,
    sheets: Vec<SubSheet>,
    /// Instance name to index in `sheets`.
    instances: Vec<(String, usize)>,
}

impl Schematic {
    // ------------------------------------------------------------------------
    // Loading and saving
    // ------------------------------------------------------------------------

    pub fn parse(text: &str) -> Result<Schematic> {
        let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
        let trailing_newline = text.ends_with('\n');
        let mut lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
        if trailing_newline {
            lines.pop();
        }
        let items = parse_items(&lines)?;
        debug!(records = items.len(), "Schematic parsed");
        Ok(Schematic {
            items,
            placements: PlacementTable::standard(),
            path: None,
            encoding: TextEncoding::Utf8,
            newline,
            trailing_newline,
            sheets: Vec::new(),
            instances: Vec::new(),
        })
    }

    /// Read a schematic and the sheets of its hierarchical blocks.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn read(path: impl AsRef<Path>) -> Result<Schematic> {
        info!("Reading schematic");
        Self::read_nested(path.as_ref(), &mut Vec::new())
    }

    /// `open` holds the sheets currently being read, to stop at cycles.
    fn read_nested(path: &Path, open: &mut Vec<PathBuf>) -> Result<Schematic> {
        let (text, encoding) = read_text_file(path)?;
        let mut schematic = Self::parse(&text)?;
        schematic.path = Some(path.to_path_buf());
        schematic.encoding = encoding;

        open.push(canonical(path));
        schematic.load_sheets(open);
        open.pop();
        Ok(schematic)
    }

    fn load_sheets(&mut self, open: &mut Vec<PathBuf>) {
        let blocks: Vec<(String, PathBuf)> = self
            .symbols()
            .filter_map(|s| Some((s.inst_name()?.to_string(), self.sheet_file(s.symbol())?)))
            .collect();

        for (instance, path) in blocks {
            let key = canonical(&path);
            if let Some(index) = self.sheets.iter().position(|s| canonical(&s.path) == key) {
                self.instances.push((instance, index));
                continue;
            }
            if open.contains(&key) {
                warn!(%instance, path = %path.display(), "Block sheet includes itself; not loaded");
                continue;
            }
            match Self::read_nested(&path, open) {
                Ok(mut schematic) => {
                    schematic.placements = self.placements.clone();
                    debug!(%instance, path = %path.display(), "Block sheet loaded");
                    self.instances.push((instance, self.sheets.len()));
                    self.sheets.push(SubSheet {
                        path,
                        schematic,
                        touched: false,
                    });
                }
                Err(e) => warn!(%instance, path = %path.display(), error = %e, "Block sheet could not be read"),
            }
        }
    }

    /// Replace the value placement table.
    pub fn with_placements(mut self, placements: PlacementTable) -> Self {
        self.placements = placements;
        self
    }

    pub fn placements_mut(&mut self) -> &mut PlacementTable {
        &mut self.placements
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            let lines = match item {
                SchematicItem::Wire(_, line)
                | SchematicItem::Flag(_, line)
                | SchematicItem::IoPin(_, line)
                | SchematicItem::Other(line) => vec![line.clone()],
                SchematicItem::Symbol(symbol) => symbol.render(),
                SchematicItem::Text(text) => vec![text.render()],
            };
            for line in lines {
                out.push_str(&line);
                out.push_str(self.newline);
            }
        }
        if !self.trailing_newline && out.ends_with(self.newline) {
            out.truncate(out.len() - self.newline.len());
        }
        out
    }

    /// Write the schematic, and every block sheet that was edited back to
    /// its own file.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        info!("Writing schematic");
        write_text_file(path.as_ref(), &self.to_text(), self.encoding)?;
        for sheet in self.sheets.iter().filter(|s| s.touched) {
            sheet.schematic.save(&sheet.path)?;
        }
        Ok(())
    }

    pub fn items(&self) -> &[SchematicItem] {
        &self.items
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    // ------------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------------

    fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.items.iter().filter_map(|item| match item {
            SchematicItem::Symbol(s) => Some(s),
            _ => None,
        })
    }

    fn sheet_index(&self, instance: &str) -> Option<usize> {
        self.instances
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(instance))
            .map(|&(_, index)| index)
    }

    /// Sheet of a hierarchical block instance.
    pub fn sheet(&self, instance: &str) -> Option<&Schematic> {
        self.sheet_index(instance).map(|i| &self.sheets[i].schematic)
    }

    /// Sheet that holds `path` and the component name inside it.
    fn owner<'p>(&self, path: &'p str) -> Result<(&Schematic, &'p str)> {
        let Some((instance, rest)) = path.split_once(SUBCKT_DIVIDER) else {
            return Ok((self, path));
        };
        self.sheet(instance)
            .ok_or_else(|| SpiceError::MissingComponent(path.to_string()))?
            .owner(rest)
    }

    fn owner_mut<'p>(&mut self, path: &'p str) -> Result<(&mut Schematic, &'p str)> {
        let Some((instance, rest)) = path.split_once(SUBCKT_DIVIDER) else {
            return Ok((self, path));
        };
        let index = self
            .sheet_index(instance)
            .ok_or_else(|| SpiceError::MissingComponent(path.to_string()))?;
        let sheet = &mut self.sheets[index];
        sheet.touched = true;
        sheet.schematic.owner_mut(rest)
    }

    fn position_symbol(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|item| match item {
            SchematicItem::Symbol(s) => s.inst_name().is_some_and(|n| n.eq_ignore_ascii_case(name)),
            _ => false,
        })
    }

    /// Instance names whose first letter is one of `prefixes` (all when empty).
    pub fn components(&self, prefixes: &str) -> Vec<String> {
        let wanted: Vec<char> = prefixes.chars().map(|c| c.to_ascii_uppercase()).collect();
        self.symbols()
            .filter_map(Symbol::inst_name)
            .filter(|name| {
                wanted.is_empty()
                    || name
                        .chars()
                        .next()
                        .is_some_and(|c| wanted.contains(&c.to_ascii_uppercase()))
            })
            .map(str::to_string)
            .collect()
    }

    /// Symbol by instance name or hierarchical path (`XU1:R1`).
    pub fn symbol(&self, path: &str) -> Result<&Symbol> {
        let (sheet, name) = self.owner(path)?;
        sheet
            .position_symbol(name)
            .and_then(|i| match &sheet.items[i] {
                SchematicItem::Symbol(s) => Some(s),
                _ => None,
            })
            .ok_or_else(|| SpiceError::MissingComponent(path.to_string()))
    }

    pub fn symbol_mut(&mut self, path: &str) -> Result<&mut Symbol> {
        let (sheet, name) = self.owner_mut(path)?;
        let index = sheet
            .position_symbol(name)
            .ok_or_else(|| SpiceError::MissingComponent(path.to_string()))?;
        match &mut sheet.items[index] {
            SchematicItem::Symbol(s) => Ok(s),
            _ => Err(SpiceError::MissingComponent(path.to_string())),
        }
    }

    /// `Value` followed by `Value2` when present.
    pub fn component_value(&self, name: &str) -> Result<String> {
        let symbol = self.symbol(name)?;
        let parts: Vec<&str> = [symbol.attribute("Value"), symbol.attribute("Value2")]
            .into_iter()
            .flatten()
            .filter(|v| !v.is_empty())
            .collect();
        if parts.is_empty() {
            return Err(SpiceError::MissingParameter(format!("{} value", name)));
        }
        Ok(parts.join(" "))
    }

    /// Attributes (except `InstName`) plus the assignments found in the
    /// `key=value` list slots.
    pub fn component_parameters(&self, name: &str) -> Result<Params> {
        let symbol = self.symbol(name)?;
        let mut params = Params::new();
        for (key, value) in symbol.attributes() {
            if key.eq_ignore_ascii_case("InstName") {
                continue;
            }
            params.insert(key, value);
            if matches!(
                AttributeSlot::from_attribute(key),
                Some(AttributeSlot::SpiceLine | AttributeSlot::SpiceLine2 | AttributeSlot::Value2)
            ) {
                for (k, v) in parse_assignments(value).0 {
                    params.insert(k, v);
                }
            }
        }
        Ok(params)
    }

    /// Placement for a symbol: table entry by name, otherwise by the prefix
    /// declared in the symbol's `.asy` file.
    pub fn placement_for(&self, path: &str) -> Result<Placement> {
        let (sheet, name) = self.owner(path)?;
        let symbol = sheet.symbol(name)?;
        if let Some(placement) = self.placements.for_symbol(symbol.symbol()) {
            return Ok(*placement);
        }
        sheet
            .symbol_prefix(symbol.symbol())
            .and_then(|prefix| self.placements.for_prefix(prefix))
            .copied()
            .ok_or_else(|| SpiceError::AmbiguousAttribute {
                component: path.to_string(),
                symbol: symbol.symbol().to_string(),
            })
    }

    /// Path of the `.asy` file for a symbol type, searched next to the
    /// schematic and then in the schematic library paths.
    pub fn symbol_file(&self, symbol: &str) -> Option<PathBuf> {
        let relative = format!("{}.asy", symbol.replace('\\', "/"));
        let local = self.path.as_deref().and_then(Path::parent);
        find_in_search_paths(&relative, local, EditorKind::Schematic).or_else(|| {
            let short = relative.rsplit('/').next()?;
            find_in_search_paths(short, local, EditorKind::Schematic)
        })
    }

    /// `.asy` path and text for a symbol type.
    fn symbol_definition(&self, symbol: &str) -> Option<(PathBuf, String)> {
        let path = self.symbol_file(symbol)?;
        let (text, _) = read_text_file(&path)
            .map_err(|e| debug!(path = %path.display(), error = %e, "Symbol file unreadable"))
            .ok()?;
        Some((path, text))
    }

    fn symbol_prefix(&self, symbol: &str) -> Option<char> {
        let (_, text) = self.symbol_definition(symbol)?;
        text.lines().find_map(|line| {
            let mut words = line.split_whitespace();
            match (words.next(), words.next(), words.next()) {
                (Some("SYMATTR"), Some("Prefix"), Some(prefix)) => prefix.chars().next(),
                _ => None,
            }
        })
    }

    /// Sheet file of a `BLOCK` symbol: next to its `.asy`, otherwise searched
    /// like symbol files.
    fn sheet_file(&self, symbol: &str) -> Option<PathBuf> {
        let (asy, text) = self.symbol_definition(symbol)?;
        let is_block = text.lines().any(|line| {
            let mut words = line.split_whitespace();
            words.next() == Some("SymbolType") && words.next().is_some_and(|t| t.eq_ignore_ascii_case("BLOCK"))
        });
        if !is_block {
            return None;
        }
        let sibling = asy.with_extension("asc");
        if sibling.is_file() {
            return Some(sibling);
        }
        let name = sibling.file_name()?.to_str()?;
        let found = find_in_search_paths(name, self.path.as_deref().and_then(Path::parent), EditorKind::Schematic);
        if found.is_none() {
            warn!(%symbol, "Block symbol has no sheet");
        }
        found
    }

    /// Set a component's value in the slot its symbol uses.
    ///
    /// Returns `Ok(false)` and logs a warning when the slot cannot be
    /// determined; the schematic is left unchanged in that case.
    pub fn set_component_value(&mut self, name: &str, value: impl ToSpiceValue) -> Result<bool> {
        let slot = match self.placement_for(name) {
            Ok(placement) => placement.value,
            Err(e @ SpiceError::AmbiguousAttribute { .. }) => {
                warn!(component = name, error = %e, "Value not set");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let Some(slot) = slot else {
            warn!(component = name, "Symbol has no value slot; value not set");
            return Ok(false);
        };
        let value = value.to_spice_value();
        self.symbol_mut(name)?.set_attribute(slot.attribute(), &value);
        debug!(component = name, attribute = slot.attribute(), %value, "Value set");
        Ok(true)
    }

    /// Set parameters. Keys naming an attribute (`Value2`, `SpiceLine`, ...)
    /// replace that attribute; other keys are merged into the symbol's
    /// parameter list slot.
    ///
    /// Returns `Ok(false)` with a warning when some keys had nowhere to go.
    pub fn set_component_parameters<'a, V, I>(&mut self, name: &str, params: I) -> Result<bool>
    where
        V: ToSpiceValue,
        I: IntoIterator<Item = (&'a str, V)>,
    {
        let mut direct = Vec::new();
        let mut listed = Vec::new();
        for (key, value) in params {
            let value = value.to_spice_value();
            let is_attribute = AttributeSlot::from_attribute(key).is_some()
                || self.symbol(name)?.attribute(key).is_some();
            if is_attribute {
                direct.push((key, value));
            } else {
                listed.push((key, value));
            }
        }

        let params_slot = if listed.is_empty() {
            None
        } else {
            match self.placement_for(name) {
                Ok(placement) => placement.params,
                Err(e @ SpiceError::AmbiguousAttribute { .. }) => {
                    warn!(component = name, error = %e, "Parameters not set");
                    None
                }
                Err(e) => return Err(e),
            }
        };

        let symbol = self.symbol_mut(name)?;
        for (key, value) in &direct {
            symbol.set_attribute(key, value);
        }
        let Some(slot) = params_slot else {
            if !listed.is_empty() {
                warn!(component = name, count = listed.len(), "No parameter slot for symbol");
            }
            return Ok(listed.is_empty());
        };

        let current = symbol.attribute(slot.attribute()).unwrap_or_default().to_string();
        let (mut pairs, loose) = parse_assignments(&current);
        for (key, value) in listed {
            match pairs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
                Some((_, v)) => *v = value,
                None => pairs.push((key.to_string(), value)),
            }
        }
        let merged: Vec<String> = loose
            .into_iter()
            .chain(pairs.into_iter().map(|(k, v)| format!("{}={}", k, v)))
            .collect();
        symbol.set_attribute(slot.attribute(), &merged.join(" "));
        Ok(true)
    }

    /// Swap the symbol type of a component.
    pub fn set_element_model(&mut self, name: &str, symbol: &str) -> Result<()> {
        let s = self.symbol_mut(name)?;
        s.name = symbol.to_string();
        s.dirty = true;
        Ok(())
    }

    pub fn set_component_position(&mut self, name: &str, position: (i32, i32), rotation: Rotation) -> Result<()> {
        let s = self.symbol_mut(name)?;
        (s.x, s.y) = position;
        s.rotation = rotation;
        s.dirty = true;
        Ok(())
    }

    pub fn remove_component(&mut self, path: &str) -> Result<()> {
        let (sheet, name) = self.owner_mut(path)?;
        let index = sheet
            .position_symbol(name)
            .ok_or_else(|| SpiceError::MissingComponent(path.to_string()))?;
        sheet.items.remove(index);
        Ok(())
    }

    pub fn wires(&self) -> impl Iterator<Item = &Wire> {
        self.items.iter().filter_map(|item| match item {
            SchematicItem::Wire(w, _) => Some(w),
            _ => None,
        })
    }

    pub fn flags(&self) -> impl Iterator<Item = &Flag> {
        self.items.iter().filter_map(|item| match item {
            SchematicItem::Flag(f, _) => Some(f),
            _ => None,
        })
    }

    // ------------------------------------------------------------------------
    // Directives
    // ------------------------------------------------------------------------

    fn texts(&self) -> impl Iterator<Item = (usize, &Text)> {
        self.items.iter().enumerate().filter_map(|(i, item)| match item {
            SchematicItem::Text(t) => Some((i, t)),
            _ => None,
        })
    }

    /// Active directives, with line breaks restored.
    pub fn directives(&self) -> Vec<String> {
        self.texts()
            .filter(|(_, t)| t.kind() == TextKind::Directive)
            .map(|(_, t)| t.content())
            .collect()
    }

    fn text_mut(&mut self, index: usize) -> Option<&mut Text> {
        match self.items.get_mut(index)? {
            SchematicItem::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Place below everything else on the sheet.
    fn free_text_position(&self) -> (i32, i32) {
        let coords: Vec<(i32, i32)> = self.items.iter().flat_map(SchematicItem::coordinates).collect();
        let min_x = coords.iter().map(|c| c.0).min().unwrap_or(0);
        let max_y = coords.iter().map(|c| c.1).max().unwrap_or(0);
        (min_x, max_y + 24)
    }

    fn push_directive(&mut self, text: &str) {
        let (x, y) = self.free_text_position();
        let mut record = Text {
            x,
            y,
            justify: "Left".to_string(),
            size: "2".to_string(),
            kind: TextKind::Directive,
            content: String::new(),
            source: None,
        };
        record.set_content(text);
        self.items.push(SchematicItem::Text(record));
    }

    /// Add a directive. An analysis such as `.TRAN` replaces the existing
    /// analysis of the same kind.
    pub fn add_instruction(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        let command = text.split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
        if command == ".PARAM" {
            return Err(SpiceError::InvalidValue(
                ".PARAM lines are edited with set_parameter".to_string(),
            ));
        }
        if UNIQUE_SIMULATION_INSTRUCTIONS.contains(&command.as_str()) {
            let existing = self.texts().find_map(|(i, t)| {
                let first = t.lines().first().map(|l| l.trim_start().to_ascii_uppercase());
                (t.kind() == TextKind::Directive
                    && first.is_some_and(|l| l.split_whitespace().next() == Some(command.as_str())))
                .then_some(i)
            });
            if let Some(index) = existing {
                info!(%command, "Replacing analysis");
                if let Some(record) = self.text_mut(index) {
                    record.set_content(text);
                }
                return Ok(());
            }
        }
        if self.directives().iter().any(|d| d.trim().eq_ignore_ascii_case(text)) {
            warn!(text, "Directive already present");
            return Ok(());
        }
        self.push_directive(text);
        Ok(())
    }

    fn find_text(&self, text: &str) -> Option<usize> {
        let text = text.trim();
        self.texts()
            .find(|(_, t)| t.kind() != TextKind::Label && t.content().trim().eq_ignore_ascii_case(text))
            .map(|(i, _)| i)
    }

    /// Remove the directive (or commented directive) with this text.
    pub fn remove_instruction(&mut self, text: &str) -> bool {
        match self.find_text(text) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => {
                warn!(text, "Directive not found");
                false
            }
        }
    }

    /// Turn a directive into a comment or back.
    pub fn set_directive_active(&mut self, text: &str, active: bool) -> Result<()> {
        let index = self
            .find_text(text)
            .ok_or_else(|| SpiceError::MissingParameter(text.to_string()))?;
        let kind = if active { TextKind::Directive } else { TextKind::Comment };
        if let Some(record) = self.text_mut(index) {
            if record.kind() != kind {
                record.set_kind(kind);
            }
        }
        Ok(())
    }

    /// Value of a `.param` defined in a directive.
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.texts()
            .filter(|(_, t)| t.kind() == TextKind::Directive)
            .flat_map(|(_, t)| t.lines().into_iter().map(str::to_string).collect::<Vec<_>>())
            .filter(|line| line.trim_start().to_ascii_uppercase().starts_with(".PARAM"))
            .find_map(|line| {
                parse_assignments(&line)
                    .0
                    .into_iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
    }

    /// Set a `.param` value in the directive that defines it, or add a new one.
    pub fn set_parameter(&mut self, name: &str, value: impl ToSpiceValue) -> Result<()> {
        let value = value.to_spice_value();
        let target = self.texts().find_map(|(i, t)| {
            (t.kind() == TextKind::Directive
                && t.lines().iter().any(|line| {
                    line.trim_start().to_ascii_uppercase().starts_with(".PARAM")
                        && parse_assignments(line).0.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
                }))
            .then_some(i)
        });

        let Some(index) = target else {
            self.push_directive(&format!(".param {}={}", name, value));
            return Ok(());
        };
        if let Some(record) = self.text_mut(index) {
            let lines: Vec<String> = record
                .lines()
                .into_iter()
                .map(|line| {
                    if !line.trim_start().to_ascii_uppercase().starts_with(".PARAM") {
                        return line.to_string();
                    }
                    line.split(' ')
                        .map(|word| match split_param(word) {
                            Some((k, _)) if k.eq_ignore_ascii_case(name) => format!("{}={}", k, value),
                            _ => word.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect();
            record.set_content(&lines.join("\n"));
        }
        Ok(())
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl fmt::Display for Schematic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASC: &str = "Version 4\n\
SHEET 1 880 680\n\
WIRE 144 96 32 96\n\
FLAG 32 176 0\n\
IOPIN 144 96 Out\n\
SYMBOL res 128 80 R0\n\
WINDOW 0 36 40 Left 2\n\
SYMATTR InstName R1\n\
SYMATTR Value 10k\n\
SYMBOL voltage 32 80 R0\n\
SYMATTR InstName V1\n\
SYMATTR Value PULSE(0 1 0 1n 1n 5u 10u)\n\
SYMBOL Opamps\\LT1001 300 80 M90\n\
SYMATTR InstName U1\n\
TEXT -8 312 Left 2 !.tran 1m\n\
TEXT -8 344 Left 2 !.param r=1k c=1n\\n.step param r list 1k 2k\n\
TEXT -8 400 Left 2 ;.op\n\
LINE Normal 0 0 32 32\n";

    #[test]
    fn test_roundtrip_is_exact() {
        let schematic = Schematic::parse(ASC).unwrap();
        assert_eq!(schematic.to_text(), ASC);
        assert_eq!(schematic.components(""), vec!["R1", "V1", "U1"]);
        assert_eq!(schematic.wires().count(), 1);
        assert_eq!(schematic.flags().next().unwrap().name, "0");
    }

    #[test]
    fn test_symbol_fields() {
        let schematic = Schematic::parse(ASC).unwrap();
        let u1 = schematic.symbol("u1").unwrap();
        assert_eq!(u1.symbol(), "Opamps\\LT1001");
        assert_eq!(u1.rotation(), Rotation::M90);
        assert_eq!(u1.position(), (300, 80));
        assert_eq!(
            schematic.component_value("V1").unwrap(),
            "PULSE(0 1 0 1n 1n 5u 10u)"
        );
    }

    #[test]
    fn test_set_value_and_parameters() {
        let mut schematic = Schematic::parse(ASC).unwrap();
        assert!(schematic.set_component_value("R1", 4700.0).unwrap());
        assert!(schematic
            .set_component_parameters("R1", [("tol", "1"), ("pwr", "0.25")])
            .unwrap());
        assert!(schematic.set_component_parameters("R1", [("tol", "5")]).unwrap());

        let text = schematic.to_text();
        assert!(text.contains(
            "SYMBOL res 128 80 R0\nWINDOW 0 36 40 Left 2\nSYMATTR InstName R1\nSYMATTR Value 4.7k\nSYMATTR SpiceLine tol=5 pwr=0.25\n"
        ));
        let params = schematic.component_parameters("R1").unwrap();
        assert_eq!(params.get("tol"), Some("5"));
        assert_eq!(params.get("Value"), Some("4.7k"));
    }

    #[test]
    fn test_unknown_symbol_is_a_warning() {
        let mut schematic = Schematic::parse(ASC).unwrap();
        assert!(!schematic.set_component_value("U1", "LT1002").unwrap());
        assert!(matches!(
            schematic.placement_for("U1"),
            Err(SpiceError::AmbiguousAttribute { .. })
        ));
        assert_eq!(schematic.to_text(), ASC);

        // Attribute names are always settable.
        assert!(schematic.set_component_parameters("U1", [("SpiceModel", "LT1002")]).unwrap());
        assert_eq!(schematic.symbol("U1").unwrap().attribute("SpiceModel"), Some("LT1002"));
    }

    fn sheet_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("spicekit_schematic_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_symbol_file_without_usable_prefix() {
        let dir = sheet_dir("no_prefix");
        let text = "Version 4\nSHEET 1 880 680\n\
SYMBOL bare 0 0 R0\nSYMATTR InstName U7\n\
SYMBOL odd 64 0 R0\nSYMATTR InstName U8\n";
        std::fs::write(dir.join("top.asc"), text).unwrap();
        std::fs::write(dir.join("bare.asy"), "Version 4\nSymbolType CELL\nSYMATTR Description no prefix here\n").unwrap();
        std::fs::write(dir.join("odd.asy"), "Version 4\nSymbolType CELL\nSYMATTR Prefix Ö\n").unwrap();

        let mut schematic = Schematic::read(dir.join("top.asc")).unwrap();
        assert!(schematic.symbol_file("bare").is_some());
        assert!(!schematic.set_component_value("U7", "10k").unwrap());
        assert!(!schematic.set_component_value("U8", "10k").unwrap());
        assert!(!schematic.set_component_parameters("U8", [("gain", "2")]).unwrap());
        assert!(matches!(
            schematic.placement_for("U8"),
            Err(SpiceError::AmbiguousAttribute { .. })
        ));
        assert_eq!(schematic.to_text(), text);
    }

    #[test]
    fn test_block_sheet_paths() {
        let dir = sheet_dir("blocks");
        let top = "Version 4\nSHEET 1 880 680\n\
SYMBOL amp 96 96 R0\nSYMATTR InstName XU1\n\
SYMBOL amp 96 256 R0\nSYMATTR InstName XU2\n\
SYMBOL res 16 96 R0\nSYMATTR InstName R1\nSYMATTR Value 100\n";
        let amp = "Version 4\nSHEET 1 400 400\n\
SYMBOL res 32 32 R0\nSYMATTR InstName R1\nSYMATTR Value 1k\n\
SYMBOL amp 96 96 R0\nSYMATTR InstName XLOOP\n";
        std::fs::write(dir.join("top.asc"), top).unwrap();
        std::fs::write(dir.join("amp.asy"), "Version 4\nSymbolType BLOCK\nPIN 0 0 LEFT 8\n").unwrap();
        std::fs::write(dir.join("amp.asc"), amp).unwrap();

        let mut schematic = Schematic::read(dir.join("top.asc")).unwrap();
        assert!(schematic.sheet("xu1").is_some());
        assert!(schematic.sheet("R1").is_none());
        assert_eq!(schematic.component_value("R1").unwrap(), "100");
        assert_eq!(schematic.component_value("XU1:R1").unwrap(), "1k");
        // A sheet that places itself is not loaded again.
        assert!(matches!(
            schematic.symbol("XU1:XLOOP:R1"),
            Err(SpiceError::MissingComponent(_))
        ));
        assert!(matches!(
            schematic.symbol("R1:R1"),
            Err(SpiceError::MissingComponent(_))
        ));

        assert!(schematic.set_component_value("XU1:R1", 2200.0).unwrap());
        assert_eq!(schematic.component_value("XU2:R1").unwrap(), "2.2k");
        assert_eq!(schematic.component_value("R1").unwrap(), "100");
        assert_eq!(schematic.to_text(), top);

        schematic.save(dir.join("top_out.asc")).unwrap();
        let sheet = std::fs::read_to_string(dir.join("amp.asc")).unwrap();
        assert!(sheet.contains("SYMATTR InstName R1\nSYMATTR Value 2.2k\n"));
        assert!(sheet.contains("SYMATTR InstName XLOOP\n"));
        let reread = Schematic::read(dir.join("top_out.asc")).unwrap();
        assert_eq!(reread.component_value("XU1:R1").unwrap(), "2.2k");
    }

    #[test]
    fn test_missing_component() {
        let mut schematic = Schematic::parse(ASC).unwrap();
        assert!(matches!(
            schematic.set_component_value("R99", "1k"),
            Err(SpiceError::MissingComponent(_))
        ));
    }

    #[test]
    fn test_directives_and_parameters() {
        let mut schematic = Schematic::parse(ASC).unwrap();
        assert_eq!(
            schematic.directives(),
            vec![".tran 1m", ".param r=1k c=1n\n.step param r list 1k 2k"]
        );
        assert_eq!(schematic.parameter("C").as_deref(), Some("1n"));

        schematic.set_parameter("c", "2.2n").unwrap();
        assert!(schematic
            .to_text()
            .contains("TEXT -8 344 Left 2 !.param r=1k c=2.2n\\n.step param r list 1k 2k\n"));

        schematic.add_instruction(".tran 5m").unwrap();
        assert!(schematic.to_text().contains("TEXT -8 312 Left 2 !.tran 5m\n"));

        schematic.add_instruction(".meas tran vmax MAX V(out)").unwrap();
        assert!(schematic
            .to_text()
            .contains("TEXT -8 424 Left 2 !.meas tran vmax MAX V(out)\n"));

        schematic.set_directive_active(".op", true).unwrap();
        assert!(schematic.directives().contains(&".op".to_string()));
        schematic.set_directive_active(".tran 5m", false).unwrap();
        assert!(schematic.to_text().contains("TEXT -8 312 Left 2 ;.tran 5m\n"));

        assert!(schematic.remove_instruction(".meas tran vmax MAX V(out)"));
        assert!(!schematic.remove_instruction(".meas tran vmax MAX V(out)"));
    }

    #[test]
    fn test_structural_errors() {
        let err = Schematic::parse("Version 4\nSYMATTR InstName R1\n").unwrap_err();
        assert!(matches!(err, SpiceError::UnrecognizedFormat { line: 2, .. }));

        let err = Schematic::parse("SYMBOL res 0 0 R45\n").unwrap_err();
        assert!(matches!(err, SpiceError::UnrecognizedFormat { line: 1, .. }));

        let err = Schematic::parse("WIRE 0 0 x 0\n").unwrap_err();
        assert!(matches!(err, SpiceError::UnrecognizedFormat { line: 1, .. }));
    }

    #[test]
    fn test_move_and_remove() {
        let mut schematic = Schematic::parse(ASC).unwrap();
        schematic.set_component_position("R1", (160, 96), Rotation::R90).unwrap();
        schematic.set_element_model("R1", "res2").unwrap();
        assert!(schematic.to_text().contains("SYMBOL res2 160 96 R90\n"));
        schematic.remove_component("V1").unwrap();
        assert_eq!(schematic.components("RV"), vec!["R1"]);
    }
}

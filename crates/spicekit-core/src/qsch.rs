//! QSPICE schematic (`.qsch`) editor
//!
//! A `.qsch` file is the four bytes `FF D8 FF DB` followed by one tree of
//! `«tag ...»` elements in Windows-1252. Every element keeps the text it was
//! read from, so an element that was not edited is written back byte for
//! byte, and an edited one keeps the whitespace around it.
//!
//! A component is a `«component»` element whose `«symbol»` child holds the
//! designator in its first `«text»` and the value in its second. Directives
//! are top-level `«text»` elements whose string starts with a UTF-8 byte
//! order mark (read as `ï»¿`). An `X` component whose value names a `.qsch`
//! file next to the schematic, or in the QSPICE search paths, is a
//! hierarchical sheet addressed as `X1:R1`.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::config::find_in_search_paths;
use crate::element::{Params, ToSpiceValue};
use crate::encoding::{decode_windows1252, encode_text, windows1252_byte, TextEncoding};
use crate::schematic::Rotation;
use crate::tokenizer::{parse_assignments, split_param};
use crate::types::{EditorKind, Result, SpiceError, SUBCKT_DIVIDER, UNIQUE_SIMULATION_INSTRUCTIONS};

/// Leading bytes of every `.qsch` file
pub const QSCH_HEADER: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xDB];

/// Start of a directive string.
const DIRECTIVE_MARK: &str = "\u{ef}\u{bb}\u{bf}";

// Attribute positions; position 0 is the element name.
const POSITION: usize = 1;
const ORIENTATION: usize = 2;
const TEXT_IS_COMMENT: usize = 4;
const TEXT_STRING: usize = 8;

// Order of the texts inside a symbol.
const DESIGNATOR_TEXT: usize = 0;
const VALUE_TEXT: usize = 1;

// ============================================================================
// Element tree
// ============================================================================

/// One `«...»` element and its children
#[derive(Debug, Clone, PartialEq)]
pub struct QschTag {
    /// Text between `«` and the first child or `»`, as read.
    head: String,
    tokens: Vec<String>,
    /// Children, each followed by the text up to the next child or `»`.
    children: Vec<(QschTag, String)>,
    dirty: bool,
}

impl QschTag {
    /// Parse a single element. Whitespace around it is ignored.
    pub fn parse(text: &str) -> Result<QschTag> {
        let start = opening(text)?;
        let (tag, end) = parse_tag(text, start)?;
        if let Some(extra) = leftover(text, end) {
            return Err(SpiceError::unrecognized(line_of(text, extra), "text after the closing '»'"));
        }
        Ok(tag)
    }

    /// Element name: `schematic`, `component`, `text`, or a label such as `type:`.
    pub fn name(&self) -> &str {
        self.tokens.first().map(String::as_str).unwrap_or_default()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn children(&self) -> impl Iterator<Item = &QschTag> {
        self.children.iter().map(|(child, _)| child)
    }

    /// Children with the given element name.
    pub fn items<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a QschTag> + 'a {
        self.children().filter(move |c| c.name() == name)
    }

    fn items_mut<'a>(&'a mut self, name: &'a str) -> impl Iterator<Item = &'a mut QschTag> + 'a {
        self.children
            .iter_mut()
            .map(|(child, _)| child)
            .filter(move |c| c.name() == name)
    }

    /// Attribute at `index` without its quotes.
    pub fn text_attr(&self, index: usize) -> Option<&str> {
        let token = self.tokens.get(index)?;
        Some(token.strip_prefix('"').and_then(|t| t.strip_suffix('"')).unwrap_or(token))
    }

    /// `(x,y)` attribute at `index`.
    pub fn point_attr(&self, index: usize) -> Option<(i32, i32)> {
        let inner = self.tokens.get(index)?.strip_prefix('(')?.strip_suffix(')')?;
        let (x, y) = inner.split_once(',')?;
        Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
    }

    /// Text of a `label: text` child, e.g. `type` or `library file`.
    pub fn label(&self, label: &str) -> Option<&str> {
        self.children()
            .find(|c| c.name().strip_suffix(':') == Some(label))
            .and_then(|c| c.tokens.get(1))
            .map(String::as_str)
    }

    fn set_token(&mut self, index: usize, value: String) -> Result<()> {
        if index >= self.tokens.len() {
            return Err(SpiceError::InvalidValue(format!(
                "'{}' element has no attribute {}",
                self.name(),
                index
            )));
        }
        self.tokens[index] = value;
        self.dirty = true;
        Ok(())
    }

    /// Replace a quoted string attribute.
    pub fn set_text_attr(&mut self, index: usize, value: &str) -> Result<()> {
        check_string(value)?;
        self.set_token(index, format!("\"{}\"", value))
    }

    /// Insert a child, indented like its siblings.
    fn insert_child(&mut self, index: usize, child: QschTag) {
        let separator = match self.head.trim_end().len() {
            n if n < self.head.len() => self.head[n..].to_string(),
            _ => "\n".to_string(),
        };
        if index >= self.children.len() {
            let closing = match self.children.last_mut() {
                Some((_, gap)) => std::mem::replace(gap, separator),
                None => String::new(),
            };
            self.children.push((child, closing));
        } else {
            self.children.insert(index, (child, separator));
        }
    }

    fn remove_child(&mut self, index: usize) -> QschTag {
        let (child, gap) = self.children.remove(index);
        if index == self.children.len() {
            if let Some((_, last)) = self.children.last_mut() {
                *last = gap;
            }
        }
        child
    }

    fn render(&self, out: &mut String) {
        out.push('«');
        if self.dirty {
            out.push_str(&self.tokens.join(" "));
            out.push_str(&self.head[self.head.trim_end().len()..]);
        } else {
            out.push_str(&self.head);
        }
        for (child, gap) in &self.children {
            child.render(out);
            out.push_str(gap);
        }
        out.push('»');
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        self.render(&mut out);
        out
    }
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// Offset of the first non-whitespace character at or after `end`.
fn leftover(text: &str, end: usize) -> Option<usize> {
    let rest = &text[end..];
    let trimmed = rest.trim_start();
    (!trimmed.is_empty()).then(|| end + rest.len() - trimmed.len())
}

/// Byte offset of the first `«`, which may only be preceded by whitespace.
fn opening(text: &str) -> Result<usize> {
    text.find('«')
        .filter(|&i| text[..i].trim().is_empty())
        .ok_or_else(|| SpiceError::unrecognized(1, "expected an element starting with '«'"))
}

/// Parse the element whose `«` is at byte `start`; returns it and the offset
/// just past its `»`.
fn parse_tag(text: &str, start: usize) -> Result<(QschTag, usize)> {
    let mut tag = QschTag {
        head: String::new(),
        tokens: Vec::new(),
        children: Vec::new(),
        dirty: false,
    };
    let mut segment = start + '«'.len_utf8();
    let mut pos = segment;
    let mut quoted = false;

    while let Some(c) = text[pos..].chars().next() {
        match c {
            '"' => quoted = !quoted,
            '«' | '»' if !quoted => {
                let piece = &text[segment..pos];
                match tag.children.last_mut() {
                    Some((_, gap)) => gap.push_str(piece),
                    None => tag.head.push_str(piece),
                }
                if c == '»' {
                    tag.tokens = head_tokens(&tag.head);
                    return Ok((tag, pos + c.len_utf8()));
                }
                let (child, end) = parse_tag(text, pos)?;
                tag.children.push((child, String::new()));
                segment = end;
                pos = end;
                continue;
            }
            _ => {}
        }
        pos += c.len_utf8();
    }
    Err(SpiceError::unrecognized(line_of(text, start), "element is missing its closing '»'"))
}

/// `label: free text` heads keep the text whole; others split on whitespace
/// outside quotes.
fn head_tokens(head: &str) -> Vec<String> {
    let head = head.trim();
    if let Some((label, text)) = head.split_once(": ") {
        if !label.contains('"') {
            return vec![format!("{}:", label), text.to_string()];
        }
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in head.chars() {
        if c.is_whitespace() && !quoted {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c == '"' {
            quoted = !quoted;
        }
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Strings are stored between double quotes in Windows-1252.
fn check_string(value: &str) -> Result<()> {
    if value.contains('"') {
        return Err(SpiceError::InvalidValue(format!(
            "'{}' contains a double quote",
            value
        )));
    }
    if let Some(c) = value.chars().find(|&c| windows1252_byte(c).is_none()) {
        return Err(SpiceError::InvalidValue(format!(
            "'{}' has no Windows-1252 encoding",
            c
        )));
    }
    Ok(())
}

/// A new `«text»` element holding `string`.
fn text_element(position: (i32, i32), size: &str, string: &str) -> Result<QschTag> {
    check_string(string)?;
    QschTag::parse(&format!(
        "«text ({},{}) {} 0 0 0x1000000 -1 -1 \"{}\"»",
        position.0, position.1, size, string
    ))
}

/// `text` with the value of `key=...` replaced, when it assigns `key`.
fn replace_assignment(text: &str, key: &str, value: &str) -> Option<String> {
    let mut found = false;
    let words: Vec<String> = text
        .split(' ')
        .map(|word| match split_param(word) {
            Some((k, _)) if !found && k.eq_ignore_ascii_case(key) => {
                found = true;
                format!("{}={}", k, value)
            }
            _ => word.to_string(),
        })
        .collect();
    found.then(|| words.join(" "))
}

fn symbol_of(component: &QschTag) -> Option<&QschTag> {
    component.items("symbol").next()
}

fn designator(component: &QschTag) -> Option<&str> {
    symbol_of(component)?
        .items("text")
        .nth(DESIGNATOR_TEXT)?
        .text_attr(TEXT_STRING)
}

fn component_text(component: &QschTag, index: usize) -> Option<&str> {
    symbol_of(component)?.items("text").nth(index)?.text_attr(TEXT_STRING)
}

/// Directive string of a top-level text, without its mark.
fn directive_of(tag: &QschTag) -> Option<&str> {
    if tag.name() != "text" || tag.text_attr(TEXT_IS_COMMENT) == Some("1") {
        return None;
    }
    tag.text_attr(TEXT_STRING)?.strip_prefix(DIRECTIVE_MARK)
}

fn is_param_line(line: &str) -> bool {
    line.trim_start().to_ascii_uppercase().starts_with(".PARAM")
}

/// QSPICE turns in 45 degree steps; mirrored orientations add 8.
fn orientation_code(rotation: Rotation) -> u8 {
    match rotation {
        Rotation::R0 => 0,
        Rotation::R90 => 2,
        Rotation::R180 => 4,
        Rotation::R270 => 6,
        Rotation::M0 => 8,
        Rotation::M90 => 10,
        Rotation::M180 => 12,
        Rotation::M270 => 14,
    }
}

// ============================================================================
// Schematic
// ============================================================================

#[derive(Debug, Clone)]
struct QschSheet {
    path: PathBuf,
    schematic: QspiceSchematic,
    /// Reached through a mutating call; written back on save.
    touched: bool,
}

/// An editable QSPICE schematic
#[derive(Debug, Clone)]
pub struct QspiceSchematic {
    root: QschTag,
    /// Whitespace before and after the root element.
    leader: String,
    trailer: String,
    path: Option<PathBuf>,
    sheets: Vec<QschSheet>,
    /// Instance name to index in `sheets`.
    instances: Vec<(String, usize)>,
}

impl QspiceSchematic {
    // ------------------------------------------------------------------------
    // Loading and saving
    // ------------------------------------------------------------------------

    /// Parse decoded text that follows the header bytes.
    pub fn parse(text: &str) -> Result<QspiceSchematic> {
        let start = opening(text)?;
        let (root, end) = parse_tag(text, start)?;
        if root.name() != "schematic" {
            return Err(SpiceError::unrecognized(
                line_of(text, start),
                format!("root element is '{}', expected 'schematic'", root.name()),
            ));
        }
        if let Some(extra) = leftover(text, end) {
            return Err(SpiceError::unrecognized(line_of(text, extra), "text after the schematic element"));
        }
        for component in root.items("component") {
            if component_text(component, VALUE_TEXT).is_none() {
                return Err(SpiceError::Format(format!(
                    "component at {} has no designator and value texts",
                    component.tokens.get(POSITION).map(String::as_str).unwrap_or("?")
                )));
            }
        }
        debug!(components = root.items("component").count(), "QSPICE schematic parsed");
        Ok(QspiceSchematic {
            leader: text[..start].to_string(),
            trailer: text[end..].to_string(),
            root,
            path: None,
            sheets: Vec::new(),
            instances: Vec::new(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<QspiceSchematic> {
        let body = bytes
            .strip_prefix(&QSCH_HEADER)
            .ok_or_else(|| SpiceError::Format("missing QSPICE schematic header FF D8 FF DB".to_string()))?;
        Self::parse(&decode_windows1252(body))
    }

    /// Read a schematic and the sheets of its `X` components.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn read(path: impl AsRef<Path>) -> Result<QspiceSchematic> {
        info!("Reading QSPICE schematic");
        Self::read_nested(path.as_ref(), &mut Vec::new())
    }

    /// `open` holds the sheets currently being read, to stop at cycles.
    fn read_nested(path: &Path, open: &mut Vec<PathBuf>) -> Result<QspiceSchematic> {
        let bytes = std::fs::read(path)?;
        let mut schematic = Self::from_bytes(&bytes)?;
        schematic.path = Some(path.to_path_buf());

        open.push(canonical(path));
        schematic.load_sheets(open);
        open.pop();
        Ok(schematic)
    }

    fn load_sheets(&mut self, open: &mut Vec<PathBuf>) {
        let subcircuits: Vec<(String, PathBuf)> = self
            .root
            .items("component")
            .filter_map(|c| {
                let name = designator(c)?;
                if !name.starts_with(['X', 'x']) {
                    return None;
                }
                // Embedded subcircuits carry their netlist in the symbol.
                if symbol_of(c)?.label("library file").is_some_and(|l| l.starts_with("|.subckt")) {
                    return None;
                }
                let value = component_text(c, VALUE_TEXT)?;
                Some((name.to_string(), self.sheet_file(value)?))
            })
            .collect();

        for (instance, path) in subcircuits {
            let key = canonical(&path);
            if let Some(index) = self.sheets.iter().position(|s| canonical(&s.path) == key) {
                self.instances.push((instance, index));
                continue;
            }
            if open.contains(&key) {
                warn!(%instance, path = %path.display(), "Sheet includes itself; not loaded");
                continue;
            }
            match Self::read_nested(&path, open) {
                Ok(schematic) => {
                    debug!(%instance, path = %path.display(), "Subcircuit sheet loaded");
                    self.instances.push((instance, self.sheets.len()));
                    self.sheets.push(QschSheet {
                        path,
                        schematic,
                        touched: false,
                    });
                }
                Err(e) => warn!(%instance, path = %path.display(), error = %e, "Subcircuit sheet could not be read"),
            }
        }
    }

    fn sheet_file(&self, value: &str) -> Option<PathBuf> {
        let name = format!("{}.qsch", value);
        let found = find_in_search_paths(&name, self.path.as_deref().and_then(Path::parent), EditorKind::Qspice);
        if found.is_none() {
            debug!(%value, "No schematic sheet for subcircuit");
        }
        found
    }

    /// Text of the element tree, without the header bytes.
    pub fn to_text(&self) -> String {
        let mut out = self.leader.clone();
        self.root.render(&mut out);
        out.push_str(&self.trailer);
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = QSCH_HEADER.to_vec();
        out.extend_from_slice(&encode_text(&self.to_text(), TextEncoding::Windows1252));
        out
    }

    /// Write the schematic, and every subcircuit sheet that was edited back
    /// to its own file.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        info!("Writing QSPICE schematic");
        std::fs::write(path.as_ref(), self.to_bytes())?;
        for sheet in self.sheets.iter().filter(|s| s.touched) {
            sheet.schematic.save(&sheet.path)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &QschTag {
        &self.root
    }

    // ------------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------------

    fn sheet_index(&self, instance: &str) -> Option<usize> {
        self.instances
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(instance))
            .map(|&(_, index)| index)
    }

    /// Sheet of a subcircuit instance.
    pub fn sheet(&self, instance: &str) -> Option<&QspiceSchematic> {
        self.sheet_index(instance).map(|i| &self.sheets[i].schematic)
    }

    fn owner<'p>(&self, path: &'p str) -> Result<(&QspiceSchematic, &'p str)> {
        let Some((instance, rest)) = path.split_once(SUBCKT_DIVIDER) else {
            return Ok((self, path));
        };
        self.sheet(instance)
            .ok_or_else(|| SpiceError::MissingComponent(path.to_string()))?
            .owner(rest)
    }

    fn owner_mut<'p>(&mut self, path: &'p str) -> Result<(&mut QspiceSchematic, &'p str)> {
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

    fn component_index(&self, name: &str) -> Option<usize> {
        self.root
            .children()
            .position(|c| c.name() == "component" && designator(c).is_some_and(|d| d.eq_ignore_ascii_case(name)))
    }

    /// Component element by designator or hierarchical path (`X1:R1`).
    pub fn component(&self, path: &str) -> Result<&QschTag> {
        let (sheet, name) = self.owner(path)?;
        sheet
            .component_index(name)
            .map(|i| &sheet.root.children[i].0)
            .ok_or_else(|| SpiceError::MissingComponent(path.to_string()))
    }

    fn component_mut(&mut self, path: &str) -> Result<&mut QschTag> {
        let (sheet, name) = self.owner_mut(path)?;
        let index = sheet
            .component_index(name)
            .ok_or_else(|| SpiceError::MissingComponent(path.to_string()))?;
        Ok(&mut sheet.root.children[index].0)
    }

    /// Designators whose first letter is one of `prefixes` (all when empty).
    pub fn components(&self, prefixes: &str) -> Vec<String> {
        let wanted: Vec<char> = prefixes.chars().map(|c| c.to_ascii_uppercase()).collect();
        self.root
            .items("component")
            .filter_map(designator)
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

    pub fn component_value(&self, path: &str) -> Result<String> {
        component_text(self.component(path)?, VALUE_TEXT)
            .map(str::to_string)
            .ok_or_else(|| SpiceError::MissingParameter(format!("{} value", path)))
    }

    /// Set the value text. QSPICE keeps model names there as well.
    pub fn set_component_value(&mut self, path: &str, value: impl ToSpiceValue) -> Result<()> {
        let value = value.to_spice_value();
        let component = self.component_mut(path)?;
        let text = component
            .items_mut("symbol")
            .next()
            .and_then(|s| s.items_mut("text").nth(VALUE_TEXT))
            .ok_or_else(|| SpiceError::MissingParameter(format!("{} value", path)))?;
        text.set_text_attr(TEXT_STRING, &value)?;
        debug!(component = path, %value, "Value set");
        Ok(())
    }

    pub fn set_element_model(&mut self, path: &str, model: &str) -> Result<()> {
        self.set_component_value(path, model)
    }

    /// `key=value` assignments in the texts after the value.
    pub fn component_parameters(&self, path: &str) -> Result<Params> {
        let component = self.component(path)?;
        let mut params = Params::new();
        let texts = symbol_of(component).into_iter().flat_map(|s| s.items("text"));
        for string in texts.skip(VALUE_TEXT + 1).filter_map(|t| t.text_attr(TEXT_STRING)) {
            for (key, value) in parse_assignments(string).0 {
                params.insert(key, value);
            }
        }
        Ok(params)
    }

    /// Replace assignments where a symbol text already has them; others are
    /// added as new texts ahead of the pins.
    pub fn set_component_parameters<'a, V, I>(&mut self, path: &str, params: I) -> Result<()>
    where
        V: ToSpiceValue,
        I: IntoIterator<Item = (&'a str, V)>,
    {
        let component = self.component_mut(path)?;
        let symbol = component
            .items_mut("symbol")
            .next()
            .ok_or_else(|| SpiceError::MissingComponent(path.to_string()))?;

        for (key, value) in params {
            let value = value.to_spice_value();
            let mut replaced = false;
            for text in symbol.items_mut("text").skip(VALUE_TEXT) {
                let updated = text
                    .text_attr(TEXT_STRING)
                    .and_then(|current| replace_assignment(current, key, &value));
                if let Some(updated) = updated {
                    text.set_text_attr(TEXT_STRING, &updated)?;
                    replaced = true;
                    break;
                }
            }
            if replaced {
                continue;
            }
            let element = text_element((0, 0), "0.5", &format!("{}={}", key, value))?;
            let at = symbol.children().position(|c| c.name() == "pin").unwrap_or_else(|| {
                symbol
                    .children()
                    .enumerate()
                    .filter(|(_, c)| c.name() == "text")
                    .map(|(i, _)| i + 1)
                    .last()
                    .unwrap_or(0)
            });
            symbol.insert_child(at, element);
            debug!(component = path, key, %value, "Parameter text added");
        }
        Ok(())
    }

    /// Position and orientation code (45 degree steps, plus 8 when mirrored).
    pub fn component_position(&self, path: &str) -> Result<((i32, i32), u8)> {
        let component = self.component(path)?;
        let position = component
            .point_attr(POSITION)
            .ok_or_else(|| SpiceError::Format(format!("component '{}' has no position", path)))?;
        let orientation = component
            .text_attr(ORIENTATION)
            .and_then(|o| o.parse().ok())
            .unwrap_or_default();
        Ok((position, orientation))
    }

    pub fn set_component_position(&mut self, path: &str, position: (i32, i32), rotation: Rotation) -> Result<()> {
        let component = self.component_mut(path)?;
        component.set_token(POSITION, format!("({},{})", position.0, position.1))?;
        component.set_token(ORIENTATION, orientation_code(rotation).to_string())
    }

    pub fn remove_component(&mut self, path: &str) -> Result<()> {
        let (sheet, name) = self.owner_mut(path)?;
        let index = sheet
            .component_index(name)
            .ok_or_else(|| SpiceError::MissingComponent(path.to_string()))?;
        sheet.root.remove_child(index);
        sheet.instances.retain(|(instance, _)| !instance.eq_ignore_ascii_case(name));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Directives
    // ------------------------------------------------------------------------

    /// Active directive strings.
    pub fn directives(&self) -> Vec<String> {
        self.root.children().filter_map(directive_of).map(str::to_string).collect()
    }

    fn directive_index(&self, matches: impl Fn(&str) -> bool) -> Option<usize> {
        self.root
            .children()
            .position(|c| directive_of(c).is_some_and(&matches))
    }

    /// Below and left of everything on the sheet.
    fn free_text_position(&self) -> (i32, i32) {
        let coords: Vec<(i32, i32)> = self
            .root
            .children()
            .flat_map(|c| match c.name() {
                "component" | "net" | "text" => vec![c.point_attr(1)],
                "wire" => vec![c.point_attr(1), c.point_attr(2)],
                _ => Vec::new(),
            })
            .flatten()
            .collect();
        let min_x = coords.iter().map(|c| c.0).min().unwrap_or(0);
        let min_y = coords.iter().map(|c| c.1).min().map_or(0, |y| y - 240);
        (min_x, min_y)
    }

    fn push_directive(&mut self, text: &str) -> Result<()> {
        let element = text_element(self.free_text_position(), "1", &format!("{}{}", DIRECTIVE_MARK, text))?;
        let end = self.root.children.len();
        self.root.insert_child(end, element);
        Ok(())
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
            let existing = self.directive_index(|d| {
                d.split_whitespace()
                    .next()
                    .is_some_and(|first| first.eq_ignore_ascii_case(&command))
            });
            if let Some(index) = existing {
                info!(%command, "Replacing analysis");
                return self.root.children[index]
                    .0
                    .set_text_attr(TEXT_STRING, &format!("{}{}", DIRECTIVE_MARK, text));
            }
        }
        if self.directives().iter().any(|d| d.trim().eq_ignore_ascii_case(text)) {
            warn!(text, "Directive already present");
            return Ok(());
        }
        self.push_directive(text)
    }

    /// Remove the directive with this text.
    pub fn remove_instruction(&mut self, text: &str) -> bool {
        let text = text.trim();
        match self.directive_index(|d| d.trim().eq_ignore_ascii_case(text)) {
            Some(index) => {
                self.root.remove_child(index);
                true
            }
            None => {
                warn!(text, "Directive not found");
                false
            }
        }
    }

    /// Value of a `.param` defined in a directive.
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.directives()
            .iter()
            .flat_map(|d| d.lines().map(str::to_string).collect::<Vec<_>>())
            .filter(|line| is_param_line(line))
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
        let target = self.root.children().enumerate().find_map(|(i, c)| {
            let directive = directive_of(c)?;
            if !is_param_line(directive) {
                return None;
            }
            Some((i, format!("{}{}", DIRECTIVE_MARK, replace_assignment(directive, name, &value)?)))
        });
        match target {
            Some((index, updated)) => {
                debug!(parameter = name, %value, "Parameter updated");
                self.root.children[index].0.set_text_attr(TEXT_STRING, &updated)
            }
            None => {
                debug!(parameter = name, %value, "Parameter added");
                self.push_directive(&format!(".param {}={}", name, value))
            }
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    const QSCH: &str = "«schematic
  «component (-400,100) 0 0
    «symbol V
      «type: V»
      «description: Independent Voltage Source»
      «line (0,-200) (0,-100) 1 0 0x1000000 -1 -1»
      «text (100,150) 1 7 0 0x1000000 -1 -1 \"Vin\"»
      «text (100,-150) 1 7 0 0x1000000 -1 -1 \"1\"»
      «pin (0,200) (0,0) 1 0 0 0x0 -1 \"+\"»
      «pin (0,-200) (0,0) 1 0 0 0x0 -1 \"-\"»
    »
  »
  «component (300,200) 0 0
    «symbol R
      «type: R»
      «text (100,0) 1 7 0 0x1000000 -1 -1 \"R1\"»
      «text (100,-50) 1 7 0 0x1000000 -1 -1 \"10K\"»
      «pin (0,100) (0,0) 1 0 0 0x0 -1 \"a\"»
      «pin (0,-100) (0,0) 1 0 0 0x0 -1 \"b\"»
    »
  »
  «component (300,-200) 0 0
    «symbol D
      «type: D»
      «text (100,0) 1 7 0 0x1000000 -1 -1 \"D1\"»
      «text (100,-50) 1 7 0 0x1000000 -1 -1 \"1N4148\"»
      «text (100,-100) 1 7 0 0x1000000 -1 -1 \"m=1 area=2\"»
      «pin (0,100) (0,0) 1 0 0 0x0 -1 \"A\"»
      «pin (0,-100) (0,0) 1 0 0 0x0 -1 \"K\"»
    »
  »
  «wire (-400,300) (300,300) \"N01\"»
  «net (300,0) 1 13 0 \"out\"»
  «text (-400,-500) 1 77 0 0x1000000 -1 -1 \"ï»¿.dc V1 0 5 0.1\"»
  «text (-400,-600) 1 77 0 0x1000000 -1 -1 \"ï»¿.param TEMP=0 gain=2\"»
  «text (-400,-700) 1 77 1 0x1000000 -1 -1 \".op\"»
»
";

    fn qsch_bytes(text: &str) -> Vec<u8> {
        let mut bytes = QSCH_HEADER.to_vec();
        bytes.extend_from_slice(&encode_text(text, TextEncoding::Windows1252));
        bytes
    }

    #[test]
    fn test_roundtrip_is_exact() {
        let bytes = qsch_bytes(QSCH);
        let schematic = QspiceSchematic::from_bytes(&bytes).unwrap();
        assert_eq!(schematic.to_bytes(), bytes);
        assert_eq!(schematic.root().name(), "schematic");
        assert_eq!(schematic.root().items("component").count(), 3);
        let symbol = schematic.component("Vin").unwrap().items("symbol").next().unwrap();
        assert_eq!(symbol.label("description"), Some("Independent Voltage Source"));
        assert_eq!(symbol.label("type"), Some("V"));

        assert!(matches!(
            QspiceSchematic::from_bytes(QSCH.as_bytes()),
            Err(SpiceError::Format(_))
        ));
    }

    #[test]
    fn test_components_and_values() {
        let mut schematic = QspiceSchematic::parse(QSCH).unwrap();
        assert_eq!(schematic.components(""), vec!["Vin", "R1", "D1"]);
        assert_eq!(schematic.components("rd"), vec!["R1", "D1"]);
        assert_eq!(schematic.component_value("r1").unwrap(), "10K");

        schematic.set_component_value("R1", 33000.0).unwrap();
        assert_eq!(schematic.component_value("R1").unwrap(), "33k");
        assert_eq!(schematic.to_text(), QSCH.replace("\"10K\"", "\"33k\""));

        schematic.set_element_model("D1", "1N914").unwrap();
        assert_eq!(schematic.component_value("D1").unwrap(), "1N914");
        assert!(matches!(
            schematic.set_component_value("R9", "1k"),
            Err(SpiceError::MissingComponent(_))
        ));
    }

    #[test]
    fn test_component_parameters() {
        let mut schematic = QspiceSchematic::parse(QSCH).unwrap();
        let params = schematic.component_parameters("D1").unwrap();
        assert_eq!(params.get("AREA"), Some("2"));
        assert!(schematic.component_parameters("R1").unwrap().is_empty());

        schematic
            .set_component_parameters("D1", [("area", "3"), ("temp", "27")])
            .unwrap();
        let text = schematic.to_text();
        assert!(text.contains("\"m=1 area=3\"»\n      «text (0,0) 0.5 0 0 0x1000000 -1 -1 \"temp=27\"»\n      «pin (0,100)"));

        let reparsed = QspiceSchematic::parse(&text).unwrap();
        let params = reparsed.component_parameters("D1").unwrap();
        assert_eq!(params.get("temp"), Some("27"));
        assert_eq!(params.get("m"), Some("1"));
    }

    #[test]
    fn test_position_and_removal() {
        let mut schematic = QspiceSchematic::parse(QSCH).unwrap();
        assert_eq!(schematic.component_position("R1").unwrap(), ((300, 200), 0));
        schematic.set_component_position("R1", (0, 50), Rotation::M90).unwrap();
        assert_eq!(schematic.component_position("R1").unwrap(), ((0, 50), 10));
        assert!(schematic.to_text().contains("«component (0,50) 10 0\n    «symbol R\n"));

        schematic.remove_component("D1").unwrap();
        assert_eq!(schematic.components(""), vec!["Vin", "R1"]);
        let text = schematic.to_text();
        assert!(!text.contains("1N4148"));
        assert!(text.contains("»\n  »\n  «wire"));
        assert!(QspiceSchematic::parse(&text).is_ok());
        assert!(matches!(
            schematic.remove_component("D1"),
            Err(SpiceError::MissingComponent(_))
        ));
    }

    #[test]
    fn test_directives_and_parameters() {
        let mut schematic = QspiceSchematic::parse(QSCH).unwrap();
        assert_eq!(schematic.directives(), vec![".dc V1 0 5 0.1", ".param TEMP=0 gain=2"]);
        assert_eq!(schematic.parameter("temp").as_deref(), Some("0"));

        schematic.set_parameter("TEMP", 25).unwrap();
        assert_eq!(schematic.parameter("TEMP").as_deref(), Some("25"));
        assert!(schematic.to_text().contains("\"ï»¿.param TEMP=25 gain=2\""));

        schematic.add_instruction(".dc V1 0 3 0.1").unwrap();
        schematic.add_instruction(".save V(out)").unwrap();
        schematic.add_instruction(".save V(out)").unwrap();
        assert_eq!(
            schematic.directives(),
            vec![".dc V1 0 3 0.1", ".param TEMP=25 gain=2", ".save V(out)"]
        );
        assert!(schematic
            .to_text()
            .ends_with("  «text (-400,-940) 1 0 0 0x1000000 -1 -1 \"ï»¿.save V(out)\"»\n»\n"));
        assert!(matches!(
            schematic.add_instruction(".param x=1"),
            Err(SpiceError::InvalidValue(_))
        ));

        schematic.set_parameter("vdd", "5").unwrap();
        assert_eq!(schematic.parameter("VDD").as_deref(), Some("5"));

        assert!(schematic.remove_instruction(".save V(out)"));
        assert!(!schematic.remove_instruction(".save V(out)"));
        // Comments are not directives.
        assert!(!schematic.remove_instruction(".op"));
        assert!(QspiceSchematic::parse(&schematic.to_text()).is_ok());
    }

    #[test]
    fn test_strings_that_cannot_be_stored() {
        let mut schematic = QspiceSchematic::parse(QSCH).unwrap();
        assert!(matches!(
            schematic.set_component_value("R1", "a\"b"),
            Err(SpiceError::InvalidValue(_))
        ));
        assert!(matches!(
            schematic.set_component_value("R1", "1kΩ"),
            Err(SpiceError::InvalidValue(_))
        ));
        assert_eq!(schematic.to_text(), QSCH);
        // '€' is a single Windows-1252 byte.
        schematic.set_component_value("R1", "5€").unwrap();
        assert!(schematic.to_bytes().windows(3).any(|w| w == b"5\x80\""));
    }

    #[test]
    fn test_structural_errors() {
        assert!(matches!(
            QspiceSchematic::parse("«schematic\n  «text (0,0) 1 7 0 0x0 -1 -1 \"x\"\n"),
            Err(SpiceError::UnrecognizedFormat { line: 2, .. })
        ));
        assert!(matches!(
            QspiceSchematic::parse("«symbol R»\n"),
            Err(SpiceError::UnrecognizedFormat { .. })
        ));
        assert!(matches!(
            QspiceSchematic::parse("«schematic»\n«schematic»\n"),
            Err(SpiceError::UnrecognizedFormat { line: 2, .. })
        ));
        assert!(matches!(
            QspiceSchematic::parse("«schematic\n  «component (0,0) 0 0\n    «symbol R»\n  »\n»\n"),
            Err(SpiceError::Format(_))
        ));
    }

    fn sheet_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("spicekit_qsch_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn component(x: i32, designator: &str, value: &str) -> String {
        format!(
            "  «component ({},0) 0 0\n    «symbol {}\n      «text (0,0) 1 7 0 0x1000000 -1 -1 \"{}\"»\n      «text (0,-50) 1 7 0 0x1000000 -1 -1 \"{}\"»\n    »\n  »\n",
            x, value, designator, value
        )
    }

    #[test]
    fn test_subcircuit_sheets() {
        let dir = sheet_dir("sheets");
        let top = format!("«schematic\n{}{}{}»\n", component(0, "X1", "amp"), component(500, "X2", "amp"), component(900, "R1", "100"));
        let amp = format!("«schematic\n{}{}»\n", component(0, "R1", "1k"), component(300, "XLOOP", "amp"));
        std::fs::write(dir.join("top.qsch"), qsch_bytes(&top)).unwrap();
        std::fs::write(dir.join("amp.qsch"), qsch_bytes(&amp)).unwrap();

        let mut schematic = QspiceSchematic::read(dir.join("top.qsch")).unwrap();
        assert!(schematic.sheet("x1").is_some());
        assert!(schematic.sheet("R1").is_none());
        assert_eq!(schematic.component_value("X1:R1").unwrap(), "1k");
        // A sheet that places itself is not loaded again.
        assert!(matches!(
            schematic.component("X1:XLOOP:R1"),
            Err(SpiceError::MissingComponent(_))
        ));

        schematic.set_component_value("X1:R1", 2200.0).unwrap();
        assert_eq!(schematic.component_value("X2:R1").unwrap(), "2.2k");
        assert_eq!(schematic.component_value("R1").unwrap(), "100");
        assert_eq!(schematic.to_text(), top);

        schematic.save(dir.join("top_out.qsch")).unwrap();
        let reread = QspiceSchematic::read(dir.join("top_out.qsch")).unwrap();
        assert_eq!(reread.component_value("X1:R1").unwrap(), "2.2k");
        assert_eq!(reread.component_value("X1:XLOOP").unwrap(), "amp");
    }
}

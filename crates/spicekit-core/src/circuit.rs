//! Netlist item tree and its line-oriented parser
//!
//! The parser is a small state machine over physical lines: top level,
//! inside one or more `.SUBCKT` blocks (a stack), or inside a `.CONTROL`
//! block whose lines are kept without interpretation.

use tracing::{debug, warn};

use crate::element::Element;
use crate::prefix::PrefixRegistry;
use crate::tokenizer::{join_continuations, split_comment, split_param, tokenize};
use crate::types::{Result, SpiceError};

// ============================================================================
// Items
// ============================================================================

/// A dot-command line such as `.TRAN 1m` or `.PARAM a=1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    text: String,
}

impl Instruction {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Text as written, physical lines separated by `\n`.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Upper-cased command word, e.g. `.TRAN`.
    pub fn command(&self) -> String {
        command_word(&self.text)
    }

    /// Tokens of the logical line without the command and comment.
    pub fn arguments(&self) -> Vec<String> {
        let logical = join_continuations(&self.text);
        let (code, _) = split_comment(&logical);
        tokenize(code).into_iter().skip(1).collect()
    }
}

/// Lines between `.CONTROL` and `.ENDC`, both included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBlock {
    lines: Vec<String>,
}

impl ControlBlock {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// One entry of a circuit, in file order
#[derive(Debug, Clone)]
pub enum NetlistItem {
    Element(Element),
    Instruction(Instruction),
    /// Comment or blank line, kept verbatim.
    Comment(String),
    Control(ControlBlock),
    Subcircuit(Subcircuit),
}

/// Ordered sequence of items: the top level of a netlist or a subcircuit body
#[derive(Debug, Clone, Default)]
pub struct Circuit {
    pub(crate) items: Vec<NetlistItem>,
}

impl Circuit {
    pub fn items(&self) -> &[NetlistItem] {
        &self.items
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.items.iter().filter_map(|item| match item {
            NetlistItem::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn subcircuits(&self) -> impl Iterator<Item = &Subcircuit> {
        self.items.iter().filter_map(|item| match item {
            NetlistItem::Subcircuit(s) => Some(s),
            _ => None,
        })
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.items.iter().filter_map(|item| match item {
            NetlistItem::Instruction(i) => Some(i),
            _ => None,
        })
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.position_element(name).and_then(|i| match &self.items[i] {
            NetlistItem::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn subcircuit(&self, name: &str) -> Option<&Subcircuit> {
        self.position_subcircuit(name).and_then(|i| match &self.items[i] {
            NetlistItem::Subcircuit(s) => Some(s),
            _ => None,
        })
    }

    pub(crate) fn position_element(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|item| match item {
            NetlistItem::Element(e) => e.name().eq_ignore_ascii_case(name),
            _ => false,
        })
    }

    pub(crate) fn position_subcircuit(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|item| match item {
            NetlistItem::Subcircuit(s) => s.name.eq_ignore_ascii_case(name),
            _ => false,
        })
    }

    /// Index before which new lines go: the first `.BACKANNO` or `.END`,
    /// otherwise the end.
    pub(crate) fn insertion_point(&self) -> usize {
        self.items
            .iter()
            .position(|item| match item {
                NetlistItem::Instruction(i) => matches!(i.command().as_str(), ".END" | ".BACKANNO"),
                _ => false,
            })
            .unwrap_or(self.items.len())
    }
}

// ============================================================================
// Subcircuit
// ============================================================================

/// A `.SUBCKT` ... `.ENDS` definition
#[derive(Debug, Clone)]
pub struct Subcircuit {
    pub(crate) name: String,
    pub(crate) header: String,
    pub(crate) body: Circuit,
    pub(crate) footer: String,
    /// Library file the definition was loaded from; such definitions are read-only.
    pub(crate) library: Option<String>,
    /// Instance this definition was cloned for.
    pub(crate) clone_for: Option<String>,
}

impl Subcircuit {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &Circuit {
        &self.body
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn footer(&self) -> &str {
        &self.footer
    }

    pub fn is_library(&self) -> bool {
        self.library.is_some()
    }

    pub fn library(&self) -> Option<&str> {
        self.library.as_deref()
    }

    /// Instance name when this definition is a per-instance copy.
    pub fn cloned_for(&self) -> Option<&str> {
        self.clone_for.as_deref()
    }

    fn header_tokens(&self) -> Vec<String> {
        let logical = join_continuations(&self.header);
        let (code, _) = split_comment(&logical);
        tokenize(code)
    }

    /// Port names in declaration order.
    pub fn ports(&self) -> Vec<String> {
        self.header_tokens()
            .into_iter()
            .skip(2)
            .take_while(|t| !t.eq_ignore_ascii_case("params:") && split_param(t).is_none())
            .collect()
    }

    /// Default parameters declared on the `.SUBCKT` line.
    pub fn params(&self) -> Vec<(String, String)> {
        self.header_tokens()
            .iter()
            .skip(2)
            .filter_map(|t| split_param(t))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Copy of this definition under a new name, owned by one instance.
    pub(crate) fn clone_as(&self, new_name: &str, instance: &str) -> Subcircuit {
        let logical = join_continuations(&self.header);
        let (code, comment) = split_comment(&logical);
        let mut tokens = tokenize(code);
        if tokens.len() > 1 {
            tokens[1] = new_name.to_string();
        }
        let mut header = tokens.join(" ");
        if let Some(comment) = comment {
            header.push(' ');
            header.push_str(comment);
        }

        let footer_tokens = tokenize(split_comment(&self.footer).0);
        let footer = if footer_tokens.len() > 1 {
            format!("{} {}", footer_tokens[0], new_name)
        } else {
            self.footer.clone()
        };

        Subcircuit {
            name: new_name.to_string(),
            header,
            body: self.body.clone(),
            footer,
            library: None,
            clone_for: Some(instance.to_string()),
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// A `.LIB` or `.INCLUDE` reference in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LibraryDirective {
    pub file: String,
    pub section: Option<String>,
}

/// Result of parsing netlist text
#[derive(Debug)]
pub(crate) struct ParsedCircuit {
    pub circuit: Circuit,
    pub libraries: Vec<LibraryDirective>,
    pub newline: &'static str,
    pub trailing_newline: bool,
}

struct Frame {
    name: String,
    header: String,
    body: Circuit,
    line: usize,
}

fn command_word(text: &str) -> String {
    text.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.is_empty() || trimmed.starts_with('*') || trimmed.starts_with(';')
}

fn unquote(text: &str) -> &str {
    text.trim_matches(|c| c == '"' || c == '\'')
}

/// Parse netlist text into an item tree.
pub(crate) fn parse_circuit(text: &str, registry: &PrefixRegistry) -> Result<ParsedCircuit> {
    let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let trailing_newline = text.ends_with('\n');
    let mut lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    if trailing_newline {
        lines.pop();
    }

    let mut root = Circuit::default();
    let mut stack: Vec<Frame> = Vec::new();
    let mut control: Option<(Vec<String>, usize)> = None;
    let mut libraries = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line_no = i + 1;
        let line = lines[i];
        let trimmed = line.trim_start();

        if let Some((block, _)) = control.as_mut() {
            block.push(line.to_string());
            i += 1;
            if command_word(trimmed) == ".ENDC" {
                if let Some((lines, _)) = control.take() {
                    current(&mut stack, &mut root)
                        .items
                        .push(NetlistItem::Control(ControlBlock { lines }));
                }
            }
            continue;
        }

        let mut end = i + 1;
        if !is_comment(trimmed) {
            while end < lines.len() && lines[end].trim_start().starts_with('+') {
                end += 1;
            }
        }
        let text = lines[i..end].join("\n");
        i = end;

        if is_comment(trimmed) {
            current(&mut stack, &mut root).items.push(NetlistItem::Comment(text));
            continue;
        }
        if trimmed.starts_with('+') {
            warn!(line = line_no, "Continuation line without a preceding statement");
            current(&mut stack, &mut root).items.push(NetlistItem::Comment(text));
            continue;
        }

        if !trimmed.starts_with('.') {
            let element = registry.parse_element_or_opaque(&text);
            if element.is_opaque() {
                debug!(line = line_no, name = element.name(), "Unknown device prefix, stored verbatim");
            }
            current(&mut stack, &mut root).items.push(NetlistItem::Element(element));
            continue;
        }

        let logical = join_continuations(&text);
        let tokens = tokenize(split_comment(&logical).0);
        match command_word(trimmed).as_str() {
            ".SUBCKT" => {
                let name = tokens
                    .get(1)
                    .cloned()
                    .ok_or_else(|| SpiceError::unrecognized(line_no, ".SUBCKT without a name"))?;
                stack.push(Frame {
                    name,
                    header: text,
                    body: Circuit::default(),
                    line: line_no,
                });
            }
            ".ENDS" => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| SpiceError::unrecognized(line_no, ".ENDS without an open .SUBCKT"))?;
                if let Some(name) = tokens.get(1) {
                    if !name.eq_ignore_ascii_case(&frame.name) {
                        warn!(line = line_no, expected = %frame.name, found = %name, ".ENDS name mismatch");
                    }
                }
                let subcircuit = Subcircuit {
                    name: frame.name,
                    header: frame.header,
                    body: frame.body,
                    footer: text,
                    library: None,
                    clone_for: None,
                };
                current(&mut stack, &mut root)
                    .items
                    .push(NetlistItem::Subcircuit(subcircuit));
            }
            ".CONTROL" => control = Some((text.split('\n').map(str::to_string).collect(), line_no)),
            ".ENDC" => return Err(SpiceError::unrecognized(line_no, ".ENDC without an open .CONTROL")),
            command => {
                if matches!(command, ".LIB" | ".INC" | ".INCLUDE") {
                    if let Some(file) = tokens.get(1) {
                        libraries.push(LibraryDirective {
                            file: unquote(file).to_string(),
                            section: tokens.get(2).cloned(),
                        });
                    }
                }
                current(&mut stack, &mut root)
                    .items
                    .push(NetlistItem::Instruction(Instruction::new(text)));
            }
        }
    }

    if let Some((_, line)) = control {
        return Err(SpiceError::unrecognized(line, ".CONTROL block is never closed"));
    }
    if let Some(frame) = stack.pop() {
        return Err(SpiceError::unrecognized(
            frame.line,
            format!(".SUBCKT {} is never closed with .ENDS", frame.name),
        ));
    }

    debug!(items = root.items.len(), libraries = libraries.len(), "Netlist parsed");
    Ok(ParsedCircuit {
        circuit: root,
        libraries,
        newline,
        trailing_newline,
    })
}

fn current<'a>(stack: &'a mut [Frame], root: &'a mut Circuit) -> &'a mut Circuit {
    match stack.last_mut() {
        Some(frame) => &mut frame.body,
        None => root,
    }
}

// ============================================================================
// Writing
// ============================================================================

fn push_lines(out: &mut String, text: &str, newline: &str) {
    for line in text.split('\n') {
        out.push_str(line);
        out.push_str(newline);
    }
}

pub(crate) fn write_circuit(circuit: &Circuit, out: &mut String, newline: &str) {
    for item in &circuit.items {
        match item {
            NetlistItem::Element(e) => push_lines(out, &e.render(), newline),
            NetlistItem::Instruction(i) => push_lines(out, i.text(), newline),
            NetlistItem::Comment(c) => push_lines(out, c, newline),
            NetlistItem::Control(block) => {
                for line in &block.lines {
                    push_lines(out, line, newline);
                }
            }
            NetlistItem::Subcircuit(s) => {
                push_lines(out, &s.header, newline);
                write_circuit(&s.body, out, newline);
                push_lines(out, &s.footer, newline);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ParsedCircuit> {
        parse_circuit(text, PrefixRegistry::shared())
    }

    fn render(parsed: &ParsedCircuit) -> String {
        let mut out = String::new();
        write_circuit(&parsed.circuit, &mut out, parsed.newline);
        if !parsed.trailing_newline {
            out.truncate(out.len() - parsed.newline.len());
        }
        out
    }

    const NETLIST: &str = "* title\n\
V1 in 0 1\n\
R1 in out 1k\n\
.subckt filt a b\n\
R1 a b 10k\n\
C1 b 0 1n\n\
.ends filt\n\
X1 out 0 filt\n\
.control\n\
run\n\
+ weird\n\
.endc\n\
.tran 1m\n\
.end\n";

    #[test]
    fn test_structure() {
        let parsed = parse(NETLIST).unwrap();
        let items = parsed.circuit.items();
        assert!(matches!(items[0], NetlistItem::Comment(_)));
        assert_eq!(parsed.circuit.elements().count(), 3);
        let sub = parsed.circuit.subcircuit("FILT").unwrap();
        assert_eq!(sub.ports(), vec!["a", "b"]);
        assert_eq!(sub.body().elements().count(), 2);
        assert!(items
            .iter()
            .any(|i| matches!(i, NetlistItem::Control(c) if c.lines().len() == 4)));
    }

    #[test]
    fn test_roundtrip_is_exact() {
        let parsed = parse(NETLIST).unwrap();
        assert_eq!(render(&parsed), NETLIST);

        let crlf = NETLIST.replace('\n', "\r\n");
        assert_eq!(render(&parse(&crlf).unwrap()), crlf);

        let no_eol = "R1 a b 1k\n.end";
        assert_eq!(render(&parse(no_eol).unwrap()), no_eol);
    }

    #[test]
    fn test_unbalanced_nesting_is_fatal() {
        let err = parse("R1 a b 1\n.ends\n").unwrap_err();
        assert!(matches!(err, SpiceError::UnrecognizedFormat { line: 2, .. }));

        let err = parse(".subckt a x\nR1 x 0 1\n").unwrap_err();
        assert!(matches!(err, SpiceError::UnrecognizedFormat { line: 1, .. }));

        let err = parse(".control\nrun\n").unwrap_err();
        assert!(matches!(err, SpiceError::UnrecognizedFormat { .. }));
    }

    #[test]
    fn test_control_block_is_kept_verbatim() {
        let text = "R1 a 0 1k\n.control\nR9 x y 5\n.subckt bogus p\nlet v = 1\n.endc\n.end\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.circuit.elements().count(), 1);
        assert!(parsed.circuit.subcircuit("bogus").is_none());
        assert_eq!(render(&parsed), text);

        let err = parse("R1 a 0 1k\n.endc\n").unwrap_err();
        assert!(matches!(err, SpiceError::UnrecognizedFormat { line: 2, .. }));
    }

    #[test]
    fn test_ends_name_mismatch_is_tolerated() {
        let text = ".subckt a x\nR1 x 0 1\n.ends b\n";
        let parsed = parse(text).unwrap();
        assert!(parsed.circuit.subcircuit("a").is_some());
        assert_eq!(render(&parsed), text);

        let err = parse(".subckt a x\n.ends a\n.ends a\n").unwrap_err();
        assert!(matches!(err, SpiceError::UnrecognizedFormat { line: 3, .. }));
    }

    #[test]
    fn test_nested_subcircuits() {
        let text = ".subckt outer a\n.subckt inner b\nR1 b 0 1\n.ends inner\nX1 a inner\n.ends outer\n";
        let parsed = parse(text).unwrap();
        let outer = parsed.circuit.subcircuit("outer").unwrap();
        assert!(outer.body().subcircuit("inner").is_some());
        assert_eq!(render(&parsed), text);
    }

    #[test]
    fn test_library_directives() {
        let parsed = parse(".lib \"models.lib\" TT\n.include opamps.sub\n").unwrap();
        assert_eq!(
            parsed.libraries,
            vec![
                LibraryDirective {
                    file: "models.lib".into(),
                    section: Some("TT".into())
                },
                LibraryDirective {
                    file: "opamps.sub".into(),
                    section: None
                },
            ]
        );
    }

    #[test]
    fn test_clone_as_renames_header_and_footer() {
        let parsed = parse(".subckt filt a b PARAMS: r=1k\nR1 a b {r}\n.ends filt\n").unwrap();
        let sub = parsed.circuit.subcircuit("filt").unwrap();
        assert_eq!(sub.params(), vec![("r".to_string(), "1k".to_string())]);
        let copy = sub.clone_as("filt_X1", "X1");
        assert_eq!(copy.header(), ".subckt filt_X1 a b PARAMS: r=1k");
        assert_eq!(copy.footer(), ".ends filt_X1");
        assert_eq!(copy.cloned_for(), Some("X1"));
    }

    #[test]
    fn test_unicode_prefix_is_opaque() {
        let parsed = parse("¤1 a b c d FOO\n").unwrap();
        let e = parsed.circuit.elements().next().unwrap();
        assert!(e.is_opaque());
        assert_eq!(render(&parsed), "¤1 a b c d FOO\n");
    }
}

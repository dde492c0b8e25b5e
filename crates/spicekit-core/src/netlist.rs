//! SPICE netlist editor
//!
//! Components are addressed by hierarchical path: `R1` at the top level,
//! `X1:R1` for `R1` inside the subcircuit that instance `X1` refers to.
//! Reading through a path never changes the netlist. Writing through a path
//! that crosses a subcircuit instance first gives that instance its own copy
//! of the definition (named `{definition}_{instance}`), so other instances of
//! the same subcircuit keep their values.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::circuit::{parse_circuit, write_circuit, Circuit, Instruction, NetlistItem, Subcircuit};
use crate::element::{Element, Params, ToSpiceValue};
use crate::encoding::{read_text_file, write_text_file, TextEncoding};
use crate::library::Library;
use crate::prefix::PrefixRegistry;
use crate::tokenizer::{join_continuations, quote_value, split_comment, split_param, tokenize};
use crate::types::{Result, SpiceError, SUBCKT_DIVIDER, UNIQUE_SIMULATION_INSTRUCTIONS};
use crate::units::to_float;

// ============================================================================
// Netlist
// ============================================================================

/// An editable netlist
#[derive(Debug, Clone)]
pub struct Netlist {
    circuit: Circuit,
    libraries: Vec<Library>,
    registry: PrefixRegistry,
    path: Option<PathBuf>,
    encoding: TextEncoding,
    newline: &'static str,
    trailing_newline: bool,
}

/// Mutable access to one element of a [`Netlist`]
///
/// Obtained through [`Netlist::element_mut`]; any copy-on-write needed for
/// the path has already happened when the handle is returned.
pub struct ElementHandle<'a> {
    element: &'a mut Element,
    path: String,
}

impl ElementHandle<'_> {
    /// Hierarchical path the handle was obtained with.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Deref for ElementHandle<'_> {
    type Target = Element;

    fn deref(&self) -> &Element {
        &*self.element
    }
}

impl DerefMut for ElementHandle<'_> {
    fn deref_mut(&mut self) -> &mut Element {
        &mut *self.element
    }
}

/// Where a subcircuit definition was found
enum Definition {
    /// Container path followed by the definition's index.
    Local(Vec<usize>),
    Library { name: String, file: String },
}

fn split_path(path: &str) -> Vec<&str> {
    path.split(SUBCKT_DIVIDER).map(str::trim).collect()
}

/// Shift `path` when an item was inserted into `parent` at `index`.
fn shift_after_insert(path: &mut [usize], parent: &[usize], index: usize) {
    if path.len() > parent.len() && path.starts_with(parent) && path[parent.len()] >= index {
        path[parent.len()] += 1;
    }
}

impl Netlist {
    // ------------------------------------------------------------------------
    // Loading and saving
    // ------------------------------------------------------------------------

    /// Parse netlist text with the standard prefix registry.
    pub fn parse(text: &str) -> Result<Netlist> {
        Self::parse_with(text, PrefixRegistry::standard())
    }

    /// Parse netlist text with a caller-supplied prefix registry.
    pub fn parse_with(text: &str, registry: PrefixRegistry) -> Result<Netlist> {
        let parsed = parse_circuit(text, &registry)?;
        Ok(Netlist {
            circuit: parsed.circuit,
            libraries: parsed.libraries.into_iter().map(Library::new).collect(),
            registry,
            path: None,
            encoding: TextEncoding::Utf8,
            newline: parsed.newline,
            trailing_newline: parsed.trailing_newline,
        })
    }

    /// Read a netlist file.
    pub fn read(path: impl AsRef<Path>) -> Result<Netlist> {
        Self::read_with(path, PrefixRegistry::standard())
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn read_with(path: impl AsRef<Path>, registry: PrefixRegistry) -> Result<Netlist> {
        let path = path.as_ref();
        info!("Reading netlist");
        let (text, encoding) = read_text_file(path)?;
        let mut netlist = Self::parse_with(&text, registry)?;
        netlist.path = Some(path.to_path_buf());
        netlist.encoding = encoding;
        debug!(
            elements = netlist.circuit.elements().count(),
            subcircuits = netlist.circuit.subcircuits().count(),
            libraries = netlist.libraries.len(),
            "Netlist loaded"
        );
        Ok(netlist)
    }

    /// Render the netlist. Untouched lines come out exactly as read.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        write_circuit(&self.circuit, &mut out, self.newline);
        if !self.trailing_newline && out.ends_with(self.newline) {
            out.truncate(out.len() - self.newline.len());
        }
        out
    }

    /// Write the netlist with the encoding it was read with.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        info!("Writing netlist");
        write_text_file(path.as_ref(), &self.to_text(), self.encoding)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    pub fn libraries(&self) -> &[Library] {
        &self.libraries
    }

    fn base_dir(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    // ------------------------------------------------------------------------
    // Containers
    // ------------------------------------------------------------------------

    fn container(&self, path: &[usize]) -> Option<&Circuit> {
        let mut circuit = &self.circuit;
        for &index in path {
            match circuit.items.get(index)? {
                NetlistItem::Subcircuit(s) => circuit = &s.body,
                _ => return None,
            }
        }
        Some(circuit)
    }

    fn container_mut(&mut self, path: &[usize]) -> Option<&mut Circuit> {
        let mut circuit = &mut self.circuit;
        for &index in path {
            match circuit.items.get_mut(index)? {
                NetlistItem::Subcircuit(s) => circuit = &mut s.body,
                _ => return None,
            }
        }
        Some(circuit)
    }

    fn local_subcircuit(&self, location: &[usize]) -> Option<&Subcircuit> {
        let (&index, parent) = location.split_last()?;
        match self.container(parent)?.items.get(index)? {
            NetlistItem::Subcircuit(s) => Some(s),
            _ => None,
        }
    }

    fn element_at_mut(&mut self, container: &[usize], index: usize) -> Option<&mut Element> {
        match self.container_mut(container)?.items.get_mut(index)? {
            NetlistItem::Element(e) => Some(e),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Definition lookup
    // ------------------------------------------------------------------------

    /// Search enclosing scopes from the innermost outwards, then libraries.
    fn find_definition(&self, scope: &[usize], name: &str) -> Option<Definition> {
        for depth in (0..=scope.len()).rev() {
            let container = self.container(&scope[..depth])?;
            if let Some(index) = container.position_subcircuit(name) {
                let mut location = scope[..depth].to_vec();
                location.push(index);
                return Some(Definition::Local(location));
            }
        }
        self.find_library_definition(name).map(|sub| Definition::Library {
            name: sub.name().to_string(),
            file: sub.library().unwrap_or_default().to_string(),
        })
    }

    fn find_library_definition(&self, name: &str) -> Option<&Subcircuit> {
        let base = self.base_dir();
        self.libraries
            .iter()
            .find_map(|lib| lib.find(name, base, &self.registry))
    }

    /// Definition visible from a chain of read-only scopes.
    fn find_definition_in<'a>(&'a self, scopes: &[&'a Circuit], name: &str) -> Option<&'a Subcircuit> {
        scopes
            .iter()
            .rev()
            .find_map(|&c| c.subcircuit(name))
            .or_else(|| self.find_library_definition(name))
    }

    fn subcircuit_name_taken(&self, name: &str) -> bool {
        fn taken(circuit: &Circuit, name: &str) -> bool {
            circuit
                .subcircuits()
                .any(|s| s.name().eq_ignore_ascii_case(name) || taken(s.body(), name))
        }
        taken(&self.circuit, name) || self.find_library_definition(name).is_some()
    }

    // ------------------------------------------------------------------------
    // Path resolution
    // ------------------------------------------------------------------------

    /// Resolve a path for reading. Also reports the first library definition
    /// crossed, so writers can refuse before touching anything.
    fn walk(&self, path: &str) -> Result<(&Element, Option<(String, String)>)> {
        let missing = || SpiceError::MissingComponent(path.to_string());
        let segments = split_path(path);
        let (last, instances) = segments.split_last().ok_or_else(missing)?;

        let mut scopes: Vec<&Circuit> = vec![&self.circuit];
        let mut library = None;
        for segment in instances {
            let scope = scopes.last().copied().ok_or_else(missing)?;
            let instance = scope.element(segment).filter(|e| e.is_instance()).ok_or_else(missing)?;
            let model = instance.model().ok_or_else(missing)?;
            let definition = self.find_definition_in(&scopes, model).ok_or_else(missing)?;
            if library.is_none() {
                if let Some(file) = definition.library() {
                    library = Some((definition.name().to_string(), file.to_string()));
                }
            }
            scopes.push(definition.body());
        }
        let scope = scopes.last().copied().ok_or_else(missing)?;
        let element = scope.element(last).ok_or_else(missing)?;
        Ok((element, library))
    }

    /// Resolve a path for writing, cloning shared definitions on the way.
    /// Returns the container path and index of the element.
    fn resolve_for_write(&mut self, path: &str) -> Result<(Vec<usize>, usize)> {
        if let (_, Some((name, library))) = self.walk(path)? {
            return Err(SpiceError::ImmutableLibrary { name, library });
        }

        let missing = || SpiceError::MissingComponent(path.to_string());
        let segments = split_path(path);
        let (last, instances) = segments.split_last().ok_or_else(missing)?;

        let mut scope: Vec<usize> = Vec::new();
        for segment in instances {
            let container = self.container(&scope).ok_or_else(missing)?;
            let instance_index = container.position_element(segment).ok_or_else(missing)?;
            let model = container
                .element(segment)
                .and_then(Element::model)
                .ok_or_else(missing)?
                .to_string();

            let location = match self.find_definition(&scope, &model) {
                Some(Definition::Local(location)) => location,
                Some(Definition::Library { name, file }) => {
                    return Err(SpiceError::ImmutableLibrary { name, library: file })
                }
                None => return Err(missing()),
            };
            scope = self.own_definition(scope, instance_index, segment, location)?;
        }

        let index = self
            .container(&scope)
            .and_then(|c| c.position_element(last))
            .ok_or_else(missing)?;
        Ok((scope, index))
    }

    /// Make sure the instance at `scope[instance_index]` has a definition of
    /// its own and return that definition's location.
    fn own_definition(
        &mut self,
        scope: Vec<usize>,
        instance_index: usize,
        instance: &str,
        location: Vec<usize>,
    ) -> Result<Vec<usize>> {
        let missing = || SpiceError::MissingComponent(instance.to_string());
        let definition = self.local_subcircuit(&location).ok_or_else(missing)?;
        if definition
            .cloned_for()
            .is_some_and(|owner| owner.eq_ignore_ascii_case(instance))
        {
            return Ok(location);
        }

        let base_name = format!("{}_{}", definition.name(), instance);
        let mut new_name = base_name.clone();
        let mut counter = 2;
        while self.subcircuit_name_taken(&new_name) {
            new_name = format!("{}_{}", base_name, counter);
            counter += 1;
        }
        let copy = definition.clone_as(&new_name, instance);
        info!(
            original = definition.name(),
            copy = %new_name,
            instance,
            "Cloning subcircuit for instance edit"
        );

        let (&definition_index, parent) = location.split_last().ok_or_else(missing)?;
        let insert_at = definition_index + 1;
        self.container_mut(parent)
            .ok_or_else(missing)?
            .items
            .insert(insert_at, NetlistItem::Subcircuit(copy));

        let mut instance_path = scope;
        instance_path.push(instance_index);
        shift_after_insert(&mut instance_path, parent, insert_at);
        let (&instance_index, scope) = instance_path.split_last().ok_or_else(missing)?;
        self.element_at_mut(scope, instance_index)
            .ok_or_else(missing)?
            .set_model(&new_name)?;

        let mut copy_location = parent.to_vec();
        copy_location.push(insert_at);
        Ok(copy_location)
    }

    // ------------------------------------------------------------------------
    // Component access
    // ------------------------------------------------------------------------

    /// Element at a hierarchical path.
    pub fn element(&self, path: &str) -> Result<&Element> {
        self.walk(path).map(|(element, _)| element)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.walk(path).is_ok()
    }

    /// Mutable handle to the element at a path, cloning definitions as needed.
    pub fn element_mut(&mut self, path: &str) -> Result<ElementHandle<'_>> {
        let (container, index) = self.resolve_for_write(path)?;
        let element = self
            .element_at_mut(&container, index)
            .ok_or_else(|| SpiceError::MissingComponent(path.to_string()))?;
        Ok(ElementHandle {
            element,
            path: path.to_string(),
        })
    }

    /// Names of top-level elements whose prefix is one of `prefixes`
    /// (all elements when `prefixes` is empty).
    pub fn components(&self, prefixes: &str) -> Vec<String> {
        let wanted: Vec<char> = prefixes.chars().map(|c| c.to_ascii_uppercase()).collect();
        self.circuit
            .elements()
            .filter(|e| wanted.is_empty() || wanted.contains(&e.prefix()))
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Value text of a component, including values held by an alias
    /// parameter such as `R=`.
    pub fn component_value(&self, path: &str) -> Result<&str> {
        self.element(path)?
            .value()
            .ok_or_else(|| SpiceError::MissingParameter(format!("{} value", path)))
    }

    /// Numeric value of a component.
    pub fn component_value_f64(&self, path: &str) -> Result<f64> {
        let text = self.component_value(path)?;
        to_float(text).ok_or_else(|| SpiceError::InvalidValue(format!("{} = '{}' is not numeric", path, text)))
    }

    pub fn component_nodes(&self, path: &str) -> Result<&[String]> {
        Ok(self.element(path)?.nodes())
    }

    pub fn component_parameters(&self, path: &str) -> Result<&Params> {
        Ok(self.element(path)?.params())
    }

    pub fn set_component_value(&mut self, path: &str, value: impl ToSpiceValue) -> Result<()> {
        self.element_mut(path)?.set_value(value)
    }

    pub fn set_component_values<'a, V, I>(&mut self, values: I) -> Result<()>
    where
        V: ToSpiceValue,
        I: IntoIterator<Item = (&'a str, V)>,
    {
        for (path, value) in values {
            self.set_component_value(path, value)?;
        }
        Ok(())
    }

    /// Replace the model (or subcircuit) name of a component.
    pub fn set_element_model(&mut self, path: &str, model: &str) -> Result<()> {
        self.element_mut(path)?.set_model(model)
    }

    pub fn set_component_parameters<'a, V, I>(&mut self, path: &str, params: I) -> Result<()>
    where
        V: ToSpiceValue,
        I: IntoIterator<Item = (&'a str, V)>,
    {
        let mut handle = self.element_mut(path)?;
        for (key, value) in params {
            handle.set_param(key, value)?;
        }
        Ok(())
    }

    /// Remove a component. Inside a subcircuit only the instance's own copy changes.
    pub fn remove_component(&mut self, path: &str) -> Result<Element> {
        let (container, index) = self.resolve_for_write(path)?;
        let circuit = self
            .container_mut(&container)
            .ok_or_else(|| SpiceError::MissingComponent(path.to_string()))?;
        match circuit.items.remove(index) {
            NetlistItem::Element(e) => {
                debug!(path, "Component removed");
                Ok(e)
            }
            other => {
                circuit.items.insert(index, other);
                Err(SpiceError::MissingComponent(path.to_string()))
            }
        }
    }

    /// Add a top-level component ahead of `.BACKANNO` / `.END`.
    pub fn add_component(&mut self, element: Element) -> Result<()> {
        if self.circuit.element(element.name()).is_some() {
            return Err(SpiceError::InvalidValue(format!(
                "component '{}' already exists",
                element.name()
            )));
        }
        let at = self.circuit.insertion_point();
        self.circuit.items.insert(at, NetlistItem::Element(element));
        Ok(())
    }

    /// Every node name used by top-level elements.
    pub fn all_nodes(&self) -> BTreeSet<String> {
        self.circuit
            .elements()
            .flat_map(|e| e.nodes().iter().cloned())
            .collect()
    }

    /// Names of the top-level subcircuit definitions.
    pub fn subcircuit_names(&self) -> Vec<String> {
        self.circuit.subcircuits().map(|s| s.name().to_string()).collect()
    }

    /// A subcircuit defined in the netlist or in one of its libraries.
    pub fn subcircuit(&self, name: &str) -> Option<&Subcircuit> {
        self.circuit
            .subcircuit(name)
            .or_else(|| self.find_library_definition(name))
    }

    // ------------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------------

    fn param_instructions(&self) -> impl Iterator<Item = (usize, &Instruction)> {
        self.circuit.items.iter().enumerate().filter_map(|(i, item)| match item {
            NetlistItem::Instruction(ins) if ins.command() == ".PARAM" => Some((i, ins)),
            _ => None,
        })
    }

    /// Value of a top-level `.PARAM`.
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.param_instructions().find_map(|(_, ins)| {
            ins.arguments().iter().find_map(|token| {
                split_param(token)
                    .filter(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v.to_string())
            })
        })
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.param_instructions()
            .flat_map(|(_, ins)| ins.arguments())
            .filter_map(|token| split_param(&token).map(|(k, _)| k.to_string()))
            .collect()
    }

    /// Set a `.PARAM` value, editing the line that defines it or adding a new
    /// `.PARAM` line.
    pub fn set_parameter(&mut self, name: &str, value: impl ToSpiceValue) -> Result<()> {
        let value = quote_value(&value.to_spice_value());
        let found = self.param_instructions().find_map(|(index, ins)| {
            ins.arguments()
                .iter()
                .any(|t| split_param(t).is_some_and(|(k, _)| k.eq_ignore_ascii_case(name)))
                .then_some(index)
        });

        match found {
            Some(index) => {
                if let NetlistItem::Instruction(ins) = &mut self.circuit.items[index] {
                    let logical = join_continuations(ins.text());
                    let (code, comment) = split_comment(&logical);
                    let mut tokens = tokenize(code);
                    for token in tokens.iter_mut().skip(1) {
                        let key = split_param(token)
                            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
                            .map(|(k, _)| k.to_string());
                        if let Some(key) = key {
                            *token = format!("{}={}", key, value);
                        }
                    }
                    let mut text = tokens.join(" ");
                    if let Some(comment) = comment {
                        text.push(' ');
                        text.push_str(comment);
                    }
                    *ins = Instruction::new(text);
                }
            }
            None => {
                let at = self.circuit.insertion_point();
                self.circuit.items.insert(
                    at,
                    NetlistItem::Instruction(Instruction::new(format!(".param {}={}", name, value))),
                );
            }
        }
        debug!(name, %value, "Parameter set");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Instructions
    // ------------------------------------------------------------------------

    /// Text of every top-level instruction.
    pub fn instructions(&self) -> Vec<&str> {
        self.circuit.instructions().map(Instruction::text).collect()
    }

    /// Add an instruction. An analysis such as `.TRAN` replaces the existing
    /// analysis of the same kind.
    pub fn add_instruction(&mut self, text: &str) -> Result<()> {
        let instruction = Instruction::new(text.trim());
        let command = instruction.command();
        if command == ".PARAM" {
            return Err(SpiceError::InvalidValue(
                ".PARAM lines are edited with set_parameter".to_string(),
            ));
        }
        if UNIQUE_SIMULATION_INSTRUCTIONS.contains(&command.as_str()) {
            let existing = self.circuit.items.iter().position(|item| {
                matches!(item, NetlistItem::Instruction(i) if i.command() == command)
            });
            if let Some(index) = existing {
                info!(%command, "Replacing analysis");
                self.circuit.items[index] = NetlistItem::Instruction(instruction);
                return Ok(());
            }
        }
        if self.instructions().iter().any(|t| t.eq_ignore_ascii_case(instruction.text())) {
            warn!(text = instruction.text(), "Instruction already present");
            return Ok(());
        }
        let at = self.circuit.insertion_point();
        self.circuit.items.insert(at, NetlistItem::Instruction(instruction));
        Ok(())
    }

    /// Remove the first top-level instruction with exactly this text.
    pub fn remove_instruction(&mut self, text: &str) -> bool {
        let text = text.trim();
        let found = self.circuit.items.iter().position(|item| {
            matches!(item, NetlistItem::Instruction(i) if i.text().trim().eq_ignore_ascii_case(text))
        });
        match found {
            Some(index) => {
                self.circuit.items.remove(index);
                true
            }
            None => {
                warn!(text, "Instruction not found");
                false
            }
        }
    }

    /// Remove every top-level instruction whose command is `command`
    /// (e.g. `.MEAS`). Returns how many were removed.
    pub fn remove_instructions_with_command(&mut self, command: &str) -> usize {
        let before = self.circuit.items.len();
        self.circuit.items.retain(|item| {
            !matches!(item, NetlistItem::Instruction(i) if i.command().eq_ignore_ascii_case(command))
        });
        before - self.circuit.items.len()
    }
}

impl fmt::Display for Netlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AMP: &str = "* amplifier\n\
V1 vcc 0 5\n\
R1 in out R=2k5R\n\
.subckt stage a b\n\
R1 a b 10k\n\
C1 b 0 1n\n\
.ends stage\n\
X1 in mid stage\n\
X2 mid out stage\n\
.param gain=10 bw=1Meg\n\
.tran 1m\n\
.backanno\n\
.end\n";

    #[test]
    fn test_untouched_roundtrip() {
        let netlist = Netlist::parse(AMP).unwrap();
        assert_eq!(netlist.to_text(), AMP);
    }

    #[test]
    fn test_alias_value_lookup() {
        let netlist = Netlist::parse(AMP).unwrap();
        assert_eq!(netlist.component_value("R1").unwrap(), "2k5R");
        assert_eq!(netlist.component_value_f64("R1").unwrap(), 2500.0);
        assert_eq!(netlist.component_value("X1:R1").unwrap(), "10k");
        assert!(matches!(
            netlist.element("R9"),
            Err(SpiceError::MissingComponent(_))
        ));
        assert!(matches!(
            netlist.element("V1:R1"),
            Err(SpiceError::MissingComponent(_))
        ));
    }

    #[test]
    fn test_instance_edit_is_isolated() {
        let mut netlist = Netlist::parse(AMP).unwrap();
        netlist.set_component_value("X1:R1", "22k").unwrap();

        assert_eq!(netlist.component_value("X1:R1").unwrap(), "22k");
        assert_eq!(netlist.component_value("X2:R1").unwrap(), "10k");
        assert_eq!(netlist.element("X1").unwrap().model(), Some("stage_X1"));
        assert_eq!(netlist.element("X2").unwrap().model(), Some("stage"));
        assert_eq!(netlist.subcircuit_names(), vec!["stage", "stage_X1"]);

        // A second edit reuses the instance's copy.
        netlist.set_component_value("X1:C1", "2n").unwrap();
        assert_eq!(netlist.subcircuit_names().len(), 2);

        let text = netlist.to_text();
        assert!(text.contains(".subckt stage_X1 a b\nR1 a b 22k\nC1 b 0 2n\n.ends stage_X1\n"));
        assert!(text.contains("X1 in mid stage_X1\n"));
        assert!(text.contains("X2 mid out stage\n"));

        let reread = Netlist::parse(&text).unwrap();
        assert_eq!(reread.component_value("X2:R1").unwrap(), "10k");
        assert_eq!(reread.component_value("X1:R1").unwrap(), "22k");
    }

    #[test]
    fn test_nested_instance_edit() {
        let text = ".subckt inner p\nR1 p 0 1k\n.ends inner\n\
.subckt outer q\nXa q inner\n.ends outer\n\
X1 n1 outer\nX2 n2 outer\n";
        let mut netlist = Netlist::parse(text).unwrap();
        netlist.set_component_value("X1:Xa:R1", 5000.0).unwrap();
        assert_eq!(netlist.component_value("X1:Xa:R1").unwrap(), "5k");
        assert_eq!(netlist.component_value("X2:Xa:R1").unwrap(), "1k");
        assert_eq!(netlist.element("X1:Xa").unwrap().model(), Some("inner_Xa"));
        assert_eq!(netlist.element("X2:Xa").unwrap().model(), Some("inner"));
    }

    #[test]
    fn test_parameters() {
        let mut netlist = Netlist::parse(AMP).unwrap();
        assert_eq!(netlist.parameter("GAIN").as_deref(), Some("10"));
        assert_eq!(netlist.parameter_names(), vec!["gain", "bw"]);

        netlist.set_parameter("gain", 20).unwrap();
        netlist.set_parameter("vdd", 3.3).unwrap();
        let text = netlist.to_text();
        assert!(text.contains(".param gain=20 bw=1Meg\n"));
        assert!(text.contains(".param vdd=3.3\n.backanno\n"));
    }

    #[test]
    fn test_instructions() {
        let mut netlist = Netlist::parse(AMP).unwrap();
        netlist.add_instruction(".tran 10m").unwrap();
        netlist.add_instruction(".meas tran vmax MAX V(out)").unwrap();
        netlist.add_instruction(".meas tran vmax MAX V(out)").unwrap();
        assert!(netlist.add_instruction(".param x=1").is_err());

        let instructions = netlist.instructions();
        assert_eq!(instructions.iter().filter(|t| t.starts_with(".tran")).count(), 1);
        assert!(instructions.contains(&".tran 10m"));
        assert_eq!(instructions.iter().filter(|t| t.starts_with(".meas")).count(), 1);

        assert!(netlist.remove_instruction(".tran 10m"));
        assert!(!netlist.remove_instruction(".tran 10m"));
        assert_eq!(netlist.remove_instructions_with_command(".MEAS"), 1);
    }

    #[test]
    fn test_add_and_remove_components() {
        let mut netlist = Netlist::parse(AMP).unwrap();
        netlist
            .add_component(Element::new("C9", &["out", "0"], Some("10p")).unwrap())
            .unwrap();
        assert!(netlist
            .add_component(Element::new("C9", &["out", "0"], Some("10p")).unwrap())
            .is_err());
        assert!(netlist.to_text().contains("C9 out 0 10p\n.backanno\n"));

        let removed = netlist.remove_component("V1").unwrap();
        assert_eq!(removed.name(), "V1");
        assert!(!netlist.contains("V1"));
        assert_eq!(netlist.components("RC"), vec!["R1", "C9"]);
        assert_eq!(netlist.components("x"), vec!["X1", "X2"]);
    }

    #[test]
    fn test_qspice_and_transmission_line_devices() {
        let text = "* qspice\n\
Ã1 vdd vss out inm inp mp mm inmm inpp en ¥ ¥ ¥ ¥ ¥ ¥ RRopAmp Avol=1Meg\n\
Y1 n1 0 n2 0 ymod LEN=1\n";
        let mut netlist = Netlist::parse(text).unwrap();
        assert_eq!(netlist.to_text(), text);
        assert!(!netlist.element("Ã1").unwrap().is_opaque());
        assert_eq!(netlist.component_nodes("Ã1").unwrap().len(), 16);
        assert_eq!(netlist.element("Ã1").unwrap().model(), Some("RRopAmp"));
        assert_eq!(netlist.element("Y1").unwrap().model(), Some("ymod"));

        netlist.set_element_model("Ã1", "MultGmAmp").unwrap();
        netlist.set_component_parameters("Ã1", [("Avol", "2Meg")]).unwrap();
        netlist.set_element_model("Y1", "ymod2").unwrap();

        let reread = Netlist::parse(&netlist.to_text()).unwrap();
        let amp = reread.element("Ã1").unwrap();
        assert_eq!(amp.model(), Some("MultGmAmp"));
        assert_eq!(amp.param("AVOL"), Some("2Meg"));
        assert_eq!(amp.nodes()[15], "¥");
        assert_eq!(reread.element("Y1").unwrap().model(), Some("ymod2"));
    }

    #[test]
    fn test_edits_leave_control_block_alone() {
        let text = "* ngspice\nR1 in out 1k\n.control\nrun\nalter R1 2k\nR1 x y 9\n.endc\n.end\n";
        let mut netlist = Netlist::parse(text).unwrap();
        assert_eq!(netlist.components(""), vec!["R1"]);
        netlist.set_component_value("R1", "3.3k").unwrap();
        assert_eq!(
            netlist.to_text(),
            "* ngspice\nR1 in out 3.3k\n.control\nrun\nalter R1 2k\nR1 x y 9\n.endc\n.end\n"
        );

        assert!(matches!(
            Netlist::parse("R1 a b 1\n.ends\n"),
            Err(SpiceError::UnrecognizedFormat { line: 2, .. })
        ));
    }

    #[test]
    fn test_handle_and_nodes() {
        let mut netlist = Netlist::parse(AMP).unwrap();
        {
            let mut handle = netlist.element_mut("R1").unwrap();
            assert_eq!(handle.path(), "R1");
            handle.set_param("tc1", "0.01").unwrap();
            handle.set_nodes(&["in", "load"]).unwrap();
        }
        assert_eq!(netlist.component_parameters("R1").unwrap().get("TC1"), Some("0.01"));
        let nodes = netlist.all_nodes();
        assert!(nodes.contains("load"));
        assert!(nodes.contains("vcc"));
    }
}

//! Circuit elements: one device line of a netlist
//!
//! An [`Element`] remembers the physical lines it was parsed from. Until one
//! of its setters runs it renders those lines back unchanged; afterwards it
//! renders canonically from its fields.

use std::fmt;

use crate::prefix::{PrefixRegistry, PrefixRule, ValueSlot};
use crate::tokenizer::{join_continuations, quote_value, split_comment, split_param, tokenize};
use crate::types::{Result, SpiceError, MAX_LINE_WIDTH};
use crate::units::{format_eng, to_float};

// ============================================================================
// Values
// ============================================================================

/// Anything that can be written into a value or parameter slot
///
/// Floats are written in engineering notation (`2200.0` becomes `2.2k`);
/// text is written as given.
pub trait ToSpiceValue {
    fn to_spice_value(&self) -> String;
}

impl ToSpiceValue for str {
    fn to_spice_value(&self) -> String {
        self.to_string()
    }
}

impl ToSpiceValue for String {
    fn to_spice_value(&self) -> String {
        self.clone()
    }
}

impl<T: ToSpiceValue + ?Sized> ToSpiceValue for &T {
    fn to_spice_value(&self) -> String {
        (**self).to_spice_value()
    }
}

impl ToSpiceValue for f64 {
    fn to_spice_value(&self) -> String {
        format_eng(*self)
    }
}

impl ToSpiceValue for f32 {
    fn to_spice_value(&self) -> String {
        format_eng(f64::from(*self))
    }
}

macro_rules! integer_spice_value {
    ($($t:ty),*) => {
        $(impl ToSpiceValue for $t {
            fn to_spice_value(&self) -> String {
                self.to_string()
            }
        })*
    };
}

integer_spice_value!(i32, i64, u32, u64, usize);

// ============================================================================
// Parameters
// ============================================================================

/// Ordered `key=value` parameters with case-insensitive keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set a parameter, keeping the position and key spelling of an existing one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.0.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.0.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

// ============================================================================
// Element
// ============================================================================

/// One device line
#[derive(Debug, Clone)]
pub struct Element {
    designator: String,
    /// `None` for elements whose prefix the registry does not know.
    rule: Option<PrefixRule>,
    nodes: Vec<String>,
    value: Option<String>,
    extras: Vec<String>,
    params_marker: Option<String>,
    params: Params,
    trailing: Vec<String>,
    comment: Option<String>,
    source: Option<String>,
    dirty: bool,
}

impl Element {
    /// Parse with the standard prefix registry.
    pub fn parse(text: &str) -> Result<Element> {
        PrefixRegistry::shared().parse_element(text)
    }

    /// Build a new element from parts, validated against the standard registry.
    pub fn new(designator: &str, nodes: &[&str], value: Option<&str>) -> Result<Element> {
        let prefix = designator.chars().next().unwrap_or(' ');
        let rule = *PrefixRegistry::shared().lookup(prefix).ok_or_else(|| {
            SpiceError::InvalidValue(format!("unknown device prefix '{}'", prefix))
        })?;
        let mut element = Element {
            designator: designator.to_string(),
            rule: Some(rule),
            nodes: Vec::new(),
            value: None,
            extras: Vec::new(),
            params_marker: None,
            params: Params::new(),
            trailing: Vec::new(),
            comment: None,
            source: None,
            dirty: true,
        };
        element.set_nodes(nodes)?;
        if let Some(value) = value {
            element.set_value(value)?;
        }
        Ok(element)
    }

    /// Store a line whose prefix is unknown. Only name and nodes are extracted
    /// and the text is always rendered back verbatim.
    pub fn opaque(text: &str) -> Element {
        let logical = join_continuations(text);
        let (code, comment) = split_comment(&logical);
        let tokens = tokenize(code);
        let mut tokens = tokens.into_iter();
        let designator = tokens.next().unwrap_or_default();
        let mut nodes = Vec::new();
        let mut params = Params::new();
        for token in tokens {
            match split_param(&token) {
                Some((k, v)) => {
                    params.insert(k, v);
                }
                None if params.is_empty() => nodes.push(token),
                None => {}
            }
        }
        Element {
            designator,
            rule: None,
            nodes,
            value: None,
            extras: Vec::new(),
            params_marker: None,
            params,
            trailing: Vec::new(),
            comment: comment.map(str::to_string),
            source: Some(text.to_string()),
            dirty: false,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.designator
    }

    /// Device letter, upper-cased for ASCII.
    pub fn prefix(&self) -> char {
        self.designator
            .chars()
            .next()
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or(' ')
    }

    pub fn is_opaque(&self) -> bool {
        self.rule.is_none()
    }

    pub fn is_instance(&self) -> bool {
        self.prefix() == 'X' && !self.is_opaque()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn rule(&self) -> Option<&PrefixRule> {
        self.rule.as_ref()
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// The positional value exactly as written, if any.
    pub fn value_field(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// The element's value: the positional value, or the aliased parameter
    /// (`R=...`) when no positional value is present.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref().or_else(|| match self.rule?.value {
            ValueSlot::Numeric { alias: Some(key) } => self.params.get(key.encode_utf8(&mut [0; 4])),
            _ => None,
        })
    }

    /// Numeric interpretation of [`Element::value`].
    pub fn value_f64(&self) -> Option<f64> {
        self.value().and_then(to_float)
    }

    /// Model or subcircuit name for model-bearing devices.
    pub fn model(&self) -> Option<&str> {
        match self.rule?.value {
            ValueSlot::Model => self.value.as_deref(),
            _ => None,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key)
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    fn editable_rule(&self) -> Result<PrefixRule> {
        self.rule.ok_or_else(|| {
            SpiceError::InvalidValue(format!(
                "'{}' has an unrecognized device prefix and cannot be edited",
                self.designator
            ))
        })
    }

    /// Replace the value. An aliased parameter that currently carries the
    /// value is updated in place.
    pub fn set_value(&mut self, value: impl ToSpiceValue) -> Result<()> {
        let rule = self.editable_rule()?;
        let text = value.to_spice_value();
        match rule.value {
            ValueSlot::Params => {
                return Err(SpiceError::InvalidValue(format!(
                    "'{}' takes no value, only parameters",
                    self.designator
                )))
            }
            ValueSlot::Numeric { alias: Some(key) } if self.value.is_none() => {
                let key = key.to_string();
                if self.params.contains(&key) {
                    self.params.insert(key, quote_value(&text));
                } else {
                    self.value = Some(quote_value(&text));
                }
            }
            ValueSlot::Source | ValueSlot::Rest => {
                self.value = Some(tokenize(&text).join(" "));
            }
            ValueSlot::Expression => {
                let text = match text.split_once('=') {
                    Some((key, expr)) => format!("{}={}", key.trim(), quote_value(expr)),
                    None => format!("V={}", quote_value(&text)),
                };
                self.value = Some(text);
            }
            _ => self.value = Some(quote_value(&text)),
        }
        self.dirty = true;
        Ok(())
    }

    /// Replace the model (or subcircuit) name.
    pub fn set_model(&mut self, model: &str) -> Result<()> {
        let rule = self.editable_rule()?;
        if rule.value != ValueSlot::Model {
            return Err(SpiceError::InvalidValue(format!(
                "'{}' does not reference a model",
                self.designator
            )));
        }
        self.value = Some(model.to_string());
        self.dirty = true;
        Ok(())
    }

    pub fn set_param(&mut self, key: &str, value: impl ToSpiceValue) -> Result<()> {
        self.editable_rule()?;
        if split_param(&format!("{}=x", key)).is_none() {
            return Err(SpiceError::InvalidValue(format!("'{}' is not a parameter name", key)));
        }
        self.params.insert(key, quote_value(&value.to_spice_value()));
        self.dirty = true;
        Ok(())
    }

    pub fn remove_param(&mut self, key: &str) -> Result<Option<String>> {
        self.editable_rule()?;
        let removed = self.params.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        Ok(removed)
    }

    pub fn set_nodes<S: AsRef<str>>(&mut self, nodes: &[S]) -> Result<()> {
        let rule = self.editable_rule()?;
        if nodes.len() < rule.min_nodes || nodes.len() > rule.max_nodes {
            return Err(SpiceError::InvalidValue(format!(
                "'{}' needs {}..={} nodes, got {}",
                self.designator,
                rule.min_nodes,
                rule.max_nodes,
                nodes.len()
            )));
        }
        self.nodes = nodes.iter().map(|n| n.as_ref().to_string()).collect();
        self.dirty = true;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    /// Text of the element, physical lines separated by `\n`.
    pub fn render(&self) -> String {
        match &self.source {
            Some(source) if !self.dirty => source.clone(),
            _ => self.render_canonical(),
        }
    }

    fn render_canonical(&self) -> String {
        let mut tokens: Vec<String> = Vec::with_capacity(self.nodes.len() + self.params.len() + 2);
        tokens.push(self.designator.clone());
        tokens.extend(self.nodes.iter().cloned());
        // Behavioral sources keep stray positional tokens ahead of the expression.
        if self.rule.is_some_and(|r| r.value == ValueSlot::Expression) {
            tokens.extend(self.extras.iter().cloned());
            tokens.extend(self.value.iter().cloned());
        } else {
            tokens.extend(self.value.iter().cloned());
            tokens.extend(self.extras.iter().cloned());
        }
        tokens.extend(self.params_marker.iter().cloned());
        tokens.extend(self.params.iter().map(|(k, v)| format!("{}={}", k, v)));
        tokens.extend(self.trailing.iter().cloned());

        let mut text = wrap_tokens(&tokens);
        if let Some(comment) = &self.comment {
            text.push(' ');
            text.push_str(comment);
        }
        text
    }
}

/// Field-wise equality; the remembered source text is not compared.
impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.designator == other.designator
            && self.rule == other.rule
            && self.nodes == other.nodes
            && self.value == other.value
            && self.extras == other.extras
            && self.params_marker == other.params_marker
            && self.params == other.params
            && self.trailing == other.trailing
            && self.comment == other.comment
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Join tokens with spaces, continuing on `+` lines past the line width.
fn wrap_tokens(tokens: &[String]) -> String {
    let mut text = String::new();
    let mut line_len = 0;
    for token in tokens {
        if line_len == 0 {
            text.push_str(token);
            line_len = token.len();
        } else if line_len + 1 + token.len() > MAX_LINE_WIDTH {
            text.push_str("\n+ ");
            text.push_str(token);
            line_len = 2 + token.len();
        } else {
            text.push(' ');
            text.push_str(token);
            line_len += 1 + token.len();
        }
    }
    text
}

// ============================================================================
// Parsing
// ============================================================================

impl PrefixRegistry {
    /// Parse one element, which may span `+` continuation lines.
    ///
    /// Fails with [`SpiceError::UnrecognizedFormat`] when the prefix has no
    /// registered rule.
    pub fn parse_element(&self, text: &str) -> Result<Element> {
        let logical = join_continuations(text);
        let (code, comment) = split_comment(&logical);
        let mut tokens = tokenize(code);
        if tokens.is_empty() {
            return Err(SpiceError::unrecognized(0, "empty element line"));
        }
        let designator = tokens.remove(0);
        let prefix = designator.chars().next().unwrap_or(' ');
        let rule = *self.lookup(prefix).ok_or_else(|| {
            SpiceError::unrecognized(0, format!("unknown device prefix '{}' in '{}'", prefix, designator))
        })?;

        let first_param = match rule.value {
            ValueSlot::Rest => tokens.len(),
            _ => tokens
                .iter()
                .position(|t| split_param(t).is_some())
                .unwrap_or(tokens.len()),
        };
        let tail = tokens.split_off(first_param);
        let mut positional = tokens;

        let mut params_marker = None;
        if positional
            .last()
            .is_some_and(|t| t.eq_ignore_ascii_case("params:"))
        {
            params_marker = positional.pop();
        }

        let node_count = match rule.value {
            _ if rule.has_fixed_nodes() => rule.min_nodes,
            ValueSlot::Model => positional.len().saturating_sub(1).clamp(rule.min_nodes, rule.max_nodes),
            _ => positional.len().clamp(rule.min_nodes, rule.max_nodes),
        }
        .min(positional.len());
        let rest = positional.split_off(node_count);
        let nodes = positional;

        let mut value = None;
        let mut extras = Vec::new();
        let mut tail = tail.into_iter().peekable();
        match rule.value {
            ValueSlot::Params => extras = rest,
            ValueSlot::Numeric { .. } | ValueSlot::Model => {
                let mut rest = rest.into_iter();
                value = rest.next();
                extras = rest.collect();
            }
            ValueSlot::Source | ValueSlot::Rest => {
                if !rest.is_empty() {
                    value = Some(rest.join(" "));
                }
            }
            ValueSlot::Expression => {
                extras = rest;
                value = tail.next_if(|t| {
                    split_param(t).is_some_and(|(k, _)| {
                        ["V", "I", "R", "P"].iter().any(|e| k.eq_ignore_ascii_case(e))
                    })
                });
            }
        }

        let mut params = Params::new();
        let mut trailing = Vec::new();
        for token in tail {
            match split_param(&token) {
                Some((k, v)) => {
                    params.insert(k, v);
                }
                None => trailing.push(token),
            }
        }

        Ok(Element {
            designator,
            rule: Some(rule),
            nodes,
            value,
            extras,
            params_marker,
            params,
            trailing,
            comment: comment.map(str::to_string),
            source: Some(text.to_string()),
            dirty: false,
        })
    }

    /// Parse, falling back to opaque storage for unknown prefixes.
    pub fn parse_element_or_opaque(&self, text: &str) -> Element {
        self.parse_element(text)
            .unwrap_or_else(|_| Element::opaque(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reparse(element: &Element) -> Element {
        Element::parse(&element.render()).unwrap()
    }

    #[test]
    fn test_value_held_by_alias_param() {
        let e = Element::parse("R2 NC_41 NC_42 R=2k5R").unwrap();
        assert_eq!(e.nodes(), ["NC_41", "NC_42"]);
        assert_eq!(e.value_field(), None);
        assert_eq!(e.params().get("R"), Some("2k5R"));
        assert_eq!(e.value(), Some("2k5R"));
        assert_eq!(e.value_f64(), Some(2500.0));
    }

    #[test]
    fn test_alias_param_updated_in_place() {
        let mut e = Element::parse("R2 a b R=2k5R tc=1,2").unwrap();
        e.set_value(4700.0).unwrap();
        assert_eq!(e.render(), "R2 a b R=4.7k tc=1,2");
        assert_eq!(e.value_field(), None);
    }

    #[test]
    fn test_untouched_element_renders_verbatim() {
        let text = "R1   in  out   10k   ; feedback";
        let e = Element::parse(text).unwrap();
        assert_eq!(e.render(), text);
        assert_eq!(e.comment(), Some("; feedback"));
    }

    #[test]
    fn test_setter_then_reparse_is_equal() {
        let mut e = Element::parse("C1 a b 10p Rser=1m").unwrap();
        e.set_value("22p").unwrap();
        e.set_param("Lser", "1n").unwrap();
        assert_eq!(e.render(), "C1 a b 22p Rser=1m Lser=1n");
        assert_eq!(reparse(&e), e);
    }

    #[test]
    fn test_source_value() {
        let e = Element::parse("V1 in 0 PULSE(0 1 0 1n 1n 5u 10u) AC 1 Rser=3").unwrap();
        assert_eq!(e.value(), Some("PULSE(0 1 0 1n 1n 5u 10u) AC 1"));
        assert_eq!(e.param("rser"), Some("3"));
    }

    #[test]
    fn test_mosfet_node_count() {
        let m4 = Element::parse("M1 d g s b NMOS L=1u W=10u").unwrap();
        assert_eq!(m4.nodes().len(), 4);
        assert_eq!(m4.model(), Some("NMOS"));
        let m3 = Element::parse("M2 d g s PMOS").unwrap();
        assert_eq!(m3.nodes(), ["d", "g", "s"]);
        assert_eq!(m3.model(), Some("PMOS"));
    }

    #[test]
    fn test_subcircuit_instance() {
        let e = Element::parse("X1 in out vcc 0 opamp params: gain=10").unwrap();
        assert!(e.is_instance());
        assert_eq!(e.nodes().len(), 4);
        assert_eq!(e.model(), Some("opamp"));
        assert_eq!(e.param("GAIN"), Some("10"));
        let mut e = e;
        e.set_param("gain", 20).unwrap();
        assert_eq!(e.render(), "X1 in out vcc 0 opamp params: gain=20");
        assert_eq!(reparse(&e), e);
    }

    #[test]
    fn test_behavioral_source() {
        let e = Element::parse("B1 out 0 V=V(in)*2 ic=0").unwrap();
        assert_eq!(e.value(), Some("V=V(in)*2"));
        assert_eq!(e.param("ic"), Some("0"));
    }

    #[test]
    fn test_controlled_source_keeps_rest() {
        let e = Element::parse("E1 out 0 in 0 10").unwrap();
        assert_eq!(e.nodes(), ["out", "0"]);
        assert_eq!(e.value(), Some("in 0 10"));
    }

    #[test]
    fn test_values_with_spaces_are_braced() {
        let mut e = Element::parse("R1 a b 1k").unwrap();
        e.set_value("Rbase * 2").unwrap();
        assert_eq!(e.render(), "R1 a b {Rbase * 2}");
        assert_eq!(reparse(&e), e);
    }

    #[test]
    fn test_unknown_prefix() {
        let err = Element::parse("¤1 a b c model").unwrap_err();
        assert!(matches!(err, SpiceError::UnrecognizedFormat { .. }));

        let e = PrefixRegistry::shared().parse_element_or_opaque("¤1 a b c x=1");
        assert!(e.is_opaque());
        assert_eq!(e.name(), "¤1");
        assert_eq!(e.nodes(), ["a", "b", "c"]);
        assert_eq!(e.render(), "¤1 a b c x=1");

        let mut e = e;
        assert!(e.set_value("1").is_err());
    }

    #[test]
    fn test_continuation_lines() {
        let text = "X1 a b\n+ sub\n+ R=1";
        let e = Element::parse(text).unwrap();
        assert_eq!(e.model(), Some("sub"));
        assert_eq!(e.render(), text);
    }

    #[test]
    fn test_long_lines_wrap() {
        let mut e = Element::parse("X1 n1 n2 n3 n4 n5 n6 n7 n8 bigsub").unwrap();
        for i in 0..10 {
            e.set_param(&format!("param{}", i), "12345").unwrap();
        }
        let text = e.render();
        assert!(text.lines().count() > 1);
        assert!(text.lines().all(|l| l.len() <= MAX_LINE_WIDTH));
        assert!(text.lines().skip(1).all(|l| l.starts_with("+ ")));
        assert_eq!(reparse(&e), e);
    }

    #[test]
    fn test_new_element() {
        let e = Element::new("R5", &["a", "0"], Some("1k")).unwrap();
        assert!(e.is_dirty());
        assert_eq!(e.render(), "R5 a 0 1k");
        assert!(Element::new("R5", &["a", "b", "c"], Some("1k")).is_err());

        let v = Element::new("V1", &["in", "0"], Some("SINE(0 1 1k) AC 1")).unwrap();
        assert_eq!(v.render(), "V1 in 0 SINE(0 1 1k) AC 1");
    }

    #[test]
    fn test_set_nodes_checks_count() {
        let mut e = Element::parse("R1 a b 1k").unwrap();
        assert!(e.set_nodes(&["a"]).is_err());
        e.set_nodes(&["x", "y"]).unwrap();
        assert_eq!(e.render(), "R1 x y 1k");
    }
}

//! Device prefix registry
//!
//! The first character of an element name selects a [`PrefixRule`] that says
//! how many nodes follow and how the rest of the line is read. Callers can
//! register rules for prefixes the standard table does not know.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::debug;

/// How the tokens after the nodes are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSlot {
    /// Only `key=value` parameters follow (transmission lines).
    Params,
    /// One value token. `alias` is the parameter that may carry the value
    /// instead (`R1 a b R=2k`).
    Numeric { alias: Option<char> },
    /// Model or subcircuit name. With a variable node count the last
    /// positional token is the model.
    Model,
    /// Source description: every positional token up to the first
    /// parameter (`PULSE(0 1 0 1n 1n 5u 10u) AC 1`).
    Source,
    /// Everything after the nodes is one opaque value (controlled sources).
    Rest,
    /// Behavioral expression given as `V=...`, `I=...` or `R=...`.
    Expression,
}

/// Grammar for one device prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixRule {
    pub min_nodes: usize,
    pub max_nodes: usize,
    pub value: ValueSlot,
}

impl PrefixRule {
    pub const fn fixed(nodes: usize, value: ValueSlot) -> Self {
        Self {
            min_nodes: nodes,
            max_nodes: nodes,
            value,
        }
    }

    pub const fn ranged(min_nodes: usize, max_nodes: usize, value: ValueSlot) -> Self {
        Self {
            min_nodes,
            max_nodes,
            value,
        }
    }

    pub fn has_fixed_nodes(&self) -> bool {
        self.min_nodes == self.max_nodes
    }
}

/// Lookup table from prefix character to [`PrefixRule`]
///
/// Prefixes are matched case-insensitively for ASCII letters; any other
/// character is matched exactly.
#[derive(Debug, Clone, Default)]
pub struct PrefixRegistry {
    rules: HashMap<char, PrefixRule>,
}

impl PrefixRegistry {
    /// Empty registry. Every element parsed through it falls back to opaque storage.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the SPICE and LTspice device letters.
    pub fn standard() -> Self {
        use ValueSlot::*;
        let mut registry = Self::empty();
        registry.register('A', PrefixRule::ranged(1, 8, Model));
        registry.register('B', PrefixRule::fixed(2, Expression));
        registry.register('C', PrefixRule::fixed(2, Numeric { alias: Some('C') }));
        registry.register('D', PrefixRule::fixed(2, Model));
        for prefix in ['E', 'F', 'G', 'H'] {
            registry.register(prefix, PrefixRule::fixed(2, Rest));
        }
        registry.register('I', PrefixRule::fixed(2, Source));
        registry.register('J', PrefixRule::fixed(3, Model));
        registry.register('K', PrefixRule::ranged(2, 99, Model));
        registry.register('L', PrefixRule::fixed(2, Numeric { alias: Some('L') }));
        registry.register('M', PrefixRule::ranged(3, 4, Model));
        // Verilog-A devices and coupled multiconductor lines
        registry.register('N', PrefixRule::ranged(2, 99, Model));
        registry.register('O', PrefixRule::fixed(4, Model));
        registry.register('P', PrefixRule::ranged(2, 99, Model));
        registry.register('Q', PrefixRule::ranged(3, 5, Model));
        registry.register('R', PrefixRule::fixed(2, Numeric { alias: Some('R') }));
        registry.register('S', PrefixRule::fixed(4, Model));
        registry.register('T', PrefixRule::fixed(4, Params));
        registry.register('U', PrefixRule::ranged(2, 99, Model));
        registry.register('V', PrefixRule::fixed(2, Source));
        registry.register('W', PrefixRule::fixed(2, Rest));
        registry.register('X', PrefixRule::ranged(1, 99, Model));
        registry.register('Y', PrefixRule::ranged(2, 4, Model));
        registry.register('Z', PrefixRule::fixed(3, Model));

        // QSPICE devices. Unused behavioral pins are written as `¥`.
        registry.register('Ã', PrefixRule::fixed(16, Model));
        registry.register('¥', PrefixRule::fixed(16, Model));
        registry.register('€', PrefixRule::fixed(32, Model));
        registry.register('£', PrefixRule::fixed(64, Model));
        // `«...»` node lists tokenize as a single node.
        registry.register('Ø', PrefixRule::ranged(1, 99, Model));
        registry.register('×', PrefixRule::ranged(1, 100, Params));

        // LTspice specialised OTA
        registry.register('Ö', PrefixRule::fixed(5, Model));
        registry
    }

    /// Shared instance of [`PrefixRegistry::standard`].
    pub fn shared() -> &'static PrefixRegistry {
        static SHARED: OnceLock<PrefixRegistry> = OnceLock::new();
        SHARED.get_or_init(PrefixRegistry::standard)
    }

    /// Add or replace the rule for a prefix.
    pub fn register(&mut self, prefix: char, rule: PrefixRule) {
        if self.rules.insert(normalize(prefix), rule).is_some() {
            debug!(%prefix, "Prefix rule replaced");
        }
    }

    pub fn lookup(&self, prefix: char) -> Option<&PrefixRule> {
        self.rules.get(&normalize(prefix))
    }

    pub fn contains(&self, prefix: char) -> bool {
        self.rules.contains_key(&normalize(prefix))
    }
}

#[inline]
fn normalize(prefix: char) -> char {
    prefix.to_ascii_uppercase()
}

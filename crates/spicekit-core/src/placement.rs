//! Where LTspice symbols keep their value and parameters
//!
//! A schematic symbol stores its value in one of a few `SYMATTR` slots, and
//! which slot depends on the symbol. This table is plain data: the standard
//! entries cover the stock LTspice components and callers can add their own.

use std::collections::HashMap;

/// `SYMATTR` slots that can carry a value or a `key=value` list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeSlot {
    Value,
    Value2,
    SpiceModel,
    SpiceLine,
    SpiceLine2,
}

impl AttributeSlot {
    pub const ALL: [AttributeSlot; 5] = [
        AttributeSlot::Value,
        AttributeSlot::Value2,
        AttributeSlot::SpiceModel,
        AttributeSlot::SpiceLine,
        AttributeSlot::SpiceLine2,
    ];

    /// Attribute name as written after `SYMATTR`.
    pub fn attribute(self) -> &'static str {
        match self {
            AttributeSlot::Value => "Value",
            AttributeSlot::Value2 => "Value2",
            AttributeSlot::SpiceModel => "SpiceModel",
            AttributeSlot::SpiceLine => "SpiceLine",
            AttributeSlot::SpiceLine2 => "SpiceLine2",
        }
    }

    pub fn from_attribute(name: &str) -> Option<AttributeSlot> {
        Self::ALL
            .into_iter()
            .find(|slot| slot.attribute().eq_ignore_ascii_case(name))
    }
}

/// Value and parameter slots of one symbol type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub value: Option<AttributeSlot>,
    pub params: Option<AttributeSlot>,
}

impl Placement {
    pub const fn new(value: Option<AttributeSlot>, params: Option<AttributeSlot>) -> Self {
        Self { value, params }
    }
}

/// Placement lookup by symbol name, with a fallback by device prefix
#[derive(Debug, Clone, Default)]
pub struct PlacementTable {
    by_symbol: HashMap<String, Placement>,
    by_prefix: HashMap<char, Placement>,
}

impl PlacementTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Entries for the stock LTspice symbols.
    pub fn standard() -> Self {
        use AttributeSlot::*;
        let passive = Placement::new(Some(Value), Some(SpiceLine));
        let model_only = Placement::new(Some(Value), None);
        let mos = Placement::new(Some(Value), Some(Value2));

        let mut table = Self::empty();
        for symbol in ["res", "res2", "cap", "polcap", "ind", "ind2", "voltage", "current", "bv", "bi", "bi2"] {
            table.insert_symbol(symbol, passive);
        }
        for symbol in ["diode", "zener", "schottky", "led", "varactor", "npn", "pnp", "npn2", "pnp2", "njf", "pjf"] {
            table.insert_symbol(symbol, passive);
        }
        for symbol in ["nmos", "pmos", "nmos4", "pmos4"] {
            table.insert_symbol(symbol, mos);
        }
        for symbol in ["e", "e2", "f", "g", "g2", "h", "sw", "csw", "tline", "ltline"] {
            table.insert_symbol(symbol, model_only);
        }

        for prefix in ['R', 'C', 'L', 'V', 'I', 'B', 'D', 'Q', 'J', 'X'] {
            table.insert_prefix(prefix, passive);
        }
        table.insert_prefix('M', mos);
        for prefix in ['E', 'F', 'G', 'H', 'S', 'W', 'T', 'O'] {
            table.insert_prefix(prefix, model_only);
        }
        table
    }

    pub fn insert_symbol(&mut self, symbol: &str, placement: Placement) {
        self.by_symbol.insert(symbol.to_ascii_lowercase(), placement);
    }

    pub fn insert_prefix(&mut self, prefix: char, placement: Placement) {
        self.by_prefix.insert(prefix.to_ascii_uppercase(), placement);
    }

    /// Lookup by full symbol name, then by its last path component
    /// (`Misc\\battery` also matches `battery`).
    pub fn for_symbol(&self, symbol: &str) -> Option<&Placement> {
        let key = symbol.to_ascii_lowercase();
        self.by_symbol.get(&key).or_else(|| {
            let short = key.rsplit(['\\', '/']).next()?;
            self.by_symbol.get(short)
        })
    }

    pub fn for_prefix(&self, prefix: char) -> Option<&Placement> {
        self.by_prefix.get(&prefix.to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_lookup() {
        let table = PlacementTable::standard();
        let res = table.for_symbol("RES").unwrap();
        assert_eq!(res.value, Some(AttributeSlot::Value));
        assert_eq!(res.params, Some(AttributeSlot::SpiceLine));
        assert_eq!(table.for_symbol("nmos4").unwrap().params, Some(AttributeSlot::Value2));
        assert!(table.for_symbol("Misc\\cap").is_some());
        assert!(table.for_symbol("Opamps\\LT1001").is_none());
    }

    #[test]
    fn test_prefix_fallback_and_custom_entries() {
        let mut table = PlacementTable::empty();
        assert!(table.for_prefix('x').is_none());
        table.insert_prefix('x', Placement::new(None, Some(AttributeSlot::SpiceLine2)));
        assert_eq!(table.for_prefix('X').unwrap().params, Some(AttributeSlot::SpiceLine2));
    }

    #[test]
    fn test_slot_names() {
        assert_eq!(AttributeSlot::from_attribute("spiceline"), Some(AttributeSlot::SpiceLine));
        assert_eq!(AttributeSlot::from_attribute("VALUE2"), Some(AttributeSlot::Value2));
        assert_eq!(AttributeSlot::from_attribute("InstName"), None);
    }
}

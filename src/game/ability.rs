//! Ability Registry
//!
//! Every team member gets exactly one traversal ability, handed out
//! first-come-first-served in catalog order. The catalog size caps the
//! team size.

use serde::{Serialize, Deserialize};

/// Traversal ability kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbilityKind {
    /// Walk through rectangles tagged as walls for a short time.
    PhaseWalker,
    /// Burst of fixed horizontal speed that ignores input.
    DashSprinter,
    /// Invert gravity and walk on the ceiling.
    CeilingWalker,
}

impl AbilityKind {
    /// All kinds in catalog order.
    pub const ALL: [AbilityKind; 3] = [
        AbilityKind::PhaseWalker,
        AbilityKind::DashSprinter,
        AbilityKind::CeilingWalker,
    ];

    /// Stable wire identifier.
    pub fn id(self) -> &'static str {
        match self {
            AbilityKind::PhaseWalker => "phase-walker",
            AbilityKind::DashSprinter => "dash-sprinter",
            AbilityKind::CeilingWalker => "ceiling-walker",
        }
    }
}

/// Catalog entry describing one ability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityDef {
    /// Stable identifier
    pub id: AbilityKind,
    /// Human-readable name
    pub name: String,
    /// Short description shown in the lobby
    pub description: String,
    /// Display color (CSS hex)
    pub color: String,
}

impl AbilityDef {
    fn new(id: AbilityKind, name: &str, description: &str, color: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            color: color.to_string(),
        }
    }
}

/// Fixed, ordered ability catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct AbilityCatalog {
    entries: Vec<AbilityDef>,
}

impl Default for AbilityCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl AbilityCatalog {
    /// The three-ability catalog the game ships with.
    pub fn standard() -> Self {
        Self {
            entries: AbilityKind::ALL.into_iter().map(standard_entry).collect(),
        }
    }

    /// Build a catalog from explicit entries. Duplicate kinds are dropped,
    /// keeping the first occurrence.
    pub fn from_entries(entries: Vec<AbilityDef>) -> Self {
        let mut unique: Vec<AbilityDef> = Vec::with_capacity(entries.len());
        for entry in entries {
            if !unique.iter().any(|e| e.id == entry.id) {
                unique.push(entry);
            }
        }
        Self { entries: unique }
    }

    /// Number of abilities, which is also the required team size.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in catalog order.
    pub fn entries(&self) -> &[AbilityDef] {
        &self.entries
    }

    /// Look up an entry by kind.
    pub fn get(&self, kind: AbilityKind) -> Option<&AbilityDef> {
        self.entries.iter().find(|e| e.id == kind)
    }

    /// Catalog position of a kind.
    pub fn index_of(&self, kind: AbilityKind) -> Option<usize> {
        self.entries.iter().position(|e| e.id == kind)
    }

    /// First entry whose kind is not in `taken`, or `None` when every
    /// ability is held.
    pub fn next_available<I>(&self, taken: I) -> Option<&AbilityDef>
    where
        I: IntoIterator<Item = AbilityKind>,
    {
        let taken: Vec<AbilityKind> = taken.into_iter().collect();
        self.entries.iter().find(|e| !taken.contains(&e.id))
    }
}

fn standard_entry(kind: AbilityKind) -> AbilityDef {
    match kind {
        AbilityKind::PhaseWalker => AbilityDef::new(
            kind,
            "Phase Walker",
            "Slip through marked walls for a moment.",
            "#f06292",
        ),
        AbilityKind::DashSprinter => AbilityDef::new(
            kind,
            "Dash Sprinter",
            "Burst forward through obstacles.",
            "#64ffda",
        ),
        AbilityKind::CeilingWalker => AbilityDef::new(
            kind,
            "Ceiling Walker",
            "Flip gravity and run along the ceiling.",
            "#7986cb",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_serde_uses_wire_ids() {
        let json = serde_json::to_string(&AbilityKind::CeilingWalker).unwrap();
        assert_eq!(json, "\"ceiling-walker\"");
    }

    #[test]
    fn test_next_available_in_catalog_order() {
        let catalog = AbilityCatalog::standard();

        let first = catalog.next_available([]).unwrap();
        assert_eq!(first.id, AbilityKind::PhaseWalker);

        let second = catalog.next_available([AbilityKind::PhaseWalker]).unwrap();
        assert_eq!(second.id, AbilityKind::DashSprinter);

        // Released abilities are handed out again before later ones
        let refill = catalog.next_available([AbilityKind::DashSprinter]).unwrap();
        assert_eq!(refill.id, AbilityKind::PhaseWalker);

        assert!(catalog.next_available(AbilityKind::ALL).is_none());
    }

    #[test]
    fn test_index_of() {
        let catalog = AbilityCatalog::standard();
        assert_eq!(catalog.index_of(AbilityKind::PhaseWalker), Some(0));
        assert_eq!(catalog.index_of(AbilityKind::CeilingWalker), Some(2));
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_from_entries_drops_duplicates() {
        let standard = AbilityCatalog::standard();
        let mut entries = standard.entries().to_vec();
        entries.push(entries[0].clone());

        let catalog = AbilityCatalog::from_entries(entries);
        assert_eq!(catalog.len(), 3);
    }

    proptest! {
        #[test]
        fn prop_sequential_assignment_is_distinct(count in 0usize..6) {
            let catalog = AbilityCatalog::standard();
            let mut held: Vec<AbilityKind> = Vec::new();

            for _ in 0..count {
                match catalog.next_available(held.iter().copied()) {
                    Some(def) => {
                        prop_assert!(!held.contains(&def.id));
                        held.push(def.id);
                    }
                    None => prop_assert_eq!(held.len(), catalog.len()),
                }
            }
            prop_assert!(held.len() <= catalog.len());
        }
    }
}

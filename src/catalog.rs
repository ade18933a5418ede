//! The shortcut catalog: single source of truth for every known binding.
//!
//! Records are partitioned by [`Scope`] and deduplicated per
//! `(combo, scope)` pair. Vec storage keeps insertion order deterministic
//! for presentation; a HashSet index keeps the dedup check O(1).

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Where a shortcut binding originates.
#[derive(Debug, Clone, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Scope {
    /// OS-level bindings: user key-equivalents and stock system shortcuts.
    System,
    /// Bindings declared by one running application.
    Application { pid: i32, name: String },
}

impl Scope {
    pub fn application(pid: i32, name: impl Into<String>) -> Self {
        Scope::Application {
            pid,
            name: name.into(),
        }
    }

    /// Display title for presentation.
    pub fn title(&self) -> &str {
        match self {
            Scope::System => "Global (System)",
            Scope::Application { name, .. } => name,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Scope::System)
    }
}

// Two Application scopes are the same partition iff their pids match; the
// display name is carried along but not identity.
impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scope::System, Scope::System) => true,
            (Scope::Application { pid: a, .. }, Scope::Application { pid: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl std::hash::Hash for Scope {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Scope::System => 0i32.hash(state),
            Scope::Application { pid, .. } => {
                1i32.hash(state);
                pid.hash(state);
            }
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title())
    }
}

/// One known shortcut binding. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShortcutRecord {
    pub id: Uuid,
    pub combo: String,
    pub scope: Scope,
}

impl ShortcutRecord {
    fn new(combo: String, scope: Scope) -> Self {
        Self {
            id: Uuid::new_v4(),
            combo,
            scope,
        }
    }
}

/// Mutation messages carried from capture threads to the state thread.
/// Payloads are immutable values only; no shared references cross threads.
#[derive(Debug, Clone)]
pub enum CatalogMessage {
    Insert { combo: String, scope: Scope },
    ReplaceScope { scope: Scope, combos: Vec<String> },
    Shutdown,
}

/// Deduplicating, scope-partitioned store of shortcut records.
#[derive(Debug, Default)]
pub struct ShortcutCatalog {
    records: Vec<ShortcutRecord>,
    index: HashSet<(String, Scope)>,
}

impl ShortcutCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one record unless an identical `(combo, scope)` pair already
    /// exists. Never reports an error; returns whether a record was added.
    pub fn insert(&mut self, combo: impl Into<String>, scope: Scope) -> bool {
        let combo = combo.into();
        if !self.index.insert((combo.clone(), scope.clone())) {
            return false;
        }
        self.records.push(ShortcutRecord::new(combo, scope));
        true
    }

    /// Atomically replace every record of `scope` with `combos`. The new set
    /// is built first, then swapped in, so readers see either the old set or
    /// the new set and nothing in between. Duplicates within `combos`
    /// collapse to one record.
    pub fn replace_scope(&mut self, scope: Scope, combos: Vec<String>) {
        let mut fresh: Vec<ShortcutRecord> = Vec::with_capacity(combos.len());
        let mut seen: HashSet<String> = HashSet::with_capacity(combos.len());
        for combo in combos {
            if seen.insert(combo.clone()) {
                fresh.push(ShortcutRecord::new(combo, scope.clone()));
            }
        }

        self.index.retain(|(_, s)| *s != scope);
        self.records.retain(|r| r.scope != scope);
        for record in &fresh {
            self.index.insert((record.combo.clone(), scope.clone()));
        }
        self.records.extend(fresh);
    }

    /// Whether `combo` is bound in `scope`, or anywhere when `scope` is None.
    pub fn contains(&self, combo: &str, scope: Option<&Scope>) -> bool {
        match scope {
            Some(s) => self.index.contains(&(combo.to_string(), s.clone())),
            None => self.records.iter().any(|r| r.combo == combo),
        }
    }

    /// Ordered (insertion-order) view of all records. Sorting is the
    /// consumer's business.
    pub fn records(&self) -> &[ShortcutRecord] {
        &self.records
    }

    /// Apply one mutation message. `Shutdown` is the state loop's business
    /// and is ignored here.
    pub fn apply(&mut self, message: CatalogMessage) {
        match message {
            CatalogMessage::Insert { combo, scope } => {
                self.insert(combo, scope);
            }
            CatalogMessage::ReplaceScope { scope, combos } => {
                self.replace_scope(scope, combos);
            }
            CatalogMessage::Shutdown => {}
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

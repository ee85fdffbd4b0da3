//! Process-wide interned strings for resource-type and subsystem names.
//!
//! Type and subsystem names repeat across every vertex of the resource graph
//! and across every jobspec, so they are stored once in a process-wide table
//! and passed around as copyable handles. The tables can be finalized after
//! graph load to prevent runtime growth.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

struct SymbolTable {
    by_name: HashMap<&'static str, u32>,
    names: Vec<&'static str>,
    finalized: bool,
}

impl SymbolTable {
    fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            names: Vec::new(),
            finalized: false,
        }
    }

    fn intern(&mut self, name: &str) -> u32 {
        if let Some(&sym) = self.by_name.get(name) {
            return sym;
        }
        // Interned names live for the whole process; the table is bounded by
        // the set of distinct type/subsystem names seen during load.
        let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let sym = self.names.len() as u32;
        self.names.push(leaked);
        self.by_name.insert(leaked, sym);
        sym
    }

    fn resolve(&self, sym: u32) -> &'static str {
        self.names[sym as usize]
    }
}

fn type_table() -> &'static Mutex<SymbolTable> {
    static TABLE: OnceLock<Mutex<SymbolTable>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(SymbolTable::new()))
}

fn subsystem_table() -> &'static Mutex<SymbolTable> {
    static TABLE: OnceLock<Mutex<SymbolTable>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(SymbolTable::new()))
}

fn relation_table() -> &'static Mutex<SymbolTable> {
    static TABLE: OnceLock<Mutex<SymbolTable>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(SymbolTable::new()))
}

/// Marks both interner tables immutable. Interning a name that is not
/// already present afterwards still succeeds (matching requests must be able
/// to name unknown types so the walk can reject them), but the intent is
/// that all names are registered during graph load.
pub fn finalize() {
    type_table().lock().expect("interner poisoned").finalized = true;
    subsystem_table().lock().expect("interner poisoned").finalized = true;
}

macro_rules! interned_handle {
    ($name:ident, $table:ident, $expecting:literal) => {
        /// Copyable handle to an interned name.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub fn intern(name: &str) -> Self {
                Self($table().lock().expect("interner poisoned").intern(name))
            }

            pub fn as_str(&self) -> &'static str {
                $table().lock().expect("interner poisoned").resolve(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.as_str())
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self::intern(name)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                if s.is_empty() {
                    return Err(D::Error::custom(concat!("empty ", $expecting)));
                }
                Ok(Self::intern(&s))
            }
        }
    };
}

interned_handle!(ResourceType, type_table, "resource type name");
interned_handle!(Subsystem, subsystem_table, "subsystem name");
interned_handle!(Relation, relation_table, "relation name");

impl ResourceType {
    /// The pseudo-type used by request slots. Slots group a shape; they never
    /// name a concrete pool.
    pub fn slot() -> Self {
        Self::intern("slot")
    }

    pub fn node() -> Self {
        Self::intern("node")
    }

    pub fn core() -> Self {
        Self::intern("core")
    }

    pub fn gpu() -> Self {
        Self::intern("gpu")
    }

    pub fn is_slot(&self) -> bool {
        *self == Self::slot()
    }
}

impl Subsystem {
    /// The default dominant hierarchy.
    pub fn containment() -> Self {
        Self::intern("containment")
    }
}

impl Relation {
    /// Forward containment relation (parent to child).
    pub fn contains() -> Self {
        Self::intern("contains")
    }

    /// Reverse containment relation (child to parent).
    pub fn within() -> Self {
        Self::intern("in")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let a = ResourceType::intern("memory");
        let b = ResourceType::intern("memory");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "memory");
    }

    #[test]
    fn distinct_names_distinct_handles() {
        assert_ne!(ResourceType::intern("socket"), ResourceType::intern("rack"));
    }

    #[test]
    fn type_and_subsystem_tables_are_independent() {
        let t = ResourceType::intern("power");
        let s = Subsystem::intern("power");
        assert_eq!(t.as_str(), s.as_str());
    }

    #[test]
    fn slot_pseudo_type() {
        assert!(ResourceType::slot().is_slot());
        assert!(!ResourceType::node().is_slot());
    }

    #[test]
    fn serde_round_trip() {
        let t = ResourceType::intern("core");
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"core\"");
        let back: ResourceType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}

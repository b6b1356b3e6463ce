use std::collections::HashMap;

use strvct_types::Record;
use tracing::warn;

use crate::blob::BlobObject;
use crate::node::StorableNode;
use crate::storable::Storable;

/// Builds a bare, unpopulated instance of one type.
pub type Constructor = fn() -> Box<dyn Storable>;

struct Entry {
    construct: Constructor,
    storable: bool,
}

/// Type name to constructor map used when loading records.
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<String, Entry>,
}

fn construct<T: Storable + Default>() -> Box<dyn Storable> {
    Box::new(T::default())
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with [`BlobObject`] and [`StorableNode`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register::<BlobObject>();
        registry.register::<StorableNode>();
        registry
    }

    /// Register `T` under its own type name. Returns the name.
    pub fn register<T: Storable + Default>(&mut self) -> &'static str {
        let name = T::default().type_name();
        self.register_with(name, construct::<T>);
        name
    }

    /// Register an explicit constructor under `name`.
    pub fn register_with(&mut self, name: impl Into<String>, construct: Constructor) {
        self.types.insert(
            name.into(),
            Entry {
                construct,
                storable: true,
            },
        );
    }

    /// Mark a registered type storable or not. Records of a non-storable
    /// type are skipped on load. Returns false for unknown types.
    pub fn set_storable(&mut self, name: &str, storable: bool) -> bool {
        match self.types.get_mut(name) {
            Some(entry) => {
                entry.storable = storable;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn is_storable(&self, name: &str) -> bool {
        self.types.get(name).is_some_and(|entry| entry.storable)
    }

    /// Bare instance for `record`'s type, slots not yet loaded.
    ///
    /// Stale records (unknown or non-storable type) log a warning and
    /// yield `None`.
    pub fn instance_from_record(&self, record: &Record) -> Option<Box<dyn Storable>> {
        let name = record.type_name();
        match self.types.get(name) {
            Some(entry) if entry.storable => Some((entry.construct)()),
            Some(_) => {
                warn!(type_name = name, "record type is not storable; skipping");
                None
            }
            None => {
                warn!(type_name = name, "no registered type for record; skipping");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

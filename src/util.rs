//! Miscellaneous helper types shared across the crate.

use std::any::{self, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A [`TypeId`] paired with the type name.
///
/// Ordering uses the type name first so that
/// any iteration order derived from this key is stable across runs and platforms,
/// unlike the ordering of raw [`TypeId`] values.
#[derive(Debug, Clone, Copy)]
pub struct DbgTypeId {
    id:   TypeId,
    name: &'static str,
}

impl DbgTypeId {
    /// Creates the key for a type.
    pub fn of<T: 'static>() -> Self {
        Self { id: TypeId::of::<T>(), name: any::type_name::<T>() }
    }

    /// The full path of the type.
    pub fn name(&self) -> &'static str { self.name }

    /// The last path segment of the type name, used for display.
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for DbgTypeId {
    fn eq(&self, other: &Self) -> bool { self.id == other.id }
}

impl Eq for DbgTypeId {}

impl PartialOrd for DbgTypeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for DbgTypeId {
    fn cmp(&self, other: &Self) -> Ordering {
        // compare the id as well in case two distinct types render the same name
        self.name.cmp(other.name).then_with(|| self.id.cmp(&other.id))
    }
}

impl Hash for DbgTypeId {
    fn hash<H: Hasher>(&self, state: &mut H) { self.id.hash(state); }
}

impl fmt::Display for DbgTypeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { f.write_str(self.short_name()) }
}

//! Name-keyed registries for controllers and policies.
//!
//! Entries are addressed by dotted paths (`user.create`, `admin.UserController`).
//! Namespaces are nothing more than path prefixes, which lets an application
//! register everything under `test.` and have resource policies such as
//! `test.user.create` found by name.

use std::collections::BTreeMap;

/// A registry mapping dotted paths to values.
///
/// Registries are filled while the application loads and are read-only
/// once handed to the [`RouterBuilder`](crate::RouterBuilder).
///
/// # Examples
///
/// ```
/// use blueprint::Registry;
///
/// let mut registry: Registry<u32> = Registry::new();
/// registry.insert("user.create", 1);
/// registry.scope("test").insert("user.create", 2);
///
/// assert_eq!(registry.get("user.create"), Some(&1));
/// assert_eq!(registry.get("test.user.create"), Some(&2));
/// ```
#[derive(Debug, Clone)]
pub struct Registry<T> {
    entries: BTreeMap<String, T>,
}

impl<T> Registry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Inserts `value` at `path`, replacing any previous entry.
    pub fn insert(&mut self, path: impl Into<String>, value: T) -> &mut Self {
        let path = normalize(&path.into());
        if self.entries.insert(path.clone(), value).is_some() {
            tracing::debug!(path = %path, "registry entry replaced");
        }
        self
    }

    /// Returns a view that inserts under `namespace.`.
    pub fn scope(&mut self, namespace: &str) -> Scope<'_, T> {
        Scope {
            registry: self,
            prefix: normalize(namespace),
        }
    }

    /// Looks up the value at `path`.
    pub fn get(&self, path: &str) -> Option<&T> {
        self.entries.get(normalize(path).as_str())
    }

    /// Returns true if `path` is registered.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Returns every registered path in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Insertion view of a [`Registry`] under a namespace prefix.
pub struct Scope<'a, T> {
    registry: &'a mut Registry<T>,
    prefix: String,
}

impl<T> Scope<'_, T> {
    /// Inserts `value` at `namespace.path`.
    pub fn insert(&mut self, path: &str, value: T) -> &mut Self {
        let full = join(&self.prefix, path);
        self.registry.insert(full, value);
        self
    }

    /// Narrows the scope further.
    pub fn scope(&mut self, namespace: &str) -> Scope<'_, T> {
        Scope {
            prefix: join(&self.prefix, namespace),
            registry: self.registry,
        }
    }
}

/// Joins two dotted paths, skipping empty parts.
pub(crate) fn join(prefix: &str, path: &str) -> String {
    normalize(&format!("{}.{}", prefix, path))
}

fn normalize(path: &str) -> String {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

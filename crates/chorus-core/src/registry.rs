//! Name-keyed lookup of capability implementations, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ChorusError;

/// Registry of trait objects keyed by backend or provider name.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    entries: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> Registry<T> {
    /// Create an empty registry. `kind` names the capability in errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Register an implementation, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, entry: Arc<T>) {
        self.entries.insert(name.into(), entry);
    }

    /// Look up by name. Unknown names are a hard failure for the caller.
    pub fn get(&self, name: &str) -> Result<Arc<T>, ChorusError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| ChorusError::UnknownBackend(format!("{} {name}", self.kind)))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<T>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ?Sized> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            entries: self.entries.clone(),
        }
    }
}

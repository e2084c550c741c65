//! Shader Defines
//!
//! A define set selects one permutation of a program. Keys and values are
//! interned [`Symbol`]s kept sorted by key, so two sets with the same content
//! always hash the same regardless of insertion order.
//!
//! ```rust,ignore
//! use resident::shader::ShaderDefines;
//!
//! let defines = ShaderDefines::new()
//!     .with("USE_SHADOWS", "1")
//!     .with("MAX_LIGHTS", "8");
//! let key = defines.variant_hash();
//! ```

use std::collections::BTreeMap;
use std::hash::{BuildHasher, Hash, Hasher};

use crate::utils::interner::{self, Symbol};

/// Sorted set of `NAME = value` pairs.
#[derive(Debug, Clone, Default)]
pub struct ShaderDefines {
    pairs: Vec<(Symbol, Symbol)>,
}

impl ShaderDefines {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    /// Inserts or overwrites a define.
    pub fn set(&mut self, key: &str, value: &str) {
        let key = interner::intern(key);
        let value = interner::intern(value);
        match self.pairs.binary_search_by_key(&key, |&(k, _)| k) {
            Ok(idx) => self.pairs[idx].1 = value,
            Err(idx) => self.pairs.insert(idx, (key, value)),
        }
    }

    /// Removes a define, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(key) = interner::get(key) else {
            return false;
        };
        match self.pairs.binary_search_by_key(&key, |&(k, _)| k) {
            Ok(idx) => {
                self.pairs.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'static str> {
        self.lookup(key).map(interner::resolve)
    }

    fn lookup(&self, key: &str) -> Option<Symbol> {
        let key = interner::get(key)?;
        self.pairs
            .binary_search_by_key(&key, |&(k, _)| k)
            .ok()
            .map(|idx| self.pairs[idx].1)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Overrides entries of `self` with those of `other`.
    pub fn merge(&mut self, other: &ShaderDefines) {
        for &(key, value) in &other.pairs {
            match self.pairs.binary_search_by_key(&key, |&(k, _)| k) {
                Ok(idx) => self.pairs[idx].1 = value,
                Err(idx) => self.pairs.insert(idx, (key, value)),
            }
        }
    }

    /// Defines ordered by name, as template context and preamble input.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<&'static str, &'static str> {
        self.pairs
            .iter()
            .map(|&(k, v)| (interner::resolve(k), interner::resolve(v)))
            .collect()
    }

    /// Key of the permutation inside a program's variant table.
    #[must_use]
    pub fn variant_hash(&self) -> u64 {
        rustc_hash::FxBuildHasher.hash_one(self)
    }
}

impl Hash for ShaderDefines {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pairs.hash(state);
    }
}

impl PartialEq for ShaderDefines {
    fn eq(&self, other: &Self) -> bool {
        self.pairs == other.pairs
    }
}

impl Eq for ShaderDefines {}

impl From<&[(&str, &str)]> for ShaderDefines {
    fn from(pairs: &[(&str, &str)]) -> Self {
        let mut defines = Self::new();
        for (key, value) in pairs {
            defines.set(key, value);
        }
        defines
    }
}

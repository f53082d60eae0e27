//! Compiled-kernel cache: avoids recompiling byte-identical source.
//!
//! Keyed by the exact source text. The cache owns every compiled program;
//! operators in the registry hold shared references to them. It lives for the
//! lifetime of the `KernelContext` and is cleared at teardown.

use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::backend::Program;
use crate::error::Result;

/// Fingerprint of a kernel source string.
pub fn source_hash(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

/// Hit/miss counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Source-keyed program cache per context.
#[derive(Default)]
pub struct KernelCache {
    entries: HashMap<String, Arc<dyn Program>>,
    hits: u64,
    misses: u64,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached program for `source`; counted as a hit when present.
    pub fn lookup(&mut self, source: &str) -> Option<Arc<dyn Program>> {
        let program = self.entries.get(source).cloned()?;
        self.hits += 1;
        Some(program)
    }

    /// Cache a freshly compiled program and return the cached copy.
    ///
    /// Compiles run outside the context lock, so another thread may have
    /// cached the same source meanwhile; the first program stays.
    pub fn insert(&mut self, source: &str, program: Arc<dyn Program>) -> Arc<dyn Program> {
        match self.entries.entry(source.to_string()) {
            Entry::Occupied(e) => {
                self.hits += 1;
                Arc::clone(e.get())
            }
            Entry::Vacant(e) => {
                self.misses += 1;
                Arc::clone(e.insert(program))
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached program.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

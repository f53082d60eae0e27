//! Kernel registry: kernel name to registered operator.

use std::collections::HashMap;

use crate::operator::Operator;

/// Name-keyed operator table owned by one context.
///
/// Operators are inserted on successful compiles and replaced wholesale when a
/// name is compiled again. Individual removal is not supported; the registry is
/// only ever emptied as a whole at teardown.
#[derive(Debug, Default)]
pub struct KernelRegistry {
    ops: HashMap<String, Operator>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the operator for `name`, returning the previous one.
    pub fn register(&mut self, name: &str, op: Operator) -> Option<Operator> {
        self.ops.insert(name.to_string(), op)
    }

    pub fn get(&self, name: &str) -> Option<&Operator> {
        self.ops.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ops.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.ops.clear();
    }
}

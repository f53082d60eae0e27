//! Registered operators and their aggregation classification.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::backend::Program;
use crate::error::KernelError;

/// Comment directive that declares a kernel's aggregation kind in its source.
pub const AGGREGATION_DIRECTIVE: &str = "kerneljit:aggregation=";

/// Output shape of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AggregationKind {
    /// Elementwise; results land in the output array.
    #[default]
    None,
    /// One value per row.
    Row,
    /// One value per column.
    Column,
    /// Single scalar, returned from the dispatcher.
    Full,
}

impl AggregationKind {
    /// Tag order used by the host bridge: no, row, column, full.
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Row),
            2 => Some(Self::Column),
            3 => Some(Self::Full),
            _ => None,
        }
    }

    pub fn tag(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Row => 1,
            Self::Column => 2,
            Self::Full => 3,
        }
    }

    /// Whether the kernel reserves a trailing scalar slot for its result.
    pub fn is_full(self) -> bool {
        matches!(self, Self::Full)
    }

    /// Read the aggregation directive from kernel source.
    ///
    /// Returns `Ok(None)` when the source carries no directive.
    pub fn from_source(source: &str) -> Result<Option<Self>, KernelError> {
        for line in source.lines() {
            let line = line.trim_start();
            let Some(comment) = line.strip_prefix("//") else {
                continue;
            };
            if let Some(value) = comment.trim().strip_prefix(AGGREGATION_DIRECTIVE) {
                return value.trim().parse().map(Some);
            }
        }
        Ok(None)
    }
}

impl FromStr for AggregationKind {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" | "NO_AGG" => Ok(Self::None),
            "ROW" | "ROW_AGG" => Ok(Self::Row),
            "COLUMN" | "COL" | "COL_AGG" => Ok(Self::Column),
            "FULL" | "FULL_AGG" => Ok(Self::Full),
            _ => Err(KernelError::InvalidAggregation(s.to_string())),
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Row => "ROW",
            Self::Column => "COLUMN",
            Self::Full => "FULL",
        };
        f.write_str(s)
    }
}

/// One compiled kernel bound to its aggregation kind. Never mutated once
/// registered; recompiling a name replaces the whole operator.
#[derive(Clone)]
pub struct Operator {
    /// Shared with the kernel cache, which owns the compiled artifact.
    pub program: Arc<dyn Program>,
    pub aggregation: AggregationKind,
    /// Fingerprint of the source this operator was compiled from.
    pub source_hash: u64,
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("aggregation", &self.aggregation)
            .field("source_hash", &format_args!("{:#018x}", self.source_hash))
            .finish_non_exhaustive()
    }
}

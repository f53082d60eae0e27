//! Launch geometry policy.
//!
//! Geometry is computed in one place so the single-group placeholder can be
//! swapped for an occupancy-aware policy without touching dispatch or caching.

use crate::error::{KernelError, Result};

/// Three-dimensional extent, `(x, y, z)`.
pub type Dim3 = (u32, u32, u32);

/// Grid and block extents for one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub grid: Dim3,
    pub block: Dim3,
}

impl LaunchGeometry {
    /// Total threads per execution group.
    pub fn threads_per_block(&self) -> u64 {
        self.block.0 as u64 * self.block.1 as u64 * self.block.2 as u64
    }

    /// Total execution groups.
    pub fn blocks(&self) -> u64 {
        self.grid.0 as u64 * self.grid.1 as u64 * self.grid.2 as u64
    }
}

/// Maps request dimensions to launch geometry.
pub trait GeometryPolicy: Send + Sync {
    fn geometry(&self, m: u32, n: u32, max_threads_per_block: u32) -> Result<LaunchGeometry>;
}

/// One execution group of `m x n` threads.
///
/// No tuning and no splitting across groups, so `m * n` is bounded by the
/// device's per-block thread limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleBlock;

impl GeometryPolicy for SingleBlock {
    fn geometry(&self, m: u32, n: u32, max_threads_per_block: u32) -> Result<LaunchGeometry> {
        if m == 0 || n == 0 {
            return Err(KernelError::InvalidGeometry {
                m,
                n,
                reason: "extents must be non-zero".to_string(),
            });
        }
        let threads = m as u64 * n as u64;
        if threads > max_threads_per_block as u64 {
            return Err(KernelError::InvalidGeometry {
                m,
                n,
                reason: format!(
                    "{} threads exceed the per-block limit of {}",
                    threads, max_threads_per_block
                ),
            });
        }
        Ok(LaunchGeometry {
            grid: (1, 1, 1),
            block: (m, n, 1),
        })
    }
}

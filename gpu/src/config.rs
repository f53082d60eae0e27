//! Context configuration: `kerneljit.toml` plus environment overrides.
//!
//! ```toml
//! [compiler]
//! arch = "sm_80"
//! include-paths = ["/opt/cuda/include"]
//! fast-math = false
//! extra-options = ["-lineinfo"]
//!
//! [launch]
//! max-threads-per-block = 1024
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{KernelError, Result};

/// Per-block thread limit assumed when neither the device nor config says otherwise.
pub const DEFAULT_MAX_THREADS_PER_BLOCK: u32 = 1024;

/// `[compiler]` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CompilerConfig {
    /// Target architecture passed to the JIT compiler (e.g. "sm_80")
    pub arch: Option<String>,
    /// Extra include directories for kernel source
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub fast_math: bool,
    /// Raw options appended to the compiler command line
    #[serde(default)]
    pub extra_options: Vec<String>,
}

/// `[launch]` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LaunchConfig {
    /// Caps the device-reported limit when set
    pub max_threads_per_block: Option<u32>,
}

/// Settings applied when a context binds its device.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub launch: LaunchConfig,
}

impl ContextConfig {
    /// Parse a `kerneljit.toml` string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| KernelError::Config(format!("failed to parse kerneljit.toml: {}", e)))
    }

    /// Read and parse a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KernelError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `KERNELJIT_*` and CUDA toolkit environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(arch) = var("KERNELJIT_ARCH") {
            self.compiler.arch = Some(arch);
        }
        if let Some(limit) = var("KERNELJIT_MAX_BLOCK_THREADS") {
            let parsed = limit.trim().parse::<u32>().map_err(|_| {
                KernelError::Config(format!("KERNELJIT_MAX_BLOCK_THREADS is not a number: {}", limit))
            })?;
            self.launch.max_threads_per_block = Some(parsed);
        }
        for key in ["CUDA_PATH", "CUDA_HOME", "CUDA_ROOT"] {
            if let Some(base) = var(key) {
                let candidate = PathBuf::from(base).join("include");
                if candidate.exists() {
                    let path = candidate.to_string_lossy().into_owned();
                    if !self.compiler.include_paths.contains(&path) {
                        self.compiler.include_paths.push(path);
                    }
                }
            }
        }
        Ok(())
    }

    /// Effective per-block limit given what the device reports.
    pub fn max_threads_per_block(&self, device_limit: u32) -> u32 {
        match self.launch.max_threads_per_block {
            Some(limit) => limit.min(device_limit),
            None => device_limit,
        }
    }
}

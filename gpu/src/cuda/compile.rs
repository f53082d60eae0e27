//! CUDA kernel compilation: kernel source → PTX → loaded module

use std::collections::HashMap;
use std::sync::Arc;

use cudarc::driver::{CudaContext, CudaModule, CudaStream};
use cudarc::nvrtc::{compile_ptx_with_opts, CompileError, CompileOptions, Ptx};
use parking_lot::Mutex;

use super::device_init::CudaDevice;
use super::dispatch::CudaKernel;
use crate::backend::{KernelFunction, Program};
use crate::config::CompilerConfig;
use crate::element::ElementType;
use crate::error::{KernelError, Result};

/// Preprocessor macro that carries the element type into kernel source.
pub const ELEMENT_TYPE_MACRO: &str = "ELEMENT_TYPE";

/// A compiled kernel program; one loaded module per element type.
pub struct CudaProgram {
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    source: String,
    compiler: CompilerConfig,
    modules: Mutex<HashMap<ElementType, Arc<CudaModule>>>,
}

/// Compile kernel source for `device`.
///
/// The `double` instantiation is built eagerly so that source errors surface
/// here rather than at first launch; `float` is built on first use.
pub fn compile_program(device: &CudaDevice, source: &str) -> Result<Arc<dyn Program>> {
    let program = CudaProgram {
        ctx: Arc::clone(&device.ctx),
        stream: Arc::clone(&device.stream),
        source: source.to_string(),
        compiler: device.compiler.clone(),
        modules: Mutex::new(HashMap::new()),
    };
    program.module(ElementType::F64)?;
    Ok(Arc::new(program))
}

impl CudaProgram {
    fn module(&self, element: ElementType) -> Result<Arc<CudaModule>> {
        let mut modules = self.modules.lock();
        if let Some(module) = modules.get(&element) {
            return Ok(Arc::clone(module));
        }

        let ptx = compile_ptx(&self.source, element, &self.compiler)?;
        let module = self
            .ctx
            .load_module(ptx)
            .map_err(|e| KernelError::device("module load", format!("{:?}", e)))?;
        modules.insert(element, Arc::clone(&module));
        Ok(module)
    }
}

impl Program for CudaProgram {
    fn instantiate(&self, entry: &str, element: ElementType) -> Result<Arc<dyn KernelFunction>> {
        let module = self.module(element)?;
        let function = module.load_function(entry).map_err(|e| {
            KernelError::device("function load", format!("'{}': {:?}", entry, e))
        })?;
        Ok(Arc::new(CudaKernel::new(function, Arc::clone(&self.stream))))
    }
}

/// Build the NVRTC command line for one element type.
pub fn compile_options(element: ElementType, config: &CompilerConfig) -> Vec<String> {
    let mut options = vec![format!("-D{}={}", ELEMENT_TYPE_MACRO, element.c_name())];
    if let Some(arch) = &config.arch {
        options.push(format!("--gpu-architecture={}", arch));
    }
    options.extend(config.extra_options.iter().cloned());
    options
}

fn compile_ptx(source: &str, element: ElementType, config: &CompilerConfig) -> Result<Ptx> {
    let opts = CompileOptions {
        include_paths: config.include_paths.clone(),
        use_fast_math: config.fast_math.then_some(true),
        options: compile_options(element, config),
        ..Default::default()
    };
    compile_ptx_with_opts(source, opts).map_err(|e| match e {
        CompileError::CompileError { log, .. } => KernelError::Compile {
            name: String::new(),
            log: log.to_string_lossy().into_owned(),
        },
        other => KernelError::Compile {
            name: String::new(),
            log: format!("{:?}", other),
        },
    })
}

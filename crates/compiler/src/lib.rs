//! Polish Compiler Library
//!
//! Just-in-time compiles Polish stack-machine programs to native x86-64 code.
//!
//! ```rust
//! use polish_core::Operation;
//! use polishc::PolishCompiler;
//!
//! let compiler = PolishCompiler::new();
//! // f(a, b) = a * (b + 3)
//! let program = [Operation::Push { value: 3 }, Operation::add(), Operation::mult()];
//! # if polishc::codegen::platform::host_supported() {
//! let f = compiler.compile(&program, 2).unwrap();
//! assert_eq!(f.call(&[7, 10]), 91);
//! # }
//! ```
//!
//! Compilation first validates the program's stack usage (see
//! [`validator`]); only valid programs reach code generation, so a returned
//! [`JitFunction`] can always be called.

pub mod codegen;
pub mod config;
pub mod memory;
pub mod parser;
pub mod validator;

pub use codegen::CodeGenError;
pub use codegen::platform::MAX_ARGS;
pub use config::{CompilerConfig, ConfigError};
pub use memory::ExecutableMemory;
pub use parser::{Instruction, ParseError, Statement, lower, parse};
pub use validator::{StackDepth, ValidationError, ValidationErrorKind, validate};

use polish_core::Operation;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use tracing::debug;

/// Why [`PolishCompiler::compile`] produced no function.
#[derive(Debug)]
pub enum CompileError {
    /// The program does not have a valid stack shape.
    Invalid(ValidationError),
    /// More arguments than the calling convention passes in registers.
    TooManyArguments { nargs: usize },
    /// The program is longer than `CompilerConfig::max_program_len`.
    ProgramTooLong { len: usize, limit: usize },
    /// Generated code cannot run on this host.
    UnsupportedTarget,
    /// Executable memory could not be obtained.
    Memory(std::io::Error),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Invalid(e) => write!(f, "invalid program: {}", e),
            CompileError::TooManyArguments { nargs } => write!(
                f,
                "{} arguments requested, at most {} are supported",
                nargs, MAX_ARGS
            ),
            CompileError::ProgramTooLong { len, limit } => write!(
                f,
                "program has {} operations, the configured limit is {}",
                len, limit
            ),
            CompileError::UnsupportedTarget => write!(
                f,
                "native code generation is not supported on {}",
                codegen::platform::target_name()
            ),
            CompileError::Memory(e) => write!(f, "failed to map executable memory: {}", e),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Invalid(e) => Some(e),
            CompileError::Memory(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for CompileError {
    fn from(e: ValidationError) -> Self {
        CompileError::Invalid(e)
    }
}

impl From<std::io::Error> for CompileError {
    fn from(e: std::io::Error) -> Self {
        CompileError::Memory(e)
    }
}

/// Owns the executable memory of every function it compiles.
///
/// Compilation takes `&self` so earlier functions stay usable while more are
/// compiled; the bookkeeping is not meant for concurrent `compile` calls and
/// the compiler is therefore not `Sync`. Compiled functions themselves may be
/// called from any thread.
pub struct PolishCompiler {
    config: CompilerConfig,
    regions: RefCell<Vec<ExecutableMemory>>,
}

impl Default for PolishCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl PolishCompiler {
    pub fn new() -> Self {
        Self::with_config(CompilerConfig::default())
    }

    pub fn with_config(config: CompilerConfig) -> Self {
        PolishCompiler {
            config,
            regions: RefCell::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile `program` into a native function of `nargs` arguments.
    ///
    /// Fails without generating any code if the program is invalid for
    /// `nargs`. The returned function lives as long as the compiler.
    ///
    /// # Panics
    ///
    /// Panics if code generation fails for a program that passed validation,
    /// which would be a bug in the code generator.
    pub fn compile(
        &self,
        program: &[Operation],
        nargs: usize,
    ) -> Result<JitFunction<'_>, CompileError> {
        let code = self.generate(program, nargs)?;
        let memory = ExecutableMemory::new(&code)?;
        let entry = memory.as_ptr();
        let code_len = memory.code_len();
        self.regions.borrow_mut().push(memory);

        Ok(JitFunction {
            entry,
            arity: nargs,
            code_len,
            _compiler: PhantomData,
        })
    }

    /// Validate and generate machine code without mapping it.
    ///
    /// # Panics
    ///
    /// Same as [`PolishCompiler::compile`].
    pub fn generate(&self, program: &[Operation], nargs: usize) -> Result<Vec<u8>, CompileError> {
        if !codegen::platform::host_supported() {
            return Err(CompileError::UnsupportedTarget);
        }
        if nargs > MAX_ARGS {
            return Err(CompileError::TooManyArguments { nargs });
        }
        if let Some(limit) = self
            .config
            .max_program_len
            .filter(|&limit| program.len() > limit)
        {
            return Err(CompileError::ProgramTooLong {
                len: program.len(),
                limit,
            });
        }

        let depth = validate(program, nargs).inspect_err(|e| {
            debug!(nargs, error = %e, "rejected program");
        })?;

        let code = codegen::generate(program, nargs, depth.max, self.config.register_budget)
            .unwrap_or_else(|e| panic!("code generation failed for a valid program: {}", e));

        debug!(
            ops = program.len(),
            nargs,
            max_depth = depth.max,
            bytes = code.len(),
            "compiled program"
        );
        Ok(code)
    }

    /// Number of functions compiled so far.
    pub fn artifact_count(&self) -> usize {
        self.regions.borrow().len()
    }

    /// Total bytes of machine code across all compiled functions.
    pub fn code_size(&self) -> usize {
        self.regions.borrow().iter().map(|r| r.code_len()).sum()
    }
}

/// A compiled function, valid for as long as its compiler lives.
#[derive(Clone, Copy)]
pub struct JitFunction<'c> {
    entry: *const u8,
    arity: usize,
    code_len: usize,
    _compiler: PhantomData<&'c ()>,
}

// SAFETY: the code is immutable and touches no shared state except trace
// callbacks, whose thread safety is promised by `TraceElement::new`.
unsafe impl Send for JitFunction<'_> {}
unsafe impl Sync for JitFunction<'_> {}

type Fn0 = extern "C" fn() -> u64;
type Fn1 = extern "C" fn(u64) -> u64;
type Fn2 = extern "C" fn(u64, u64) -> u64;
type Fn3 = extern "C" fn(u64, u64, u64) -> u64;
type Fn4 = extern "C" fn(u64, u64, u64, u64) -> u64;
type Fn5 = extern "C" fn(u64, u64, u64, u64, u64) -> u64;
type Fn6 = extern "C" fn(u64, u64, u64, u64, u64, u64) -> u64;

impl JitFunction<'_> {
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Bytes of machine code behind this function.
    pub fn code_len(&self) -> usize {
        self.code_len
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.entry
    }

    /// Call the function with `args` as its arguments.
    ///
    /// # Panics
    ///
    /// Panics if `args.len()` differs from the function's arity.
    pub fn call(&self, args: &[u64]) -> u64 {
        assert_eq!(
            args.len(),
            self.arity,
            "function takes {} argument(s), {} given",
            self.arity,
            args.len()
        );
        // SAFETY: the entry point was generated for exactly `arity` u64
        // arguments under the C calling convention, and the mapping outlives
        // `self`.
        unsafe {
            match *args {
                [] => self.as_fn::<Fn0>()(),
                [a] => self.as_fn::<Fn1>()(a),
                [a, b] => self.as_fn::<Fn2>()(a, b),
                [a, b, c] => self.as_fn::<Fn3>()(a, b, c),
                [a, b, c, d] => self.as_fn::<Fn4>()(a, b, c, d),
                [a, b, c, d, e] => self.as_fn::<Fn5>()(a, b, c, d, e),
                [a, b, c, d, e, f] => self.as_fn::<Fn6>()(a, b, c, d, e, f),
                _ => unreachable!("arity is at most {}", MAX_ARGS),
            }
        }
    }

    /// Reinterpret the entry point as a function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type taking exactly
    /// [`arity`](Self::arity) `u64` arguments and returning `u64`, and the
    /// pointer must not be called after the compiler is dropped.
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*const u8>());
        // SAFETY: sizes match; the caller vouches for the signature.
        unsafe { std::mem::transmute_copy(&self.entry) }
    }
}

impl fmt::Debug for JitFunction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitFunction")
            .field("entry", &self.entry)
            .field("arity", &self.arity)
            .field("code_len", &self.code_len)
            .finish()
    }
}

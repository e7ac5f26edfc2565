//! DerkJS — an interpreter for a pragmatic subset of a prototype-based,
//! C-style scripting language.
//!
//! Source text is compiled to a compact stack-based bytecode and executed
//! on an embedded virtual machine with its own managed heap,
//! prototype-chain object model, and a host-extensible set of native
//! objects and functions.
//!
//! # Pipeline
//! lexer → parser → resolver → emitter → `Program` → VM
//!
//! # Example
//! ```no_run
//! use derkjs::{Driver, DriverInfo};
//!
//! let mut driver = Driver::with_defaults(DriverInfo::default()).unwrap();
//! driver
//!     .run_source("inline", "console.log(1 + 2 * 3);")
//!     .unwrap();
//! ```

pub mod builtins;
pub mod compiler;
pub mod driver;
pub mod gc;
pub mod parser;
pub mod runtime;
pub mod value;
pub mod vm;

pub use compiler::CompileError;
pub use driver::{Driver, DriverInfo, EngineError};
pub use gc::HeapConfig;
pub use value::{Handle, Value};
pub use vm::{DispatchPolicy, VmConfig, VmError};

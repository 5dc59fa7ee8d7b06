//! # Simple Sender Macros
//!
//! Macro files (`Macro-1`…`Macro-8`), the directive set (`%wait`, `%msg`,
//! `%update`, `%if`, `%for`, `%state_return`), a sandboxed expression
//! evaluator over [`script::MacroVars`], and the executor that runs
//! macros against the streaming controller under the command gate.

pub mod directives;
pub mod executor;
pub mod files;
pub mod script;

pub use directives::{compile_program, CondKind, Op};
pub use executor::{MachineSession, MacroExecutor, MacroOptions, MacroRunReport};
pub use files::{find_macro_file, load_macro, MacroFile};
pub use script::{MacroVars, Value};

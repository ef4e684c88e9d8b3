//! Script engine for sandboxed snippets
//!
//! A lexer, recursive-descent parser and tree-walking interpreter for the
//! JavaScript subset learners write in exercises. The engine has no I/O and
//! no access to host state; its only outward channel is the [`Console`].

pub mod ast;
mod builtins;
pub mod console;
pub mod error;
pub mod interpreter;
pub mod json;
pub mod lexer;
pub mod parser;
pub mod value;

pub use console::{render_line, Console, ConsoleLevel, ConsoleSink, HostConsole, NullConsole};
pub use error::{AbortReason, ScriptError};
pub use interpreter::{BindingScope, CancelToken, Interpreter, Limits};
pub use parser::{parse_expression, parse_program};
pub use value::Value;

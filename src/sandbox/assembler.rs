//! Turns source strings into units callable against a binding scope
//!
//! Assembly only records the source. Parsing happens on invocation, so a
//! syntax error surfaces exactly where a runtime error would.

use crate::script::{parse_expression, parse_program, BindingScope, Interpreter, ScriptError, Value};

/// How an assembled source is treated when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Statements; invocation yields `undefined`
    Snippet,
    /// A single expression; invocation yields its value
    Expression,
}

/// Builds [`Assembled`] units.
pub struct Assembler;

impl Assembler {
    /// A unit that runs `source` as statements, binding its top-level
    /// declarations into the scope it is invoked against.
    pub fn snippet(source: impl Into<String>) -> Assembled {
        Assembled {
            kind: UnitKind::Snippet,
            source: source.into(),
        }
    }

    /// A unit that evaluates `source` as one expression. One trailing `;`
    /// is accepted.
    pub fn expression(source: impl Into<String>) -> Assembled {
        Assembled {
            kind: UnitKind::Expression,
            source: source.into(),
        }
    }
}

/// Source waiting to be run against a [`BindingScope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    kind: UnitKind,
    source: String,
}

impl Assembled {
    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parse and run against `scope`. Each call gets a fresh step budget.
    pub fn invoke(&self, interp: &mut Interpreter, scope: &BindingScope) -> Result<Value, ScriptError> {
        match self.kind {
            UnitKind::Snippet => {
                let program = parse_program(&self.source)?;
                interp.run_program(&program, scope)?;
                Ok(Value::Undefined)
            }
            UnitKind::Expression => {
                let expr = parse_expression(&self.source)?;
                interp.evaluate(&expr, scope)
            }
        }
    }
}

use std::fmt;

use thiserror::Error;

use super::value::Value;

/// Failures originating in the interpreter's own operand checks, as opposed
/// to exceptions a program raises on purpose.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Undefined variable '{name}'")]
    UndefinedVariable { name: String },
    #[error("Invalid operands for {op}")]
    InvalidBinaryOperands { op: &'static str },
    #[error("Invalid operand for unary {op}")]
    InvalidUnaryOperand { op: &'static str },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Expected {expected} arguments but got {found}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("Object of type {type_name} is not callable")]
    NotCallable { type_name: &'static str },
    #[error("List indices must be integers")]
    ListIndexType,
    #[error("List index out of range")]
    ListIndexOutOfRange,
    #[error("Dictionary keys must be strings")]
    DictKeyType,
    #[error("Key '{key}' not found in dictionary")]
    KeyNotFound { key: String },
    #[error("Object of type {type_name} is not subscriptable")]
    NotSubscriptable { type_name: &'static str },
    #[error("Object of type {type_name} is not iterable")]
    NotIterable { type_name: &'static str },
    #[error("Unknown attribute '{attribute}' for type {type_name}")]
    UnknownAttribute {
        attribute: String,
        type_name: String,
    },
    #[error("Cannot assign attribute '{attribute}' on type {type_name}")]
    InvalidAttributeTarget {
        attribute: String,
        type_name: &'static str,
    },
    #[error("Object of type {type_name} has no len()")]
    NoLength { type_name: &'static str },
    #[error("raise() takes at most 2 arguments but got {found}")]
    RaiseArity { found: usize },
    #[error("raise() exception type must be a string")]
    RaiseTypeName,
    #[error("Module '{name}' not found")]
    ModuleNotFound { name: String },
    #[error("Cannot import name '{name}' from module '{module}'")]
    ImportSymbolMissing { name: String, module: String },
    #[error("Cyclic import of module '{name}'")]
    CyclicImport { name: String },
}

/// An exception thrown by the program via `raise(...)`. Carries the declared
/// type name, the payload value an `except ... as v` clause binds, and a
/// rendered message for top-level reporting.
#[derive(Debug, Clone)]
pub struct RaisedException {
    pub type_name: String,
    pub value: Value,
    pub message: String,
}

impl fmt::Display for RaisedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.type_name)
        } else {
            write!(f, "{}: {}", self.type_name, self.message)
        }
    }
}

impl PartialEq for RaisedException {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name
            && self.message == other.message
            && self.value.equals(&other.value)
    }
}

/// Everything that unwinds evaluation. `return` is not represented here: it
/// travels through the statement result channel so `try`/`except` can never
/// intercept it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InterpreterError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("{0}")]
    Raised(RaisedException),
}

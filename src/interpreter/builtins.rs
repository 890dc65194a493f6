use super::env::Environment;
use super::value::Value;

/// Builtins live in globals as string values of the form `builtin:<name>`;
/// the call machinery recognizes the sentinel and dispatches without a real
/// function object, so shadowing works like any other assignment.
pub const SENTINEL_PREFIX: &str = "builtin:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Raise,
}

impl Builtin {
    pub const ALL: [Builtin; 3] = [Builtin::Print, Builtin::Len, Builtin::Raise];

    pub fn name(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Len => "len",
            Self::Raise => "raise",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "print" => Some(Self::Print),
            "len" => Some(Self::Len),
            "raise" => Some(Self::Raise),
            _ => None,
        }
    }
}

pub fn seed_builtins(globals: &mut Environment) {
    for builtin in Builtin::ALL {
        globals.define(
            builtin.name(),
            Value::Str(format!("{SENTINEL_PREFIX}{}", builtin.name())),
        );
    }
}

pub fn as_sentinel(value: &Value) -> Option<Builtin> {
    let Value::Str(content) = value else {
        return None;
    };
    Builtin::from_name(content.strip_prefix(SENTINEL_PREFIX)?)
}

use crate::ir::IntValue;
use std::fmt;

/// A value tracked by the setup interpreter.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SetupValue {
    /// Well defined but too complicated to express.
    Unknown,
    /// Undefined; may be assumed equal to anything.
    Undefined,
    Int(IntValue),
    /// An address in the abstract process-wide address space.
    Ptr(u64),
    /// A repeating fill byte.
    Memset(u8),
    Channel(u32),
    Context(u32),
    Map(u32),
}

impl SetupValue {
    pub fn is_unknown(&self) -> bool {
        matches!(self, SetupValue::Unknown)
    }

    pub fn as_int(&self) -> Option<IntValue> {
        match self {
            SetupValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> Option<u64> {
        match self {
            SetupValue::Ptr(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<u32> {
        match self {
            SetupValue::Channel(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_context(&self) -> Option<u32> {
        match self {
            SetupValue::Context(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<u32> {
        match self {
            SetupValue::Map(m) => Some(*m),
            _ => None,
        }
    }
}

impl fmt::Display for SetupValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupValue::Unknown => write!(f, "unknown"),
            SetupValue::Undefined => write!(f, "undefined"),
            SetupValue::Int(v) => write!(f, "int {v}"),
            SetupValue::Ptr(p) => write!(f, "ptr {p:#x}"),
            SetupValue::Memset(b) => write!(f, "memset {b:#04x}"),
            SetupValue::Channel(c) => write!(f, "channel {c}"),
            SetupValue::Context(c) => write!(f, "context {c}"),
            SetupValue::Map(m) => write!(f, "map {m}"),
        }
    }
}

use thiserror::Error;

/// Errors that abort compilation.
///
/// Every fatal condition from the error taxonomy funnels through this enum;
/// lesser conditions (a merge group without a legal insertion point,
/// unhandled map types, loose-mode setup calls) are logged and compilation
/// continues.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid IR module: {0}")]
    Json(#[from] serde_json::Error),

    #[error("argument {arg} to {call} is {reason}")]
    Argument { arg: usize, call: String, reason: String },

    #[error("call to {name} has {actual} arguments, expected {expected}")]
    ArgCount { name: String, actual: usize, expected: usize },

    #[error("cannot handle variable pointer arithmetic in '{func}'")]
    VariablePointerArithmetic { func: String },

    #[error("cannot handle function '{name}' returning a pointer")]
    UnknownPointerSource { name: String },

    #[error("{kind} function {name} does not have exactly two arguments")]
    BadFunctionSignature { kind: &'static str, name: String },

    #[error("channel '{channel}' already has a {role}")]
    ChannelEndpoint { channel: String, role: &'static str },

    #[error("the context bound to thread '{first}' was also bound to thread '{second}'")]
    ContextRebound { first: String, second: String },

    #[error("setup function error: {0}")]
    Setup(String),

    #[error("mem2req error in '{func}': {reason}")]
    Mem2Req { func: String, reason: String },

    #[error("converge error in '{func}': {reason}")]
    Converge { func: String, reason: String },

    #[error("HLS validation failed for '{func}': {reason}")]
    HlsValidation { func: String, reason: String },

    #[error("missing function '{0}'")]
    MissingFunction(String),
}

pub type Result<T> = std::result::Result<T, CompileError>;

impl CompileError {
    pub fn setup(msg: impl Into<String>) -> CompileError {
        CompileError::Setup(msg.into())
    }
}

// error.rs - compilation error type
//
// One domain error for the whole pipeline, carrying the Java source line
// where one is known.

use thiserror::Error;

/// A class-file to WebAssembly translation error.
///
/// Raised when a method uses bytecode outside the supported subset, when its
/// branches cannot be rebuilt as structured control flow, or when the input
/// container itself is malformed.
#[derive(Error, Debug)]
pub enum WasmError {
    /// An error without source position, e.g. a malformed class file.
    #[error("{0}")]
    Message(String),

    /// An error attributed to a Java source line.
    #[error("{message} at line {line}")]
    AtLine { message: String, line: u32 },
}

/// A convenient alias for a `Result` that uses `WasmError` as the error type.
pub type WasmResult<T> = Result<T, WasmError>;

impl WasmError {
    /// Create a new error, attributed to `line` when one is known.
    pub fn new(message: impl Into<String>, line: Option<u32>) -> WasmError {
        match line {
            Some(line) => WasmError::AtLine {
                message: message.into(),
                line,
            },
            None => WasmError::Message(message.into()),
        }
    }

    /// The Java source line this error is attributed to.
    pub fn line(&self) -> Option<u32> {
        match self {
            WasmError::Message(_) => None,
            WasmError::AtLine { line, .. } => Some(*line),
        }
    }

    /// Attach a line number unless the error already carries one.
    pub fn or_line(self, line: Option<u32>) -> WasmError {
        match (self, line) {
            (WasmError::Message(message), Some(line)) => WasmError::AtLine { message, line },
            (err, _) => err,
        }
    }
}

impl From<std::io::Error> for WasmError {
    fn from(err: std::io::Error) -> WasmError {
        WasmError::Message(err.to_string())
    }
}

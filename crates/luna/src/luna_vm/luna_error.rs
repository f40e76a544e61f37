/// Lightweight error enum - only 1 byte.
/// The human-readable message is stored on the VM (`error_message`) to
/// keep `Result` small on the hot dispatch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LunaError {
    /// Compile error - diagnostics already written to stderr
    CompileError,
    /// Runtime error - message stored in vm.error_message
    RuntimeError,
    /// Stack overflow
    StackOverflow,
    /// Out of memory
    OutOfMemory,
}

impl std::fmt::Display for LunaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LunaError::CompileError => write!(f, "Compile Error"),
            LunaError::RuntimeError => write!(f, "Runtime Error"),
            LunaError::StackOverflow => write!(f, "Stack Overflow"),
            LunaError::OutOfMemory => write!(f, "Out Of Memory"),
        }
    }
}

impl std::error::Error for LunaError {}

pub type LunaResult<T> = Result<T, LunaError>;

/// Rich error combining the [`LunaError`] kind with the actual message,
/// for embedders that want a self-contained `std::error::Error`.
#[derive(Debug, Clone)]
pub struct LunaFullError {
    pub kind: LunaError,
    pub message: String,
}

impl std::fmt::Display for LunaFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for LunaFullError {}

impl LunaFullError {
    #[inline]
    pub fn kind(&self) -> LunaError {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

//! Application error type.
//!
//! Every fallible operation in the crate returns `AppError`, which carries the
//! process exit code alongside a human-readable message:
//!
//! - `2`: bad input, configuration or file I/O
//! - `3`: nothing to analyse (no events, empty mask, no voxels)
//! - `4`: numerical/model failure (singular design, no residual dof, ...)

/// Exit code for invalid input, configuration or I/O failures.
pub const EXIT_INPUT: u8 = 2;
/// Exit code for empty data.
pub const EXIT_EMPTY: u8 = 3;
/// Exit code for numerical failures.
pub const EXIT_NUMERIC: u8 = 4;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(EXIT_INPUT, message)
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self::new(EXIT_EMPTY, message)
    }

    pub fn numeric(message: impl Into<String>) -> Self {
        Self::new(EXIT_NUMERIC, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

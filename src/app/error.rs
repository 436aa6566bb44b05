use serde::Serialize;
use std::fmt;

pub const ERR_VALIDATION: &str = "ERR_VALIDATION";
pub const ERR_DEPENDENCY: &str = "ERR_DEPENDENCY";
pub const ERR_SYSTEM: &str = "ERR_SYSTEM";
pub const ERR_UNKNOWN_COMMAND: &str = "ERR_UNKNOWN_COMMAND";

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_VALIDATION, message, trace_id)
    }

    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_DEPENDENCY, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_SYSTEM, message, trace_id)
    }

    pub fn unknown_command(name: &str, trace_id: impl Into<String>) -> Self {
        Self::new(
            ERR_UNKNOWN_COMMAND,
            format!("unknown command '{name}'"),
            trace_id,
        )
    }

    /// Name printed in front of the message when a console command fails.
    pub fn kind(&self) -> &'static str {
        match self.code.as_str() {
            ERR_VALIDATION => "ValidationError",
            ERR_DEPENDENCY => "DependencyError",
            ERR_UNKNOWN_COMMAND => "UnknownCommand",
            _ => "SystemError",
        }
    }

    pub fn console_line(&self) -> String {
        format!("{}: {}", self.kind(), self.error)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}

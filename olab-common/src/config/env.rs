//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for `OLAB_` environment overrides that
//! collects every error so all issues can be reported at once.

use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    /// Create a new parser with the OLAB_ prefix.
    pub fn new() -> Self {
        Self::with_prefix("OLAB_")
    }

    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn raw(&self, name: &str) -> Option<(String, String)> {
        let var_name = self.var_name(name);
        env::var(&var_name).ok().map(|value| (var_name, value))
    }

    /// Get an optional string value.
    pub fn get_string(&mut self, name: &str) -> Option<String> {
        self.raw(name).map(|(_, value)| value)
    }

    /// Get an optional path value (tilde-expanded).
    pub fn get_path(&mut self, name: &str) -> Option<PathBuf> {
        self.raw(name)
            .map(|(_, value)| PathBuf::from(shellexpand::tilde(&value).into_owned()))
    }

    /// Get an optional u32 value with range validation.
    pub fn get_u32_range(&mut self, name: &str, min: u32, max: u32) -> Option<u32> {
        let (var_name, value) = self.raw(name)?;
        match value.trim().parse::<u32>() {
            Ok(n) if n >= min && n <= max => Some(n),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                None
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "unsigned 32-bit integer".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get an optional f64 value with range validation.
    pub fn get_f64_range(&mut self, name: &str, min: f64, max: f64) -> Option<f64> {
        let (var_name, value) = self.raw(name)?;
        match value.trim().parse::<f64>() {
            Ok(n) if n.is_finite() && n >= min && n <= max => Some(n),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                None
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "floating-point number".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get an optional log level (trace, debug, info, warn, error).
    pub fn get_log_level(&mut self, name: &str) -> Option<String> {
        let (var_name, value) = self.raw(name)?;
        let level = value.trim().to_lowercase();
        match level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => Some(level),
            _ => {
                self.errors.push(EnvError::InvalidLogLevel {
                    var: var_name,
                    value,
                });
                None
            }
        }
    }
}

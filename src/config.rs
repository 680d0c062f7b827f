//! Router configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! [validation]
//! status = 422
//! message = "Please correct the highlighted fields"
//!
//! [policy]
//! status = 403
//! auto_resource_policies = true
//!
//! [router]
//! head_from_get = true
//! ```

use std::path::Path;

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{BuildError, VALIDATION_FAILED_CODE};

/// Top-level configuration consumed by the router builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How validation failures are reported
    pub validation: ValidationConfig,
    /// How policy failures are reported
    pub policy: PolicyConfig,
    /// Dispatch behaviour
    pub router: RouterConfig,
}

/// Error reported by the validation-result step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// HTTP status of a validation failure.
    pub status: u16,
    /// Error code of a validation failure.
    pub code: String,
    /// Error message of a validation failure.
    pub message: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            status: 400,
            code: VALIDATION_FAILED_CODE.to_string(),
            message: "Request validation failed".to_string(),
        }
    }
}

impl ValidationConfig {
    /// The status as an [`http::StatusCode`].
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_REQUEST)
    }
}

/// Policy failure reporting and resource policy conventions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// HTTP status of a policy failure.
    pub status: u16,
    /// Attach `?{namespace.}{resource}.{action}` checks to resource routes.
    pub auto_resource_policies: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            status: 403,
            auto_resource_policies: true,
        }
    }
}

impl PolicyConfig {
    /// The status as an [`http::StatusCode`].
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::FORBIDDEN)
    }
}

/// Request dispatch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// GET routes also answer HEAD requests, without a body.
    pub head_from_get: bool,
    /// Match static path segments case-sensitively.
    pub case_sensitive: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            head_from_get: true,
            case_sensitive: false,
        }
    }
}

impl Config {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Config` if the document does not parse or a
    /// status is not an error status.
    pub fn from_toml_str(source: &str) -> Result<Self, BuildError> {
        let config: Config = toml::from_str(source)
            .map_err(|e| BuildError::Config(format!("failed to parse TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Config` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BuildError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks that configured statuses are 4xx or 5xx.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Config` naming the offending setting.
    pub fn validate(&self) -> Result<(), BuildError> {
        check_error_status("validation.status", self.validation.status)?;
        check_error_status("policy.status", self.policy.status)
    }
}

fn check_error_status(key: &str, status: u16) -> Result<(), BuildError> {
    match StatusCode::from_u16(status) {
        Ok(s) if s.is_client_error() || s.is_server_error() => Ok(()),
        _ => Err(BuildError::Config(format!(
            "{} must be a 4xx or 5xx status, got {}",
            key, status
        ))),
    }
}

//! Common error types for netfab.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`NetfabError`].
pub type NetfabResult<T> = Result<T, NetfabError>;

/// Errors returned by network, namespace and route operations.
#[derive(Error, Diagnostic, Debug)]
pub enum NetfabError {
    /// Malformed input rejected before any side effect.
    #[error("Validation error: {message}")]
    #[diagnostic(code(netfab::validation))]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// A container, namespace or link does not exist.
    #[error("Not found: {resource}")]
    #[diagnostic(
        code(netfab::not_found),
        help("Check that the container exists and is running")
    )]
    NotFound {
        /// The missing resource.
        resource: String,
    },

    /// The capability to switch namespaces or alter routes is absent.
    #[error("Permission denied: {operation}")]
    #[diagnostic(
        code(netfab::permission_denied),
        help("Namespace operations need CAP_SYS_ADMIN and CAP_NET_ADMIN; try running with sudo")
    )]
    PermissionDenied {
        /// The operation that was denied.
        operation: String,
    },

    /// The container engine or another external command failed.
    #[error("`{command}` failed: {detail}")]
    #[diagnostic(code(netfab::external_tool))]
    ExternalTool {
        /// The command line that was run.
        command: String,
        /// Raw failure detail (stderr or spawn error).
        detail: String,
    },

    /// The network stack refused a link or route operation.
    #[error("Kernel rejected {operation}: {message}")]
    #[diagnostic(
        code(netfab::kernel_rejected),
        help("A gateway must be reachable through one of the container's attached links")
    )]
    KernelRejected {
        /// The operation that was refused.
        operation: String,
        /// The kernel's reason.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(netfab::io))]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(netfab::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Feature not supported on this platform.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(
        code(netfab::unsupported),
        help("Network namespace operations are only available on Linux")
    )]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(code(netfab::internal))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl NetfabError {
    /// Shorthand for [`NetfabError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for [`NetfabError::NotFound`].
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Classify an OS error raised by a kernel operation.
    ///
    /// `EPERM`/`EACCES` become [`NetfabError::PermissionDenied`], everything
    /// else is reported as [`NetfabError::KernelRejected`].
    pub fn from_os(operation: impl Into<String>, err: &std::io::Error) -> Self {
        let operation = operation.into();
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { operation },
            _ => Self::KernelRejected {
                operation,
                message: err.to_string(),
            },
        }
    }

    /// Whether this error is a [`NetfabError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<toml::de::Error> for NetfabError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}

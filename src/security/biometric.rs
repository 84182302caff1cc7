use async_trait::async_trait;
use thiserror::Error;

use crate::AppError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BiometricError {
    #[error("biometric authentication is not available on this device")]
    Unavailable,
    #[error("biometric prompt was cancelled")]
    Cancelled,
    #[error("biometric assertion failed: {0}")]
    Failed(String),
}

impl From<BiometricError> for AppError {
    fn from(err: BiometricError) -> Self {
        let detail = match &err {
            BiometricError::Unavailable => "BIOMETRIC_UNAVAILABLE",
            BiometricError::Cancelled => "BIOMETRIC_CANCELLED",
            BiometricError::Failed(_) => "BIOMETRIC_FAILED",
        };
        AppError::security(detail, "Biometric authentication failed")
            .with_context("reason", err.to_string())
    }
}

/// Platform credential hook. Hosts without one use [`NoBiometrics`].
#[async_trait]
pub trait BiometricAuthenticator: Send + Sync {
    async fn is_available(&self) -> bool;

    /// Registers a platform credential for `subject`, returning its id.
    async fn register(&self, subject: &str) -> Result<String, BiometricError>;

    async fn assert(&self, credential_id: &str) -> Result<(), BiometricError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoBiometrics;

#[async_trait]
impl BiometricAuthenticator for NoBiometrics {
    async fn is_available(&self) -> bool {
        false
    }

    async fn register(&self, _subject: &str) -> Result<String, BiometricError> {
        Err(BiometricError::Unavailable)
    }

    async fn assert(&self, _credential_id: &str) -> Result<(), BiometricError> {
        Err(BiometricError::Unavailable)
    }
}

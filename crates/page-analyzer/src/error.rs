//! Error taxonomy for scans.

use crate::types::SurfaceId;

/// Protocol error codes, one per [`AnalyzerError`] variant.
pub mod error_codes {
    pub const INJECTION_DENIED: &str = "E_INJECTION_DENIED";
    pub const SCAN_TIMEOUT: &str = "E_SCAN_TIMEOUT";
    pub const EXTRACTION_FAILURE: &str = "E_EXTRACTION_FAILURE";
    pub const STORAGE_UNAVAILABLE: &str = "E_STORAGE_UNAVAILABLE";
    pub const SCAN_PENDING: &str = "E_SCAN_PENDING";
    pub const RUNTIME_INACTIVE: &str = "E_RUNTIME_INACTIVE";
    pub const HOST: &str = "E_HOST";
    pub const INVALID_COMMAND: &str = "E_INVALID_COMMAND";
}

/// All errors a scan can end with.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    /// The host refused the injection or the address is not eligible.
    #[error("Injection denied: {0}")]
    InjectionDenied(String),

    /// No response from the extraction routine within the deadline.
    #[error("Timeout: the page did not answer the scan within {0} ms")]
    ScanTimeout(u64),

    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    /// A storage tier is missing or a read/write failed. Logged, never propagated out of a scan.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("A scan is already pending on surface {0}")]
    ScanPending(SurfaceId),

    #[error("Runtime scan is not active")]
    RuntimeInactive,

    #[error("Host error: {0}")]
    Host(String),

    /// A known command type with a malformed payload.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl AnalyzerError {
    pub fn code(&self) -> &'static str {
        use error_codes::*;
        match self {
            AnalyzerError::InjectionDenied(_) => INJECTION_DENIED,
            AnalyzerError::ScanTimeout(_) => SCAN_TIMEOUT,
            AnalyzerError::ExtractionFailure(_) => EXTRACTION_FAILURE,
            AnalyzerError::StorageUnavailable(_) => STORAGE_UNAVAILABLE,
            AnalyzerError::ScanPending(_) => SCAN_PENDING,
            AnalyzerError::RuntimeInactive => RUNTIME_INACTIVE,
            AnalyzerError::Host(_) => HOST,
            AnalyzerError::InvalidCommand(_) => INVALID_COMMAND,
        }
    }
}

/// Convenience result type.
pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

//! Error types for the edgequake-esg library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`EsgError`] — **Fatal**: the run cannot proceed (bad input file, the
//!   converter rejected a page batch, the output directory is not writable).
//!   Returned as `Err(EsgError)` from the top-level entry points.
//!
//! * [`ReasoningError`] — **Non-fatal**: a single call to a text or vision
//!   reasoning collaborator failed. Extraction tiers log it and treat the
//!   call as "nothing found", so the cascade moves on to the next tier.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-esg library.
#[derive(Debug, Error)]
pub enum EsgError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The page selection resolved to no pages of the document.
    #[error("Page selection '{selection}' matches no page (document has {total} pages)")]
    EmptyPageSelection { selection: String, total: usize },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The converter returned a non-success status for a page batch.
    #[error("Conversion failed for pages {start}-{end}: {status}. {errors}")]
    ConversionFailed {
        start: u32,
        end: u32,
        status: String,
        errors: String,
    },

    /// The converter output could not be read or decoded.
    #[error("Could not read converter output '{path}': {detail}")]
    ConverterOutput { path: PathBuf, detail: String },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: u32, detail: String },

    // ── Reasoning errors ──────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write a structured artifact.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A page manifest or table export on disk could not be parsed.
    #[error("Invalid manifest '{path}': {detail}")]
    InvalidManifest { path: PathBuf, detail: String },

    /// The emission store rejected an upsert.
    #[error("Emission store error: {0}")]
    Store(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EsgError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EsgError::OutputWriteFailed {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error from a single reasoning call.
#[derive(Debug, Clone, Error)]
pub enum ReasoningError {
    /// The provider call itself failed (network, auth, quota).
    #[error("reasoning call failed: {0}")]
    CallFailed(String),

    /// The image attached to a vision call could not be encoded.
    #[error("image encoding failed: {0}")]
    Encoding(String),

    /// The provider answered with an empty body.
    #[error("reasoning call returned an empty response")]
    EmptyResponse,
}

//! # edgequake-esg
//!
//! Structure corporate ESG disclosure PDFs into per-page artifacts, then
//! extract greenhouse-gas emissions, revenue and energy intensity from the
//! resulting tables.
//!
//! ## Why this crate?
//!
//! Sustainability reports put the numbers that matter in tables whose
//! layouts change from company to company and year to year, and document
//! converters miss a page now and then. This crate keeps every page on disk
//! as markdown, table JSON and image crops, and reads the figures with a
//! cascade that starts with cheap row-label patterns and only calls text or
//! vision models for what is still missing.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF + Docling JSON
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Convert    page batches through the converter port
//!  ├─ 3. Strip      running headers/footers detected per batch
//!  ├─ 4. Structure  page.md, table_NNN.{md,json,png}, figure crops, page.json
//!  ├─ 5. Fallback   vision model rebuilds pages the converter missed
//!  ├─ 6. Extract    pattern → text → vision (or auto: relevance-scored vision)
//!  └─ 7. Store      per-year records upserted by (company, year)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_esg::extract::store::MemoryEmissionStore;
//! use edgequake_esg::extract::tables::load_report_tables;
//! use edgequake_esg::pipeline::manifest::ReportLayout;
//! use edgequake_esg::{structure_document, Document, EmissionExtractor, ExtractionConfig, ExtractionMode, StructureConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let report = structure_document(
//!         "hanbit_2025.pdf",
//!         Path::new("hanbit_2025.json"),
//!         Path::new("reports"),
//!         None,
//!         StructureConfig::default(),
//!         None,
//!         None,
//!     )
//!     .await?;
//!
//!     let tables = load_report_tables(&ReportLayout::new(&report.report_dir)).await?;
//!     let document = Document::new("한빛전자", 2025, "hanbit_2025.pdf");
//!     let extractor = EmissionExtractor::new(ExtractionConfig::default(), document.data_year());
//!     let store = MemoryEmissionStore::new();
//!     let records = extractor
//!         .extract_and_store(&document, ExtractionMode::Pattern, &tables, &store)
//!         .await?;
//!     println!("{} records", records.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `esg-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-esg = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod reasoning;
pub mod structure;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    BoilerplateRules, ExtractionConfig, ExtractionConfigBuilder, PageSelection, StructureConfig,
    StructureConfigBuilder, TitleRules,
};
pub use error::{EsgError, ReasoningError};
pub use extract::{EmissionExtractor, ExtractionMode, ExtractionOutcome, ExtractionTier};
pub use model::{Document, EmissionRecord, PageManifest, PartialEmission, TierKind};
pub use progress::{NoopProgressCallback, ProgressCallback, StructureProgressCallback};
pub use reasoning::{resolve_provider, LlmReasoner, TextReasoner, VisionReasoner};
pub use structure::{structure_document, PageStructurer, StructureReport};

//! Pipeline stages for turning a disclosure PDF into per-page artifacts.
//!
//! Each submodule implements exactly one step and is testable on its own.
//! The converter and rasterizer sit behind traits so tests run on fixtures.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ docling ──▶ boilerplate ──▶ page ──▶ manifest
//! (URL/path) (convert)   (strip)       (tables, figures)
//!              │                         ▲
//!              └── render (pdfium) ──────┤
//!                                        └── fallback (vision) for unconverted pages
//! ```
//!
//! 1. [`input`]       — canonicalise the user-supplied path or URL to a local file
//! 2. [`docling`]     — converter port and the Docling JSON document model
//! 3. [`render`]      — rasterise pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 4. [`boilerplate`] — running header/footer detection per batch
//! 5. [`geometry`]    — document-space boxes to pixel crops, table titles
//! 6. [`page`]        — write one page directory
//! 7. [`fallback`]    — rebuild a page the converter missed from its raster
//! 8. [`postprocess`] — deterministic markdown cleanup
//! 9. [`manifest`]    — on-disk layout and atomic writes
//! 10. [`encode`]     — PNG bytes and base64 image payloads

pub mod boilerplate;
pub mod docling;
pub mod encode;
pub mod fallback;
pub mod geometry;
pub mod input;
pub mod manifest;
pub mod page;
pub mod postprocess;
pub mod render;

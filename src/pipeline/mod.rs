//! Pipeline stages around the batch core.
//!
//! Each submodule implements exactly one step, so each can be tested alone
//! and swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ [batch] ──▶ llm ──▶ postprocess
//! (bytes)   (pdfium)   (PNG)      (fan-out)   (VLM)    (cleanup)
//! ```
//!
//! 1. [`input`]: read a local path or download a URL; size and `%PDF` checks
//! 2. [`render`]: the PageImage Source, rasterising selected pages in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`]: PNG-encode rendered pages; base64-wrap them for the API
//! 4. [`llm`]: the Transcription Client, one request/response per call,
//!    errors classified for the retry policy
//! 5. [`postprocess`]: deterministic cleanup of model quirks

pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod render;

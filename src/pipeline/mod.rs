//! Pipeline stages for a digest run.
//!
//! Each submodule implements one step; every external service sits behind
//! an async trait so the stages can be exercised with in-process fakes.
//!
//! ## Data Flow
//!
//! ```text
//! research ──▶ process ──▶ classify ──▶ summarize ──▶ synthesize ──▶ speech
//! (indexes)    (pdf/html)  (embeddings)  (LLM)         (LLM)          (TTS)
//! ```
//!
//! 1. [`research`]: classify the query, search arXiv / Semantic Scholar,
//!    resolve DOIs, de-duplicate
//! 2. [`process`]: pick a text source per paper; [`input`] downloads,
//!    [`extract`] reads PDFs (pdfium, in `spawn_blocking`) and HTML
//! 3. [`classify`]: cosine similarity between paper and topic embeddings
//! 4. [`summarize`]: one LLM call per paper via [`generate`], plus an APA
//!    [`citation`]
//! 5. [`synthesize`]: one LLM call per populated topic
//! 6. [`speech`]: chunked Google TTS into MP3
//!
//! [`clean`] holds the deterministic text rules shared by the stages.

pub mod citation;
pub mod classify;
pub mod clean;
pub mod extract;
pub mod generate;
pub mod input;
pub mod process;
pub mod research;
pub mod speech;
pub mod summarize;
pub mod synthesize;

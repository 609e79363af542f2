//! Pipeline stages for splitting an invoice batch.
//!
//! Each submodule implements exactly one transformation step and is tested
//! on its own; [`crate::orchestrator`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ extract ──▶ group ──▶ split
//! (URL/path) (pdfium)   (JPEG)     (VLM)     (pages)   (lopdf)
//! ```
//!
//! 1. [`input`]   — load the user-supplied path or URL, validate and count pages
//! 2. [`render`]  — rasterise one page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`]  — JPEG-encode and base64-wrap the bitmap for the request body
//! 4. [`extract`] — the VLM call with rate-limit retry; the only stage with
//!    inference I/O
//! 5. [`group`]   — partition pages into contiguous per-invoice groups
//! 6. [`split`]   — copy each group's pages into its own PDF and name it

pub mod encode;
pub mod extract;
pub mod group;
pub mod input;
pub mod render;
pub mod split;

#[cfg(test)]
pub(crate) mod testing;

//! # Component Harness Core
//!
//! Shared, I/O-free logic for Component Harness: the pipeline that turns a
//! blob of generated source text into a persisted, loadable and renderable
//! unit.
//!
//! ```text
//!  raw text ──▶ sanitize ──▶ resolve ──▶ UnitStore ──▶ UnitLoader ──▶ Renderer
//!               (repair)     (naming)    (persist)     (resolve)      (fallback chain)
//! ```
//!
//! This crate contains no tokio runtime, network or filesystem I/O. The
//! filesystem-backed [`store::UnitStore`] and the HTTP surface live in the
//! `component-harness` application crate.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`sanitize`] | Heuristic cleanup of generated text into unit source |
//! | [`resolve`] | Filename slugs, unit ids and library name de-duplication |
//! | [`classify`] | Category / tag inference for library promotion |
//! | [`analysis`] | Lenient parsing of intent-analysis replies |
//! | [`synth`] | Placeholder units built from an analysis |
//! | [`store`] | Storage trait and in-memory backend |
//! | [`library`] | Promotion, listing and deletion of library units |
//! | [`loader`] | Structured / raw-source unit resolution with an explicit cache |
//! | [`sandbox`] | Capability-scoped execution boundary for raw source |
//! | [`render`] | Ordered fallback chain producing labeled HTML |

pub mod analysis;
pub mod classify;
pub mod error;
pub mod library;
pub mod loader;
pub mod models;
pub mod render;
pub mod resolve;
pub mod sandbox;
pub mod sanitize;
pub mod store;
pub mod synth;

//! # Component Harness
//!
//! Turns text from a code-generation service into stored, renderable UI
//! units, and renders them against untrusted data with a fallback chain
//! that always shows something.
//!
//! The pure pipeline (sanitizer, resolver, store trait, loader, sandbox
//! boundary, renderer) lives in `component-harness-core`. This crate adds
//! the I/O around it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Providers  │──▶│ Orchestrator │──▶│  Sanitizer  │
//! │ LLM/codegen │   │  chat turn   │   │  + Resolver │
//! └─────────────┘   └──────────────┘   └──────┬──────┘
//!                                             ▼
//!                    ┌──────────┐      ┌─────────────┐
//!                    │ Renderer │◀─────│ FsUnitStore │
//!                    │ fallback │      │ units/ + lib│
//!                    └────┬─────┘      └─────────────┘
//!                ┌────────┴────────┐
//!                ▼                 ▼
//!           ┌──────────┐     ┌──────────┐
//!           │   CLI    │     │   HTTP   │
//!           │  (chx)   │     │  (axum)  │
//!           └──────────┘     └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`fs_store`] | Filesystem-backed unit store |
//! | [`providers`] | Chat-completion HTTP clients with retry |
//! | [`orchestrator`] | Chat turn sequencing and cancellation |
//! | `lua_runtime` | Sandboxed Lua VMs for classifier scripts |
//! | [`classify_script`] | Lua-scripted library classifiers |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI entry points |

pub mod classify_script;
pub mod commands;
pub mod config;
pub mod fs_store;
pub(crate) mod lua_runtime;
pub mod orchestrator;
pub mod providers;
pub mod server;

//! # redraft
//!
//! Chunked document rewriting with large language models.
//!
//! redraft splits a long document into paragraph-aligned chunks, sends the
//! selected chunks one at a time to a completion backend (streaming or
//! one-shot), cleans up each result, enforces a minimum length, and
//! reassembles the document. Runs can be observed while they execute and
//! cancelled between chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────┐
//! │ Document │──▶│   Chunker    │──▶│    Session     │
//! │  store   │   │ (paragraphs) │   │ chunks+select  │
//! └──────────┘   └──────────────┘   └───────┬────────┘
//!                                           │
//!                                   ┌───────▼────────┐   ┌──────────────┐
//!                                   │  Orchestrator  │──▶│  Completion  │
//!                                   │  (sequential)  │◀──│    client    │
//!                                   └───────┬────────┘   └──────────────┘
//!                        normalize + length │
//!                                   ┌───────▼────────┐
//!                                   │ Export / stdout│
//!                                   └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! redraft chunk report.md                       # show chunk boundaries
//! redraft rewrite report.md --instructions "Tighten the prose" --stream
//! redraft rewrite report.md --instructions "..." --select 2,4-5 --output out.md
//! redraft serve                                 # HTTP API on 127.0.0.1:7341
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed error taxonomy |
//! | [`chunk`] | Paragraph-aligned chunking |
//! | [`normalize`] | Cleanup of model output |
//! | [`completion`] | Completion backends and the frame protocol |
//! | [`length`] | Minimum-length policy |
//! | [`session`] | Per-user document, selection and cancellation |
//! | [`orchestrator`] | Sequential rewrite runs |
//! | [`progress`] | Observable progress and stderr reporters |
//! | [`store`] | Document lookup by id |
//! | [`export`] | Delivery of assembled output |
//! | [`server`] | HTTP server |
//! | [`logging`] | Tracing subscriber setup |

pub mod chunk;
pub mod completion;
pub mod config;
pub mod error;
pub mod export;
pub mod length;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod progress;
pub mod server;
pub mod session;
pub mod store;

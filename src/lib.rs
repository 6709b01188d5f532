//! # Extract Harness
//!
//! Multi-channel structured extraction from documents.
//!
//! Every uploaded document of a task is sent through several extraction
//! channels. Each channel asks a model for a JSON object shaped by the task's
//! schema and keeps the answer on disk. Values from the markdown channel are
//! then mapped back onto the OCR text blocks they came from, so a reviewer can
//! compare channels side by side with the source highlighted.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────────┐
//! │  Tasks   │──▶│ Channel      │──▶│ extract_results/   │
//! │ uploads/ │   │ Runner       │   │ {channel}_result   │
//! └──────────┘   └──┬───────┬───┘   └─────────┬──────────┘
//!                   │       │                 │
//!            vision │       │ OCR + chat      ▼
//!                   ▼       ▼           ┌───────────┐
//!              ┌──────────────────┐     │  Locator  │──▶ op.json
//!              │ Provider (HTTP)  │     └───────────┘
//!              └──────────────────┘           │
//!                                             ▼
//!                      ┌──────────┐     ┌────────────┐
//!                      │   CLI    │     │ Aggregator │──▶ HTTP API
//!                      │   (xh)   │     └────────────┘
//!                      └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Parse results, locations and response types |
//! | [`error`] | Error taxonomy |
//! | [`json_extract`] | Recover JSON from free-form model output |
//! | [`provider`] | Chat, vision and OCR provider abstraction |
//! | [`parse_cache`] | Per-document OCR parse cache |
//! | [`channel`] | Extraction channels and their runner |
//! | [`locate`] | Text location mapping |
//! | [`aggregate`] | Multi-channel result aggregation |
//! | [`tasks`] | Tasks, uploads, schemas and decisions |
//! | [`extract`] | Plain-text reading for non-OCR documents |
//! | [`storage`] | JSON file persistence |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |

pub mod aggregate;
pub mod channel;
pub mod commands;
pub mod config;
pub mod error;
pub mod extract;
pub mod json_extract;
pub mod locate;
pub mod models;
pub mod parse_cache;
pub mod provider;
pub mod server;
pub mod storage;
pub mod tasks;

//! # Citation Ledger
//!
//! A conversation source-citation engine for retrieval-augmented chat agents.
//!
//! Citation Ledger assigns stable, non-colliding numeric identifiers to
//! retrieval results returned across multiple tool invocations inside one
//! agent turn, and later reconstructs a user-facing chat history by
//! resolving those citations back into the underlying source records,
//! reading through a two-tier store (fast ephemeral cache, durable message
//! log) with backward-compatible fallback to older, non-indirected storage
//! formats.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────────┐
//! │ Agent runtime│──▶│ Normalizer   │──▶│ Message Log    │
//! │ (tool calls) │   │ counter ids │   │ SQLite         │
//! └──────────────┘   └─────────────┘   └──────┬────────┘
//!                                             │
//!                     ┌────────────┐          │
//!                     │ Ephemeral  │◀─────────┤
//!                     │ snapshot   │          ▼
//!                     └─────┬──────┘   ┌──────────────┐
//!                           └─────────▶│ Reconstructor │──▶ history
//!                                      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cite init                          # create database
//! cite history alice phys-101       # resolved conversation history
//! cite clear alice phys-101         # reset a conversation
//! cite serve api                    # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`message`] | Message log entries and typed tool payloads |
//! | [`counter`] | Per-conversation monotonic source counters |
//! | [`normalize`] | Tool result normalization |
//! | [`store`] | Two-tier conversation storage |
//! | [`history`] | History reconstruction |
//! | [`legacy`] | Pre-indirection compatibility resolvers |
//! | [`engine`] | Engine facade used by the CLI and server |
//! | [`server`] | JSON HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod counter;
pub mod db;
pub mod engine;
pub mod history;
pub mod legacy;
pub mod message;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod server;
pub mod stats;
pub mod store;

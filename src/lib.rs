//! # pkgmirage
//!
//! A local-first resolver that answers a package search with a mix of real
//! and invented package names.
//!
//! A generative model proposes candidate names for a query. Each candidate
//! is checked against a local snapshot of the package index: names that
//! exist become verified placeholders (later enriched from the index's
//! JSON API), names that do not get plausible metadata invented for them.
//! Results, README drafts and zip bundles are cached in SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ Generator  │──▶│  Existence   │──▶│  Synthesizer   │
//! │ (rounds)   │   │  index       │   │  + repair      │
//! └────────────┘   └──────────────┘   └───────┬────────┘
//!                                             │
//!                 ┌───────────────────────────┤
//!                 ▼                           ▼
//!          ┌──────────────┐           ┌──────────────┐
//!          │   Resolver   │──────────▶│ Cache tiers  │
//!          │  + enrich    │           │ query/doc/zip│
//!          └──────┬───────┘           └──────────────┘
//!                 │
//!         ┌───────┴───────┐
//!         ▼               ▼
//!    ┌─────────┐     ┌─────────┐
//!    │   CLI   │     │  HTTP   │
//!    │(mirage) │     │ (axum)  │
//!    └─────────┘     └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mirage init                     # create storage
//! mirage index refresh            # snapshot the package index
//! mirage search "terminal text editors" --limit 5
//! mirage serve                    # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | SQLite connections and schema |
//! | [`offload`] | Bounded blocking-work boundary |
//! | [`audit`] | JSON-lines audit log for model calls and repairs |
//! | [`llm`] | Chat-completions HTTP client |
//! | [`repair`] | Three-stage structured-text repair |
//! | [`existence`] | Ground-truth name snapshot and refresh policy |
//! | [`cache`] | Query, document and artifact tiers |
//! | [`generator`] | Multi-round candidate generation |
//! | [`synth`] | Invented metadata for unknown names |
//! | [`resolver`] | Result assembly |
//! | [`enrich`] | Authoritative metadata for verified names |
//! | [`readme`] | README drafting |
//! | [`artifact`] | Zip bundle building |
//! | [`app`] | Process wiring |
//! | [`server`] | HTTP API |
//! | [`stats`] | CLI storage overview |

pub mod app;
pub mod artifact;
pub mod audit;
pub mod cache;
pub mod config;
pub mod db;
pub mod enrich;
pub mod existence;
pub mod generator;
pub mod llm;
pub mod migrate;
pub mod offload;
pub mod readme;
pub mod repair;
pub mod resolver;
pub mod server;
pub mod stats;
pub mod synth;

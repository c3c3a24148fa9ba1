//! # pkgmirage core
//!
//! Shared, runtime-free logic for pkgmirage: result models, query and
//! candidate-name handling, the non-model stages of structured-text repair,
//! and the traits at the generative-model and name-source seams.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network
//! dependencies. Concrete HTTP clients and SQLite stores live in the
//! `pkgmirage` crate; in-memory doubles for tests live in [`testing`].

pub mod error;
pub mod existence;
pub mod llm;
pub mod models;
pub mod query;
pub mod repair;
pub mod testing;

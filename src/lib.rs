//! Backend for a social polling app: polls with options, tags and media,
//! one vote per voter, comments, and follows.
//!
//! Voters are either signed-in users or guests identified by a best-effort
//! browser fingerprint. Tallies are computed on read from the raw vote rows.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod media;
pub mod memory;
pub mod models;
pub mod poll;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod validate;

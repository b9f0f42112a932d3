//! `mailpress` — turn email messages into publishable posts.
//!
//! This crate provides the ingestion core: MIME walking and dispatch,
//! HTML sanitizing, content-addressed image assets, link previews, and a
//! versioned snapshot of the resulting post collection.

pub mod asset;
pub mod classify;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod preview;
pub mod sanitize;
pub mod snapshot;
pub mod source;

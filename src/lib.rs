//! Pinfall: content site and API for a bowling association.
//!
//! The interesting part of the crate is the cache-aside query layer in
//! [`cache`] and the document refresh pipeline in [`application::refresh`],
//! which broadcasts refresh progress to connected clients.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

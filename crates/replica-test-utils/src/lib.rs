//! Shared test utilities for the replica-sync workspace.
//!
//! This crate provides standardised fixtures so each crate's test suite does
//! not grow its own fake stores. It is a dev-dependency only and is never published.
//!
//! # Modules
//!
//! - [`http`] - [`FakeStoreServer`], a real HTTP server speaking the store API
//! - [`memory`] - [`InMemoryStore`], a `CollectionStore` without any network
//! - [`fixtures`] - stub sync procedures and log directories on disk

pub mod fixtures;
pub mod http;
pub mod memory;

pub use fixtures::{write_log, write_stub_script};
pub use http::{FakeStoreServer, closed_port_url};
pub use memory::InMemoryStore;

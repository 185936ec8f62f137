//! Typed SQLite client for a `User` / `UserPreference` / `Post` schema.
//!
//! # Intention
//!
//! - Provide create, read, update and delete calls with filtering, ordering,
//!   pagination and relation connect/disconnect, each one awaited round trip.
//! - Keep SQLite specifics (value conversion, DDL, constraint errors) in
//!   [`sqlite`] and [`error`], and the schema's shape in [`models`] and
//!   [`client`].
//! - Drive the whole surface from [`walkthrough`], the ordered list of calls
//!   the `orm-walkthrough` binary runs.
//!
//! # Architectural Boundaries
//!
//! - The client owns exactly one connection, opened by `Client::connect` and
//!   released by `Client::disconnect`.
//! - No retries and no partial-failure handling: an error ends the call that
//!   produced it.

pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod models;
pub mod projection;
pub mod service;
pub mod sqlite;
pub mod walkthrough;

pub use client::Client;
pub use error::{Result, StoreError};
pub use service::Service;

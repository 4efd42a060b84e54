//! # Satchel Core Library
//!
//! This crate contains the core logic of `satchel`, a package manager for
//! local agent, command and skill tools. Tools are published as ZIP archives
//! in a registry document and installed per project under `.satchel/`.
//!
//! The `satchel` CLI is built on this library, but the pieces can be reused on
//! their own.
//!
//! ## Modules Overview
//! - [`archive`] – Guarded ZIP extraction, archive creation, hashing and path containment
//! - [`registry`] – The registry document and version resolution
//! - [`global`] – Default directories and the TTL cache for the registry document
//! - [`lock`] – The lock document (`satchel-lock.json`) and its atomic store
//! - [`fetch`] – Fetching registry documents and archives
//! - [`installer`] – Install, update and uninstall orchestration
//! - [`config`] – `satchel.toml` settings
//! - [`logging`] – `tracing` subscriber setup
//! - [`util`] – Shared helpers (names, versions, timestamps, atomic writes)
//! - [`error`] – The crate error type

pub mod archive;
pub mod config;
pub mod error;
pub mod fetch;
pub mod global;
pub mod installer;
pub mod lock;
pub mod logging;
pub mod registry;
pub mod util;

pub use archive::{ArchiveLimits, Archiver};
pub use config::Settings;
pub use error::{ErrorKind, Result, SatchelError};
pub use fetch::{Fetcher, HttpFetcher};
pub use global::cache::RegistryCache;
pub use installer::*;
pub use lock::*;
pub use registry::*;

//! OTA Image Server Library
//!
//! Firmware image distribution for devices identified by an 8-hex-char
//! serial: manifest listing, download, single-request upload, and the
//! chunked upload protocol with per-file sessions, inactivity abandonment,
//! and hash-chain finalization. The server binary lives in main.rs.
//!
//! # Modules
//!
//! - `config`: environment-driven configuration
//! - `state`: shared application state
//! - `storage`: filesystem image store and manifest parsing
//! - `upload`: the chunked upload core (validator, sessions, hash chain)
//! - `routes`: HTTP surface

pub mod config;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;

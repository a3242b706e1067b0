//! colldb - per-collection document mutation engine
//!
//! A collection owns a physical store and routes every document write
//! through the same pipeline: validate, build the new version, check the
//! expected revision, stamp a fresh revision and persist.

pub mod checksum;
pub mod cli;
pub mod collection;
pub mod config;
pub mod document;
pub mod mutation;
pub mod observability;
pub mod revision;
pub mod store;

#![forbid(unsafe_code)]

//! Upload ingestion, JSON catalog and remote metadata lookup for the
//! clipshelf backend.

pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod naming;
pub mod probe;
pub mod security;
pub mod upload;

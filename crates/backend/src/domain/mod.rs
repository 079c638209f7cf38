//! Domain types: documents, RPC action items and node configuration.

pub mod action;
pub mod config;
pub mod document;

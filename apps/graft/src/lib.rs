//! # graft
//!
//! The network-facing half of graft: configuration, the JSON-lines record
//! reader and the Gremlin Server client. The tracking and staging engine lives
//! in `graft-core`.

pub mod config;
pub mod gremlin;
pub mod reader;

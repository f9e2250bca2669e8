//! Connection module
//!
//! This module handles all communication with HQ, including the REST
//! client and the wire types of the heartbeat/status contract.

pub mod http;
pub mod protocol;

//! Graph store client for weft
//!
//! Connects to a FalkorDB-compatible property graph over the Redis wire
//! protocol and provides parameterized Cypher queries with typed scalar
//! results.

mod config;
mod connection;
pub mod cypher;

pub use config::GraphConfig;
pub use connection::{GraphClient, ResultSet, Scalar};
pub use cypher::Param;

//! Graph store connection management
//!
//! Wraps a redis connection manager and exposes a typed interface for
//! Cypher queries issued through the `GRAPH.QUERY` command.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::config::GraphConfig;
use crate::cypher::{self, Param};

/// A single scalar value in a query result row.
///
/// The store's verbose reply mode encodes doubles and booleans as strings;
/// the conversion helpers accept both the native and the stringly form.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            Scalar::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(f) => Some(*f),
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            Scalar::Str(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Result of a graph query: named columns and scalar rows.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Graph store connection wrapper
#[derive(Clone)]
pub struct GraphClient {
    conn: ConnectionManager,
    graph: String,
    timeout: Duration,
}

impl GraphClient {
    /// Connect to the graph store.
    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        info!("Connecting to graph store: {}", config.url);
        let client = redis::Client::open(config.url.as_str())
            .context("Failed to parse graph store URL")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to graph store")?;
        info!("Connected to graph: {}", config.graph);
        Ok(Self {
            conn,
            graph: config.graph.clone(),
            timeout: config.request_timeout(),
        })
    }

    /// Run a parameterized Cypher query and parse the reply into scalars.
    ///
    /// Every call is bounded by the configured timeout; a timeout is reported
    /// the same way as any other failed call.
    pub async fn query(&self, query: &str, params: &[(&str, Param)]) -> Result<ResultSet> {
        let full = cypher::with_params(params, query);
        debug!("GRAPH.QUERY {}: {}", self.graph, full);
        let mut conn = self.conn.clone();
        let graph = self.graph.clone();
        let value = tokio::time::timeout(self.timeout, async move {
            redis::cmd("GRAPH.QUERY")
                .arg(&graph)
                .arg(&full)
                .query_async::<redis::Value>(&mut conn)
                .await
        })
        .await
        .map_err(|_| anyhow!("Graph query timed out after {:?}", self.timeout))?
        .context("Graph query failed")?;
        parse_reply(&value)
    }

    /// Name of the graph queries run against.
    pub fn graph(&self) -> &str {
        &self.graph
    }
}

/// Parse a `GRAPH.QUERY` reply.
///
/// Read queries reply with `[columns, rows, statistics]`; write-only queries
/// reply with `[statistics]` alone.
fn parse_reply(value: &redis::Value) -> Result<ResultSet> {
    let items = match value {
        redis::Value::Array(items) => items,
        other => return Err(anyhow!("Unexpected graph reply shape: {:?}", other)),
    };
    if items.len() < 3 {
        // Statistics only: no result rows.
        return Ok(ResultSet::default());
    }

    let columns = match &items[0] {
        redis::Value::Array(cols) => cols.iter().filter_map(value_to_string).collect(),
        _ => Vec::new(),
    };

    let rows = match &items[1] {
        redis::Value::Array(rows) => rows
            .iter()
            .map(|row| match row {
                redis::Value::Array(cells) => cells.iter().map(parse_scalar).collect(),
                other => vec![parse_scalar(other)],
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(ResultSet { columns, rows })
}

fn parse_scalar(value: &redis::Value) -> Scalar {
    match value {
        redis::Value::Nil => Scalar::Null,
        redis::Value::Int(i) => Scalar::Int(*i),
        redis::Value::Double(d) => Scalar::Float(*d),
        redis::Value::Boolean(b) => Scalar::Bool(*b),
        redis::Value::BulkString(bytes) => {
            Scalar::Str(String::from_utf8_lossy(bytes).into_owned())
        }
        redis::Value::SimpleString(s) => Scalar::Str(s.clone()),
        redis::Value::Okay => Scalar::Str("OK".to_string()),
        // Nested values only appear when a query returns whole nodes or
        // relations; callers project scalar columns instead.
        _ => Scalar::Null,
    }
}

fn value_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

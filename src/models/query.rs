//! Query-related data models.
//!
//! This module defines statement requests and the normalized result shape
//! every operation returns.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single result row keyed by column name.
pub type Record = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Arrays and objects, bound as JSON
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Json(_) => "json",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
    /// Only positive integral values cap a SELECT; anything else is ignored
    #[serde(default)]
    pub limit: Option<serde_json::Number>,
}

impl QueryRequest {
    /// Create a new request without parameters or row cap.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            limit: None,
        }
    }

    /// Add a parameter to this statement.
    pub fn with_param(mut self, param: QueryParam) -> Self {
        self.params.push(param);
        self
    }

    /// Set the row cap.
    pub fn with_limit(mut self, limit: impl Into<serde_json::Number>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    /// The row cap, if the supplied limit is a positive integer.
    ///
    /// `0`, negative numbers and fractional values yield `None`; integral
    /// floats such as `10.0` are accepted.
    pub fn row_cap(&self) -> Option<u64> {
        let limit = self.limit.as_ref()?;
        if let Some(n) = limit.as_u64() {
            return (n > 0).then_some(n);
        }
        let f = limit.as_f64()?;
        if f.is_finite() && f >= 1.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
            Some(f as u64)
        } else {
            None
        }
    }
}

/// Column metadata with a canonical type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    /// Canonical uppercase type name, e.g. "LONGLONG" or "VAR_STRING"
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

/// Write-outcome metadata, analogous to a result-set header with no rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub affected_rows: u64,
    #[serde(default)]
    pub insert_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_status: Option<u16>,
}

impl ExecutionSummary {
    pub fn new(affected_rows: u64, insert_id: u64) -> Self {
        Self {
            affected_rows,
            insert_id,
            server_status: None,
        }
    }

    pub fn with_server_status(mut self, server_status: u16) -> Self {
        self.server_status = Some(server_status);
        self
    }
}

/// The uniform shape returned by every operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub rows: Vec<Record>,
    pub fields: Vec<FieldDescriptor>,
    /// Absent (null) for pure reads
    pub summary: Option<ExecutionSummary>,
}

impl NormalizedResult {
    /// Create a result for read statements.
    pub fn read(rows: Vec<Record>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            rows,
            fields,
            summary: None,
        }
    }

    /// Create a result for write statements (INSERT/UPDATE/DELETE).
    pub fn write(summary: ExecutionSummary) -> Self {
        Self {
            rows: Vec::new(),
            fields: Vec::new(),
            summary: Some(summary),
        }
    }

    /// Get the number of rows in the result.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

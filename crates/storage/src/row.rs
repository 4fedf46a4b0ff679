//! Driver-neutral parameter values and result rows

use crate::StorageError;

/// Value bound to, or decoded from, a query
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// One result row with named columns in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new(columns: Vec<(String, SqlValue)>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    fn require(&self, column: &str) -> Result<&SqlValue, StorageError> {
        self.get(column)
            .ok_or_else(|| StorageError::decode(column, "missing column"))
    }

    pub fn get_str(&self, column: &str) -> Result<&str, StorageError> {
        match self.require(column)? {
            SqlValue::Text(s) => Ok(s),
            other => Err(StorageError::decode(column, format!("expected text, got {other:?}"))),
        }
    }

    pub fn get_opt_i64(&self, column: &str) -> Result<Option<i64>, StorageError> {
        match self.require(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Int(v) => Ok(Some(*v)),
            other => Err(StorageError::decode(column, format!("expected integer, got {other:?}"))),
        }
    }

    pub fn get_i64(&self, column: &str) -> Result<i64, StorageError> {
        self.get_opt_i64(column)?
            .ok_or_else(|| StorageError::decode(column, "unexpected NULL"))
    }

    /// Integers widen to floats; text is parsed (DECIMAL columns may arrive as text)
    pub fn get_opt_f64(&self, column: &str) -> Result<Option<f64>, StorageError> {
        match self.require(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Float(v) => Ok(Some(*v)),
            SqlValue::Int(v) => Ok(Some(*v as f64)),
            SqlValue::Text(s) => s
                .parse::<f64>()
                .map(Some)
                .map_err(|_| StorageError::decode(column, format!("not a number: '{s}'"))),
        }
    }

    pub fn get_f64(&self, column: &str) -> Result<f64, StorageError> {
        self.get_opt_f64(column)?
            .ok_or_else(|| StorageError::decode(column, "unexpected NULL"))
    }
}

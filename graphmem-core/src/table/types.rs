//! Typed values, schemas and record batches exchanged with table stores.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    Utf8,
    /// Ordered list of strings (keywords, attribute names)
    Utf8List,
    /// Float vector (embeddings)
    Float32List,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "bool"),
            DataType::Int64 => write!(f, "int64"),
            DataType::Float64 => write!(f, "float64"),
            DataType::Utf8 => write!(f, "utf8"),
            DataType::Utf8List => write!(f, "list<utf8>"),
            DataType::Float32List => write!(f, "list<f32>"),
        }
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bool" => Ok(DataType::Boolean),
            "int64" => Ok(DataType::Int64),
            "float64" => Ok(DataType::Float64),
            "utf8" => Ok(DataType::Utf8),
            "list<utf8>" => Ok(DataType::Utf8List),
            "list<f32>" => Ok(DataType::Float32List),
            other => Err(Error::Internal(format!("Unknown data type: {}", other))),
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered column set of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    fields: Vec<Field>,
}

impl TableSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Column names in declared order.
    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Sub-schema with the given columns, in the given order.
    pub fn project(&self, names: &[&str]) -> Result<TableSchema> {
        let mut fields = Vec::with_capacity(names.len());
        for name in names {
            let field = self.field(name).ok_or_else(|| {
                Error::schema_mismatch(format!("unknown column '{}'", name), self.names())
            })?;
            fields.push(field.clone());
        }
        Ok(TableSchema::new(fields))
    }

    /// Check that a batch carries exactly this column set, in order, with
    /// values of the declared types.
    pub fn validate_batch(&self, batch: &RecordBatch) -> Result<()> {
        if batch.schema() != self {
            let supplied = batch.schema().names();
            let message = if supplied == self.names() {
                "column types differ from the registered schema".to_string()
            } else {
                format!("supplied columns [{}]", supplied.join(", "))
            };
            return Err(Error::schema_mismatch(message, self.names()));
        }
        self.validate_rows(batch.rows())
    }

    /// Check that every value matches its column's type. A batch whose schema
    /// is a projection of this one passes through here too.
    pub fn validate_rows(&self, rows: &[Vec<Value>]) -> Result<()> {
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != self.fields.len() {
                return Err(Error::schema_mismatch(
                    format!(
                        "row {} has {} values for {} columns",
                        row_idx,
                        row.len(),
                        self.fields.len()
                    ),
                    self.names(),
                ));
            }
            for (field, value) in self.fields.iter().zip(row) {
                if !value.matches(field.data_type) {
                    return Err(Error::schema_mismatch(
                        format!(
                            "row {} column '{}' expected {}, got {}",
                            row_idx,
                            field.name,
                            field.data_type,
                            value.type_name()
                        ),
                        self.names(),
                    ));
                }
                if !value.is_finite() {
                    return Err(Error::schema_mismatch(
                        format!(
                            "row {} column '{}' holds a non-finite float",
                            row_idx, field.name
                        ),
                        self.names(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Utf8List(Vec<String>),
    Float32List(Vec<f32>),
}

impl Value {
    /// Whether this value can be stored in a column of the given type.
    /// Null fits every column.
    pub fn matches(&self, data_type: DataType) -> bool {
        matches!(
            (self, data_type),
            (Value::Null, _)
                | (Value::Boolean(_), DataType::Boolean)
                | (Value::Int64(_), DataType::Int64)
                | (Value::Float64(_), DataType::Float64)
                | (Value::Utf8(_), DataType::Utf8)
                | (Value::Utf8List(_), DataType::Utf8List)
                | (Value::Float32List(_), DataType::Float32List)
        )
    }

    /// False for NaN or infinite floats, which have no JSON encoding.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Float64(f) => f.is_finite(),
            Value::Float32List(v) => v.iter().all(|f| f.is_finite()),
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "bool",
            Value::Int64(_) => "int64",
            Value::Float64(_) => "float64",
            Value::Utf8(_) => "utf8",
            Value::Utf8List(_) => "list<utf8>",
            Value::Float32List(_) => "list<f32>",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            Value::Utf8List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32_list(&self) -> Option<&[f32]> {
        match self {
            Value::Float32List(v) => Some(v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Boolean(b) => json!(b),
            Value::Int64(i) => json!(i),
            Value::Float64(f) => json!(f),
            Value::Utf8(s) => json!(s),
            Value::Utf8List(v) => json!(v),
            Value::Float32List(v) => json!(v),
        }
    }

    /// Decode a JSON cell using the column type to disambiguate.
    pub fn from_json(data_type: DataType, json: &JsonValue) -> Result<Value> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let bad = || {
            Error::Internal(format!(
                "Stored value {} does not decode as {}",
                json, data_type
            ))
        };
        let value = match data_type {
            DataType::Boolean => Value::Boolean(json.as_bool().ok_or_else(bad)?),
            DataType::Int64 => Value::Int64(json.as_i64().ok_or_else(bad)?),
            DataType::Float64 => Value::Float64(json.as_f64().ok_or_else(bad)?),
            DataType::Utf8 => Value::Utf8(json.as_str().ok_or_else(bad)?.to_string()),
            DataType::Utf8List => Value::Utf8List(serde_json::from_value(json.clone())?),
            DataType::Float32List => Value::Float32List(serde_json::from_value(json.clone())?),
        };
        Ok(value)
    }

    /// Ordering used when clustering rows during compaction. Values of
    /// different types order by type name.
    pub(crate) fn cluster_cmp(&self, other: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Utf8(a), Value::Utf8(b)) => a.cmp(b),
            (Value::Utf8List(a), Value::Utf8List(b)) => a.cmp(b),
            (Value::Float32List(a), Value::Float32List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => a.type_name().cmp(b.type_name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Utf8(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Utf8(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Utf8(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float64(f)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Utf8List(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::Float32List(v)
    }
}

/// Rows aligned to a schema. This is the unit of every table read and write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    schema: TableSchema,
    rows: Vec<Vec<Value>>,
}

impl RecordBatch {
    /// Build a batch, checking arity and value types against the schema.
    pub fn try_new(schema: TableSchema, rows: Vec<Vec<Value>>) -> Result<Self> {
        schema.validate_rows(&rows)?;
        Ok(Self { schema, rows })
    }

    pub fn empty(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Build a batch from columns. Every column must have the same length.
    pub fn from_columns(columns: Vec<(Field, Vec<Value>)>) -> Result<Self> {
        let num_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        for (field, values) in &columns {
            if values.len() != num_rows {
                return Err(Error::LengthMismatch {
                    column: field.name.clone(),
                    expected: num_rows,
                    actual: values.len(),
                });
            }
        }

        let mut rows: Vec<Vec<Value>> = (0..num_rows)
            .map(|_| Vec::with_capacity(columns.len()))
            .collect();
        let mut fields = Vec::with_capacity(columns.len());
        for (field, values) in columns {
            for (row, value) in rows.iter_mut().zip(values) {
                row.push(value);
            }
            fields.push(field);
        }

        Self::try_new(TableSchema::new(fields), rows)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.schema.index_of(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    pub fn value(&self, row: usize, name: &str) -> Option<&Value> {
        let idx = self.schema.index_of(name)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Keep rows whose value in `column` satisfies `predicate`. An unknown
    /// column yields an empty batch with the same schema.
    pub fn filter_by<F>(&self, column: &str, predicate: F) -> RecordBatch
    where
        F: Fn(&Value) -> bool,
    {
        let rows = match self.schema.index_of(column) {
            Some(idx) => self
                .rows
                .iter()
                .filter(|row| predicate(&row[idx]))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        RecordBatch {
            schema: self.schema.clone(),
            rows,
        }
    }
}

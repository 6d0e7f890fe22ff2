//! Record types and request builders for memories.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{metadata_schema, DELETED, MEMORY_ID};
use crate::table::{DataType, Field, RecordBatch, TableSchema, Value};

/// Metadata record of a memory, one row of its metadata table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub id: String,
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub embedding: Vec<f32>,
    pub is_deleted: bool,
    pub storage_path: String,
    /// Custom node columns, in declared order
    pub node_attribute_names: Vec<String>,
    /// Custom edge columns, in declared order
    pub edge_attribute_names: Vec<String>,
}

impl MemoryMetadata {
    /// Row in metadata table column order.
    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::from(self.id.as_str()),
            Value::from(self.title.as_str()),
            Value::from(self.description.as_str()),
            Value::from(self.keywords.clone()),
            Value::from(self.embedding.clone()),
            Value::from(self.is_deleted),
            Value::from(self.storage_path.as_str()),
            Value::from(self.node_attribute_names.clone()),
            Value::from(self.edge_attribute_names.clone()),
        ]
    }

    /// Single-row batch under the metadata schema.
    pub fn to_batch(&self) -> Result<RecordBatch> {
        RecordBatch::try_new(metadata_schema(), vec![self.to_row()])
    }

    /// Decode every row of a metadata-shaped batch.
    pub fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let expected = metadata_schema();
        if batch.schema() != &expected {
            return Err(Error::schema_mismatch(
                format!(
                    "metadata table has columns [{}]",
                    batch.schema().names().join(", ")
                ),
                expected.names(),
            ));
        }

        (0..batch.num_rows())
            .map(|row| {
                let cell = |name: &str| batch.value(row, name).unwrap_or(&NULL);
                Ok(Self {
                    id: text(cell("id")),
                    title: text(cell("title")),
                    description: text(cell("description")),
                    keywords: strings(cell("keywords")),
                    embedding: floats(cell("embedding")),
                    is_deleted: cell("is_deleted").as_bool().unwrap_or(false),
                    storage_path: text(cell("storage_path")),
                    node_attribute_names: strings(cell("node_attribute_names")),
                    edge_attribute_names: strings(cell("edge_attribute_names")),
                })
            })
            .collect()
    }
}

static NULL: Value = Value::Null;

fn text(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

fn strings(value: &Value) -> Vec<String> {
    value.as_str_list().map(<[String]>::to_vec).unwrap_or_default()
}

fn floats(value: &Value) -> Vec<f32> {
    value.as_f32_list().map(<[f32]>::to_vec).unwrap_or_default()
}

/// Parameters for [`Memory::create`](super::Memory::create).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewMemory {
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub embedding: Vec<f32>,
    pub node_attributes: Vec<Field>,
    pub edge_attributes: Vec<Field>,
}

impl NewMemory {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Declare a custom node column.
    pub fn with_node_attribute(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.node_attributes.push(Field::new(name, data_type));
        self
    }

    /// Declare a custom edge column.
    pub fn with_edge_attribute(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.edge_attributes.push(Field::new(name, data_type));
        self
    }
}

/// Partial metadata change. Fields left `None` keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub embedding: Option<Vec<f32>>,
}

impl MetadataUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = Some(keywords);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.keywords.is_none()
            && self.embedding.is_none()
    }

    pub(crate) fn apply(self, metadata: &mut MemoryMetadata) {
        if let Some(title) = self.title {
            metadata.title = title;
        }
        if let Some(description) = self.description {
            metadata.description = description;
        }
        if let Some(keywords) = self.keywords {
            metadata.keywords = keywords;
        }
        if let Some(embedding) = self.embedding {
            metadata.embedding = embedding;
        }
    }
}

/// Columns shared by node and edge batches.
#[derive(Debug, Clone, Default, PartialEq)]
struct BaseColumns {
    weights: Vec<f64>,
    labels: Vec<String>,
    descriptions: Vec<String>,
    keywords: Vec<Vec<String>>,
    embeddings: Vec<Vec<f32>>,
    attributes: Vec<(String, Vec<Value>)>,
}

impl BaseColumns {
    fn push_into(self, schema: &TableSchema, columns: &mut Vec<(Field, Vec<Value>)>) {
        let column = |name: &str, data_type| Field::new(name, data_type);
        columns.push((
            column("weight", DataType::Float64),
            self.weights.into_iter().map(Value::from).collect(),
        ));
        columns.push((
            column("label", DataType::Utf8),
            self.labels.into_iter().map(Value::from).collect(),
        ));
        columns.push((
            column("description", DataType::Utf8),
            self.descriptions.into_iter().map(Value::from).collect(),
        ));
        columns.push((
            column("keywords", DataType::Utf8List),
            self.keywords.into_iter().map(Value::from).collect(),
        ));
        columns.push((
            column("embedding", DataType::Float32List),
            self.embeddings.into_iter().map(Value::from).collect(),
        ));
        let rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        columns.push((
            column(DELETED, DataType::Boolean),
            vec![Value::Boolean(false); rows],
        ));

        // Custom attributes follow the declared order; unknown names sort last
        // and are rejected by schema validation.
        let mut attributes = self.attributes;
        attributes.sort_by_key(|(name, _)| schema.index_of(name).unwrap_or(usize::MAX));
        for (name, values) in attributes {
            let data_type = schema
                .field(&name)
                .map(|f| f.data_type)
                .or_else(|| values.iter().find(|v| **v != Value::Null).map(infer_type))
                .unwrap_or(DataType::Utf8);
            columns.push((Field::new(name, data_type), values));
        }
    }
}

fn infer_type(value: &Value) -> DataType {
    match value {
        Value::Boolean(_) => DataType::Boolean,
        Value::Int64(_) => DataType::Int64,
        Value::Float64(_) => DataType::Float64,
        Value::Utf8List(_) => DataType::Utf8List,
        Value::Float32List(_) => DataType::Float32List,
        Value::Utf8(_) | Value::Null => DataType::Utf8,
    }
}

/// Check that the assembled batch matches the table schema exactly.
fn finish(schema: &TableSchema, columns: Vec<(Field, Vec<Value>)>) -> Result<RecordBatch> {
    let batch = RecordBatch::from_columns(columns)?;
    schema.validate_batch(&batch)?;
    Ok(batch)
}

/// Column-oriented batch of new nodes.
///
/// Every column must have one value per node. Custom attributes declared on
/// the memory must all be supplied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeBatch {
    base: BaseColumns,
}

impl NodeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.base.labels = labels;
        self
    }

    pub fn with_weights(mut self, weights: Vec<f64>) -> Self {
        self.base.weights = weights;
        self
    }

    pub fn with_descriptions(mut self, descriptions: Vec<String>) -> Self {
        self.base.descriptions = descriptions;
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<Vec<String>>) -> Self {
        self.base.keywords = keywords;
        self
    }

    pub fn with_embeddings(mut self, embeddings: Vec<Vec<f32>>) -> Self {
        self.base.embeddings = embeddings;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.base.attributes.push((name.into(), values));
        self
    }

    /// Number of nodes, counted by labels.
    pub fn len(&self) -> usize {
        self.base.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn into_record_batch(
        self,
        memory_id: &str,
        node_ids: &[String],
        schema: &TableSchema,
    ) -> Result<RecordBatch> {
        let mut columns = vec![
            (
                Field::new(MEMORY_ID, DataType::Utf8),
                vec![Value::from(memory_id); node_ids.len()],
            ),
            (
                Field::new("node_id", DataType::Utf8),
                node_ids.iter().map(|id| Value::from(id.as_str())).collect(),
            ),
        ];
        self.base.push_into(schema, &mut columns);
        finish(schema, columns)
    }
}

/// Column-oriented batch of new edges. Endpoints are node ids and are not
/// checked against the node table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeBatch {
    sources: Vec<String>,
    targets: Vec<String>,
    base: BaseColumns,
}

impl EdgeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoints(mut self, sources: Vec<String>, targets: Vec<String>) -> Self {
        self.sources = sources;
        self.targets = targets;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.base.labels = labels;
        self
    }

    pub fn with_weights(mut self, weights: Vec<f64>) -> Self {
        self.base.weights = weights;
        self
    }

    pub fn with_descriptions(mut self, descriptions: Vec<String>) -> Self {
        self.base.descriptions = descriptions;
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<Vec<String>>) -> Self {
        self.base.keywords = keywords;
        self
    }

    pub fn with_embeddings(mut self, embeddings: Vec<Vec<f32>>) -> Self {
        self.base.embeddings = embeddings;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.base.attributes.push((name.into(), values));
        self
    }

    /// Number of edges, counted by labels.
    pub fn len(&self) -> usize {
        self.base.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn into_record_batch(
        self,
        memory_id: &str,
        edge_ids: &[String],
        schema: &TableSchema,
    ) -> Result<RecordBatch> {
        let mut columns = vec![
            (
                Field::new(MEMORY_ID, DataType::Utf8),
                vec![Value::from(memory_id); edge_ids.len()],
            ),
            (
                Field::new("edge_id", DataType::Utf8),
                edge_ids.iter().map(|id| Value::from(id.as_str())).collect(),
            ),
            (
                Field::new("source_node_id", DataType::Utf8),
                self.sources.into_iter().map(Value::from).collect(),
            ),
            (
                Field::new("target_node_id", DataType::Utf8),
                self.targets.into_iter().map(Value::from).collect(),
            ),
        ];
        self.base.push_into(schema, &mut columns);
        finish(schema, columns)
    }
}

/// Per-row column values to overwrite on existing nodes or edges.
///
/// Each column carries one value per id passed to the update call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributePatch {
    columns: Vec<(String, Vec<Value>)>,
}

impl AttributePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.columns.push((name.into(), values));
        self
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Merge source batch: the id column followed by the patched columns,
    /// typed from the table schema.
    pub(crate) fn into_record_batch(
        self,
        id_column: &str,
        ids: &[String],
        schema: &TableSchema,
        identity_columns: &[&str],
    ) -> Result<RecordBatch> {
        if let Some(name) = self.column_names().find(|c| identity_columns.contains(c)) {
            return Err(Error::ImmutableColumn(name.to_string()));
        }

        let mut columns = vec![(
            Field::new(id_column, DataType::Utf8),
            ids.iter().map(|id| Value::from(id.as_str())).collect(),
        )];
        for (name, values) in self.columns {
            let field = schema.field(&name).cloned().ok_or_else(|| {
                Error::schema_mismatch(format!("unknown column '{}'", name), schema.names())
            })?;
            columns.push((field, values));
        }
        RecordBatch::from_columns(columns)
    }
}

/// Result of an update or soft delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOutcome {
    /// Ids passed to the call, unchanged
    pub requested: Vec<String>,
    /// Requested ids that matched no stored row
    pub unmatched: Vec<String>,
}

impl PatchOutcome {
    pub(crate) fn new(requested: &[String], unmatched_keys: Vec<Value>) -> Self {
        Self {
            requested: requested.to_vec(),
            unmatched: unmatched_keys.iter().map(Value::to_string).collect(),
        }
    }

    /// Requested ids that were applied.
    pub fn matched(&self) -> Vec<&str> {
        self.requested
            .iter()
            .filter(|id| !self.unmatched.contains(id))
            .map(String::as_str)
            .collect()
    }
}

//! Table schemas for memory metadata, nodes and edges.
//!
//! Node and edge tables share a fixed base layout and are extended with
//! caller-declared attribute columns when a memory is created. The resulting
//! [`GraphSchema`] is built once and used to validate every batch before it
//! reaches storage.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::table::{DataType, Field, TableSchema};

pub const MEMORY_ID: &str = "memory_id";
pub const NODE_ID: &str = "node_id";
pub const EDGE_ID: &str = "edge_id";
pub const SOURCE_NODE_ID: &str = "source_node_id";
pub const TARGET_NODE_ID: &str = "target_node_id";
pub const DELETED: &str = "deleted";

/// Columns of nodes that can never be patched.
pub const NODE_IDENTITY_COLUMNS: &[&str] = &[MEMORY_ID, NODE_ID];

/// Columns of edges that can never be patched.
pub const EDGE_IDENTITY_COLUMNS: &[&str] = &[MEMORY_ID, EDGE_ID, SOURCE_NODE_ID, TARGET_NODE_ID];

/// Schema of the metadata table and of the memory index.
pub fn metadata_schema() -> TableSchema {
    TableSchema::new(vec![
        Field::new("id", DataType::Utf8),
        Field::new("title", DataType::Utf8),
        Field::new("description", DataType::Utf8),
        Field::new("keywords", DataType::Utf8List),
        Field::new("embedding", DataType::Float32List),
        Field::new("is_deleted", DataType::Boolean),
        Field::new("storage_path", DataType::Utf8),
        Field::new("node_attribute_names", DataType::Utf8List),
        Field::new("edge_attribute_names", DataType::Utf8List),
    ])
}

/// Base columns every node row carries.
pub fn node_base_schema() -> TableSchema {
    TableSchema::new(vec![
        Field::new(MEMORY_ID, DataType::Utf8),
        Field::new(NODE_ID, DataType::Utf8),
        Field::new("weight", DataType::Float64),
        Field::new("label", DataType::Utf8),
        Field::new("description", DataType::Utf8),
        Field::new("keywords", DataType::Utf8List),
        Field::new("embedding", DataType::Float32List),
        Field::new(DELETED, DataType::Boolean),
    ])
}

/// Base columns every edge row carries.
pub fn edge_base_schema() -> TableSchema {
    TableSchema::new(vec![
        Field::new(MEMORY_ID, DataType::Utf8),
        Field::new(EDGE_ID, DataType::Utf8),
        Field::new(SOURCE_NODE_ID, DataType::Utf8),
        Field::new(TARGET_NODE_ID, DataType::Utf8),
        Field::new("weight", DataType::Float64),
        Field::new("label", DataType::Utf8),
        Field::new("description", DataType::Utf8),
        Field::new("keywords", DataType::Utf8List),
        Field::new("embedding", DataType::Float32List),
        Field::new(DELETED, DataType::Boolean),
    ])
}

/// Node table schema: base columns followed by the custom attributes.
pub fn node_schema(custom: &[Field]) -> Result<TableSchema> {
    extend(node_base_schema(), custom)
}

/// Edge table schema: base columns followed by the custom attributes.
pub fn edge_schema(custom: &[Field]) -> Result<TableSchema> {
    extend(edge_base_schema(), custom)
}

fn extend(base: TableSchema, custom: &[Field]) -> Result<TableSchema> {
    let mut seen: HashSet<&str> = base.fields().iter().map(|f| f.name.as_str()).collect();
    for field in custom {
        if !seen.insert(field.name.as_str()) {
            return Err(Error::SchemaConflict(field.name.clone()));
        }
    }

    let mut fields = base.fields().to_vec();
    fields.extend_from_slice(custom);
    Ok(TableSchema::new(fields))
}

/// Custom columns of a table schema, given its base schema.
fn custom_fields(base: &TableSchema, schema: &TableSchema) -> Result<Vec<Field>> {
    let prefix = schema.fields().get(..base.len());
    if prefix != Some(base.fields()) {
        return Err(Error::schema_mismatch(
            "stored table does not start with the base columns",
            base.names(),
        ));
    }
    Ok(schema.fields()[base.len()..].to_vec())
}

fn check_attributes(
    kind: &str,
    base: &TableSchema,
    schema: &TableSchema,
    expected: &[String],
) -> Result<()> {
    let stored: Vec<String> = custom_fields(base, schema)?
        .into_iter()
        .map(|f| f.name)
        .collect();
    if stored != expected {
        return Err(Error::schema_mismatch(
            format!(
                "{} table attributes [{}] differ from metadata",
                kind,
                stored.join(", ")
            ),
            base.names().into_iter().chain(expected.iter().cloned()).collect(),
        ));
    }
    Ok(())
}

/// Node and edge schemas of one memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSchema {
    nodes: TableSchema,
    edges: TableSchema,
}

impl GraphSchema {
    /// Build from custom attribute declarations.
    pub fn new(node_attributes: &[Field], edge_attributes: &[Field]) -> Result<Self> {
        Ok(Self {
            nodes: node_schema(node_attributes)?,
            edges: edge_schema(edge_attributes)?,
        })
    }

    /// Rebuild from stored table schemas, checking them against the
    /// attribute names recorded in the memory's metadata.
    pub fn from_tables(
        nodes: TableSchema,
        edges: TableSchema,
        node_attribute_names: &[String],
        edge_attribute_names: &[String],
    ) -> Result<Self> {
        check_attributes("node", &node_base_schema(), &nodes, node_attribute_names)?;
        check_attributes("edge", &edge_base_schema(), &edges, edge_attribute_names)?;
        Ok(Self { nodes, edges })
    }

    pub fn nodes(&self) -> &TableSchema {
        &self.nodes
    }

    pub fn edges(&self) -> &TableSchema {
        &self.edges
    }

    pub fn node_attributes(&self) -> Vec<Field> {
        custom_fields(&node_base_schema(), &self.nodes).unwrap_or_default()
    }

    pub fn edge_attributes(&self) -> Vec<Field> {
        custom_fields(&edge_base_schema(), &self.edges).unwrap_or_default()
    }

    pub fn node_attribute_names(&self) -> Vec<String> {
        self.node_attributes().into_iter().map(|f| f.name).collect()
    }

    pub fn edge_attribute_names(&self) -> Vec<String> {
        self.edge_attributes().into_iter().map(|f| f.name).collect()
    }
}

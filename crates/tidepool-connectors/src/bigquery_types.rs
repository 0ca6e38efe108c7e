//! BigQuery REST v2 payloads and their conversion to Arrow.
//!
//! Query results arrive as `{"f": [{"v": ...}]}` rows with every scalar
//! rendered as a JSON string, so decoding is driven by the table schema.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConnectorError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<TableFieldSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableFieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    /// NULLABLE, REQUIRED or REPEATED. Absent means NULLABLE.
    #[serde(default)]
    pub mode: Option<String>,
    /// Sub-fields of a RECORD/STRUCT.
    #[serde(default)]
    pub fields: Option<Vec<TableFieldSchema>>,
}

impl TableFieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }

    fn is_required(&self) -> bool {
        self.mode.as_deref() == Some("REQUIRED")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub f: Vec<TableCell>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub v: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorProto {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl std::fmt::Display for ErrorProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.reason.as_deref().unwrap_or("error"),
            self.message.as_deref().unwrap_or("no message")
        )
    }
}

/// Response of `jobs.query` and `jobs.getQueryResults`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub job_reference: Option<JobReference>,
    #[serde(default)]
    pub job_complete: Option<bool>,
    #[serde(default)]
    pub schema: Option<TableSchema>,
    #[serde(default)]
    pub rows: Option<Vec<TableRow>>,
    #[serde(default)]
    pub page_token: Option<String>,
    /// Serialized as a decimal string.
    #[serde(default)]
    pub total_rows: Option<String>,
    #[serde(default)]
    pub errors: Option<Vec<ErrorProto>>,
}

/// Response of `tables.get`, trimmed to what we read.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    #[serde(default)]
    pub schema: Option<TableSchema>,
    #[serde(default)]
    pub num_rows: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: String,
    #[serde(default)]
    pub error_result: Option<ErrorProto>,
}

/// Response of `jobs.insert` and `jobs.get`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_reference: JobReference,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

impl Job {
    pub fn is_done(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "DONE")
    }
}

/// Map a BigQuery column type to Arrow.
///
/// Nested and repeated columns are carried as JSON text.
pub fn bigquery_type_to_arrow(field: &TableFieldSchema) -> DataType {
    if field.is_repeated() {
        return DataType::Utf8;
    }
    match field.field_type.to_uppercase().as_str() {
        "INTEGER" | "INT64" => DataType::Int64,
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => DataType::Float64,
        "BOOLEAN" | "BOOL" => DataType::Boolean,
        "TIMESTAMP" => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        _ => DataType::Utf8,
    }
}

pub fn arrow_schema(schema: &TableSchema) -> SchemaRef {
    let fields: Vec<Field> = schema
        .fields
        .iter()
        .map(|f| Field::new(&f.name, bigquery_type_to_arrow(f), !f.is_required()))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Decode query rows into a batch shaped by `schema`.
pub fn rows_to_record_batch(
    schema: &TableSchema,
    rows: &[TableRow],
) -> Result<RecordBatch, ConnectorError> {
    let arrow = arrow_schema(schema);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields.len());

    for (col_idx, field) in schema.fields.iter().enumerate() {
        let cell = |row: &TableRow| -> Value {
            row.f
                .get(col_idx)
                .map(|c| c.v.clone())
                .unwrap_or(Value::Null)
        };

        let array: ArrayRef = match arrow.field(col_idx).data_type() {
            DataType::Int64 => {
                let mut builder = Int64Builder::with_capacity(rows.len());
                for row in rows {
                    builder.append_option(parse_scalar::<i64>(&cell(row), field)?);
                }
                Arc::new(builder.finish())
            }
            DataType::Float64 => {
                let mut builder = Float64Builder::with_capacity(rows.len());
                for row in rows {
                    builder.append_option(parse_scalar::<f64>(&cell(row), field)?);
                }
                Arc::new(builder.finish())
            }
            DataType::Boolean => {
                let mut builder = BooleanBuilder::with_capacity(rows.len());
                for row in rows {
                    builder.append_option(parse_scalar::<bool>(&cell(row), field)?);
                }
                Arc::new(builder.finish())
            }
            DataType::Timestamp(_, _) => {
                let mut builder = TimestampMicrosecondBuilder::with_capacity(rows.len());
                for row in rows {
                    let micros = parse_scalar::<f64>(&cell(row), field)?
                        .map(|secs| (secs * 1_000_000.0).round() as i64);
                    builder.append_option(micros);
                }
                Arc::new(builder.finish().with_timezone("UTC"))
            }
            _ => {
                let mut builder = StringBuilder::with_capacity(rows.len(), rows.len() * 16);
                for row in rows {
                    match cell_to_json(field, &cell(row)) {
                        Value::Null => builder.append_null(),
                        Value::String(s) => builder.append_value(s),
                        other => builder.append_value(other.to_string()),
                    }
                }
                Arc::new(builder.finish())
            }
        };
        columns.push(array);
    }

    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    Ok(RecordBatch::try_new_with_options(arrow, columns, &options)?)
}

fn parse_scalar<T: std::str::FromStr>(
    value: &Value,
    field: &TableFieldSchema,
) -> Result<Option<T>, ConnectorError> {
    let text = match value {
        Value::Null => return Ok(None),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.parse::<T>().map(Some).map_err(|_| {
        ConnectorError::UnexpectedResponse(format!(
            "column '{}' ({}): cannot parse '{}'",
            field.name, field.field_type, text
        ))
    })
}

/// Strip the `f`/`v` wrappers from a cell, keying records by field name.
fn cell_to_json(field: &TableFieldSchema, value: &Value) -> Value {
    if field.is_repeated() {
        let items = match value {
            Value::Array(items) => items,
            _ => return Value::Null,
        };
        let element = TableFieldSchema {
            mode: None,
            ..field.clone()
        };
        return Value::Array(
            items
                .iter()
                .map(|item| cell_to_json(&element, item.get("v").unwrap_or(&Value::Null)))
                .collect(),
        );
    }

    match (&field.fields, value) {
        (Some(children), Value::Object(record)) => {
            let cells = record.get("f").and_then(Value::as_array);
            let mut out = serde_json::Map::with_capacity(children.len());
            for (i, child) in children.iter().enumerate() {
                let v = cells
                    .and_then(|c| c.get(i))
                    .and_then(|c| c.get("v"))
                    .unwrap_or(&Value::Null);
                out.insert(child.name.clone(), cell_to_json(child, v));
            }
            Value::Object(out)
        }
        _ => value.clone(),
    }
}

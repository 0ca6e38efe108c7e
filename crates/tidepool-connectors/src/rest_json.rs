//! Convert JSON API records into Arrow batches.

use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Fields, Schema};
use arrow::json::reader::infer_json_schema_from_iterator;
use arrow::json::ReaderBuilder;
use arrow::record_batch::RecordBatch;
use serde_json::Value;

use crate::error::ConnectorError;

const DECODE_BATCH_ROWS: usize = 1024;

/// Decode `records` into one batch.
///
/// The schema is inferred over every record; fields only ever seen as
/// `null` become nullable strings. Primitive values that disagree with the
/// inferred type are coerced to strings rather than rejected.
pub fn json_records_to_batch(records: &[Value]) -> Result<RecordBatch, ConnectorError> {
    if records.is_empty() {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    }

    let inferred = infer_json_schema_from_iterator(records.iter().map(Ok::<_, arrow::error::ArrowError>))?;
    let schema = Arc::new(Schema::new(
        inferred
            .fields()
            .iter()
            .map(|f| settle_field(f))
            .collect::<Vec<_>>(),
    ));

    let mut decoder = ReaderBuilder::new(Arc::clone(&schema))
        .with_batch_size(DECODE_BATCH_ROWS)
        .with_coerce_primitive(true)
        .build_decoder()?;

    let mut batches = Vec::with_capacity(records.len().div_ceil(DECODE_BATCH_ROWS));
    for page in records.chunks(DECODE_BATCH_ROWS) {
        decoder.serialize(page)?;
        if let Some(batch) = decoder.flush()? {
            batches.push(batch);
        }
    }
    Ok(concat_batches(&schema, &batches)?)
}

fn settle_field(field: &Field) -> Field {
    Field::new(field.name(), settle_type(field.data_type()), true)
}

/// Replace `Null` types, which Parquet cannot store usefully, with `Utf8`.
fn settle_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Null => DataType::Utf8,
        DataType::List(item) => DataType::List(Arc::new(settle_field(item))),
        DataType::Struct(fields) => {
            DataType::Struct(fields.iter().map(|f| settle_field(f)).collect::<Fields>())
        }
        other => other.clone(),
    }
}

/// Append a constant string column, e.g. a fetch timestamp.
pub fn with_constant_column(
    batch: &RecordBatch,
    name: &str,
    value: &str,
) -> Result<RecordBatch, ConnectorError> {
    let mut fields: Vec<Arc<Field>> = batch.schema().fields().iter().cloned().collect();
    fields.push(Arc::new(Field::new(name, DataType::Utf8, false)));

    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    columns.push(Arc::new(StringArray::from(vec![value; batch.num_rows()])));

    let options = arrow::record_batch::RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        columns,
        &options,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array, ListArray, StructArray};
    use serde_json::json;

    #[test]
    fn test_schema_covers_fields_missing_from_early_records() {
        let records = vec![
            json!({"id": 1, "name": "Blue-Eyes"}),
            json!({"id": 2, "name": "Kuriboh", "atk": 300}),
        ];
        let batch = json_records_to_batch(&records).unwrap();
        assert_eq!(batch.num_rows(), 2);
        let schema = batch.schema();
        assert_eq!(schema.field_with_name("atk").unwrap().data_type(), &DataType::Int64);

        let atk = batch
            .column_by_name("atk")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert!(atk.is_null(0));
        assert_eq!(atk.value(1), 300);
    }

    #[test]
    fn test_nested_values_keep_structure() {
        let records = vec![json!({
            "id": 7,
            "card_sets": [{"set_name": "LOB", "set_price": "1.5"}],
            "misc": {"views": 10}
        })];
        let batch = json_records_to_batch(&records).unwrap();
        assert!(batch
            .column_by_name("card_sets")
            .unwrap()
            .as_any()
            .downcast_ref::<ListArray>()
            .is_some());
        assert!(batch
            .column_by_name("misc")
            .unwrap()
            .as_any()
            .downcast_ref::<StructArray>()
            .is_some());
    }

    #[test]
    fn test_null_only_fields_become_strings() {
        let records = vec![json!({"id": 1, "archetype": null}), json!({"id": 2, "archetype": null})];
        let batch = json_records_to_batch(&records).unwrap();
        assert_eq!(
            batch.schema().field_with_name("archetype").unwrap().data_type(),
            &DataType::Utf8
        );
        assert_eq!(batch.column_by_name("archetype").unwrap().null_count(), 2);
    }

    #[test]
    fn test_decodes_more_rows_than_one_page() {
        let records: Vec<Value> = (0..2500).map(|i| json!({"n": i})).collect();
        let batch = json_records_to_batch(&records).unwrap();
        assert_eq!(batch.num_rows(), 2500);
        let n = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(n.value(2499), 2499);
    }

    #[test]
    fn test_empty_records() {
        let batch = json_records_to_batch(&[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 0);
    }

    #[test]
    fn test_with_constant_column() {
        let batch = json_records_to_batch(&[json!({"id": 1}), json!({"id": 2})]).unwrap();
        let stamped = with_constant_column(&batch, "date_fetched", "2024-01-02 03:04:05").unwrap();
        assert_eq!(stamped.num_columns(), 2);
        let col = stamped
            .column_by_name("date_fetched")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(col.value(1), "2024-01-02 03:04:05");
    }
}

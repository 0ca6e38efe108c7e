//! User-defined functions for browsing landed card data

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use datafusion::logical_expr::{ColumnarValue, ScalarUDF, Signature, Volatility};
use datafusion::prelude::SessionContext;
use std::sync::Arc;

/// Make every card-browsing function callable from SQL in `ctx`.
pub fn register_landing_udfs(ctx: &SessionContext) {
    ctx.register_udf(card_category_udf());
}

/// Map a card `type` string to its high-level category.
///
/// Case-insensitive substring match, checked in the order monster, spell,
/// trap.
pub fn card_category(card_type: &str) -> &'static str {
    let t = card_type.to_lowercase();
    if t.contains("monster") {
        "Monster"
    } else if t.contains("spell") {
        "Spell"
    } else if t.contains("trap") {
        "Trap"
    } else {
        "Other"
    }
}

/// `card_category(type) -> 'Monster' | 'Spell' | 'Trap' | 'Other'`
pub fn card_category_udf() -> ScalarUDF {
    ScalarUDF::new_from_impl(CardCategory::new())
}

#[derive(Debug)]
struct CardCategory {
    signature: Signature,
}

impl CardCategory {
    fn new() -> Self {
        Self {
            signature: Signature::uniform(
                1,
                vec![DataType::Utf8, DataType::LargeUtf8, DataType::Utf8View],
                Volatility::Immutable,
            ),
        }
    }
}

impl datafusion::logical_expr::ScalarUDFImpl for CardCategory {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn name(&self) -> &str {
        "card_category"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, _arg_types: &[DataType]) -> datafusion::error::Result<DataType> {
        Ok(DataType::Utf8)
    }

    fn invoke_batch(
        &self,
        args: &[ColumnarValue],
        num_rows: usize,
    ) -> datafusion::error::Result<ColumnarValue> {
        let types = match &args[0] {
            ColumnarValue::Array(arr) => arr.clone(),
            ColumnarValue::Scalar(s) => s.to_array_of_size(num_rows)?,
        };
        let types = cast(&types, &DataType::Utf8)?;
        let types = types.as_any().downcast_ref::<StringArray>().ok_or_else(|| {
            datafusion::error::DataFusionError::Internal("Expected StringArray for arg 0".into())
        })?;

        // Null type means no category, same as an unrecognised one.
        let result: StringArray = (0..types.len())
            .map(|i| {
                if types.is_null(i) {
                    Some("Other")
                } else {
                    Some(card_category(types.value(i)))
                }
            })
            .collect();

        Ok(ColumnarValue::Array(Arc::new(result) as ArrayRef))
    }
}

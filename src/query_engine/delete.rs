use std::collections::BTreeMap;

use serde_json::Value;

use crate::common::error::{JsonQlException, Result};
use crate::common::ROW_IS_DELETED;
use crate::storage_engine::{Block, DataBaseStorage};

use super::{base_properties, command_schema, parse_filter, schema, table_name, Command, Expression, Update};

/// Deletes the rows matching a filter by setting their deletion marker.
///
/// Deleted rows keep their space in the row block; nothing is compacted.
#[derive(Debug)]
pub struct Delete {
    update: Update,
}

impl Delete {
    pub fn new(table_name: impl Into<String>, filter: Expression) -> Self {
        let assignments = BTreeMap::from([(ROW_IS_DELETED.to_string(), Expression::literal(true))]);
        Self {
            update: Update::new(table_name, filter, assignments),
        }
    }

    pub fn table_name(&self) -> &str {
        self.update.table_name()
    }
}

impl Command for Delete {
    type Output = usize;

    fn json_schema() -> Value {
        let mut properties = base_properties("delete");
        properties.insert("where".into(), serde_json::json!({}));
        command_schema(properties, &["type", "table_name"])
    }

    fn from_json(json: &Value) -> Result<Self> {
        schema::check(&Self::json_schema(), json)?;

        let mut violations = Vec::new();
        let filter = parse_filter(json, &mut violations);
        if !violations.is_empty() {
            return Err(JsonQlException::new(violations).into());
        }
        Ok(Self::new(table_name(json), filter))
    }

    fn next_block(&mut self, storage: &mut DataBaseStorage) -> Result<Option<Block>> {
        self.update.next_block(storage)
    }

    fn result(&self) -> Option<&usize> {
        self.update.result()
    }

    fn into_result(self) -> Option<usize> {
        self.update.into_result()
    }
}

use serde_json::Value;
use tracing::debug;

use crate::common::error::{JsonQlException, Result};
use crate::common::ROW_IS_DELETED;
use crate::storage_engine::{Block, DataBaseStorage};

use super::{base_properties, command_schema, parse_filter, schema, table_name, Command, Expression, RowSet};

/// Reads the live rows of a table that satisfy a filter. Never mutates a block.
#[derive(Debug)]
pub struct Select {
    table_name: String,
    filter: Expression,
    result: Option<RowSet>,
}

impl Select {
    pub fn new(table_name: impl Into<String>, filter: Expression) -> Self {
        Self {
            table_name: table_name.into(),
            filter,
            result: None,
        }
    }

    /// Every live row of the table.
    pub fn all(table_name: impl Into<String>) -> Self {
        Self::new(table_name, Expression::default())
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn filter(&self) -> &Expression {
        &self.filter
    }

    pub(crate) fn take_result(&mut self) -> Option<RowSet> {
        self.result.take()
    }
}

impl Command for Select {
    type Output = RowSet;

    fn json_schema() -> Value {
        let mut properties = base_properties("select");
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
        if self.result.is_some() {
            return Ok(None);
        }

        let (meta, owner) = storage.find_table(&self.table_name)?;
        let mut rows = Vec::new();
        for entry in storage.row_blocks(&meta, owner) {
            let (_, row_block) = entry?;
            for record in row_block.records.iter().filter(|record| !record.deleted) {
                let mut row = record.to_row(&meta);
                if self.filter.evaluate(&row) {
                    row.remove(ROW_IS_DELETED);
                    rows.push(row);
                }
            }
        }

        debug!(table = %self.table_name, rows = rows.len(), "selected rows");
        self.result = Some(RowSet::new(meta.column_names(), rows));
        Ok(None)
    }

    fn result(&self) -> Option<&RowSet> {
        self.result.as_ref()
    }

    fn into_result(self) -> Option<RowSet> {
        self.result
    }
}

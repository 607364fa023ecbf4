use std::collections::HashSet;

use serde_json::{json, Value};
use tracing::info;

use crate::common::error::{Error, JsonQlException, Result};
use crate::common::table::TableMetaData;
use crate::common::{BlockIndex, ColumnType, TableInfo, NO_BLOCK, ROW_IS_DELETED};
use crate::storage_engine::{Block, DataBaseStorage};

use super::{base_properties, command_schema, schema, table_name, Command};

/// Creates a table by writing a new metadata block.
#[derive(Debug, Clone)]
pub struct CreateTable {
    table_name: String,
    columns: TableInfo,
    written: bool,
    result: Option<()>,
}

impl CreateTable {
    pub fn new(table_name: impl Into<String>, columns: TableInfo) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
            written: false,
            result: None,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn check_columns(columns: &TableInfo) -> Vec<String> {
        let mut violations = Vec::new();
        let mut seen = HashSet::new();
        for (index, (name, _)) in columns.iter().enumerate() {
            if name == ROW_IS_DELETED {
                violations.push(format!("$.columns[{index}]: {name:?} is reserved"));
            } else if !seen.insert(name.as_str()) {
                violations.push(format!("$.columns[{index}]: duplicate column {name:?}"));
            }
        }
        violations
    }
}

impl Command for CreateTable {
    type Output = ();

    fn json_schema() -> Value {
        let mut properties = base_properties("create_table");
        properties.insert(
            "columns".into(),
            json!({
                "type": "array",
                "minItems": 1,
                "items": {
                    "anyOf": [
                        {"type": "string", "minLength": 1},
                        {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string", "minLength": 1},
                                "type": {"enum": ColumnType::NAMES}
                            },
                            "required": ["name"],
                            "additionalProperties": false
                        }
                    ]
                }
            }),
        );
        command_schema(properties, &["type", "table_name", "columns"])
    }

    fn from_json(json: &Value) -> Result<Self> {
        schema::check(&Self::json_schema(), json)?;

        let columns: TableInfo = json["columns"]
            .as_array()
            .map(|columns| {
                columns
                    .iter()
                    .map(|column| match column {
                        Value::String(name) => (name.clone(), ColumnType::Any),
                        _ => (
                            string_field(column, "name"),
                            column
                                .get("type")
                                .and_then(Value::as_str)
                                .and_then(ColumnType::from_name)
                                .unwrap_or(ColumnType::Any),
                        ),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let violations = Self::check_columns(&columns);
        if !violations.is_empty() {
            return Err(JsonQlException::new(violations).into());
        }
        Ok(Self::new(table_name(json), columns))
    }

    fn next_block(&mut self, storage: &mut DataBaseStorage) -> Result<Option<Block>> {
        if self.written {
            self.result = Some(());
            return Ok(None);
        }

        for entry in storage.table_meta_data_gen() {
            let (meta, _) = entry?;
            if meta.name == self.table_name {
                return Err(Error::TableAlreadyExists(self.table_name.clone()));
            }
        }

        let meta = TableMetaData::new(self.table_name.clone(), self.columns.clone());
        meta.check_fits(storage.block_size())?;
        let mut block = storage.allocate_block()?;
        meta.encode(&mut block)?;

        info!(table = %self.table_name, block = block.index(), "created table");
        self.written = true;
        Ok(Some(block))
    }

    fn result(&self) -> Option<&()> {
        self.result.as_ref()
    }

    fn into_result(self) -> Option<()> {
        self.result
    }
}

fn string_field(object: &Value, key: &str) -> String {
    object.get(key).and_then(Value::as_str).unwrap_or_default().to_owned()
}

#[derive(Debug, Clone, Copy)]
enum DropState {
    Pending,
    FreeingRows { next: BlockIndex, owner: BlockIndex },
    Done,
}

/// Drops a table. The metadata block is freed first, so the table vanishes
/// with the first written block; its row blocks are freed after it.
#[derive(Debug, Clone)]
pub struct DropTable {
    table_name: String,
    state: DropState,
    result: Option<()>,
}

impl DropTable {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            state: DropState::Pending,
            result: None,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl Command for DropTable {
    type Output = ();

    fn json_schema() -> Value {
        command_schema(base_properties("drop_table"), &["type", "table_name"])
    }

    fn from_json(json: &Value) -> Result<Self> {
        schema::check(&Self::json_schema(), json)?;
        Ok(Self::new(table_name(json)))
    }

    fn next_block(&mut self, storage: &mut DataBaseStorage) -> Result<Option<Block>> {
        match self.state {
            DropState::Pending => {
                let (meta, owner) = storage.find_table(&self.table_name)?;
                let mut block = storage.read_block(owner)?;
                block.free();
                info!(table = %self.table_name, block = owner, "dropped table");
                self.state = DropState::FreeingRows {
                    next: meta.first_row_block,
                    owner,
                };
                Ok(Some(block))
            }
            DropState::FreeingRows { next, owner } if next != NO_BLOCK => {
                let (mut block, rows) = storage.read_row_block(next, owner)?;
                block.free();
                self.state = DropState::FreeingRows {
                    next: rows.next,
                    owner,
                };
                Ok(Some(block))
            }
            DropState::FreeingRows { .. } | DropState::Done => {
                self.state = DropState::Done;
                self.result = Some(());
                Ok(None)
            }
        }
    }

    fn result(&self) -> Option<&()> {
        self.result.as_ref()
    }

    fn into_result(self) -> Option<()> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::query_engine::{InsertRows, Select};
    use crate::test_utils::{row, temp_storage};

    fn users() -> CreateTable {
        CreateTable::from_json(&json!({
            "type": "create_table",
            "table_name": "users",
            "columns": ["id", {"name": "name", "type": "string"}]
        }))
        .unwrap()
    }

    #[test]
    fn create_table_writes_one_metadata_block() {
        let (_dir, mut storage) = temp_storage(64);
        let mut create = users();
        assert!(create.result().is_none());

        let blocks: Vec<Block> = create.execute(&mut storage).collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(create.result(), Some(&()));

        let (meta, index) = storage.find_table("users").unwrap();
        assert_eq!(index, blocks[0].index());
        assert_eq!(
            meta.columns,
            vec![
                (String::from("id"), ColumnType::Any),
                (String::from("name"), ColumnType::String)
            ]
        );
    }

    #[test]
    fn create_then_select_is_empty() {
        let (_dir, mut storage) = temp_storage(64);
        users().run(&mut storage).unwrap();
        let rows = Select::all("users").run(&mut storage).unwrap().unwrap();
        assert_eq!(rows.count(), 0);
    }

    #[test]
    fn duplicate_table_is_rejected() {
        let (_dir, mut storage) = temp_storage(64);
        users().run(&mut storage).unwrap();
        assert!(matches!(
            users().run(&mut storage),
            Err(Error::TableAlreadyExists(name)) if name == "users"
        ));
        assert_eq!(storage.block_count(), 1);
    }

    #[test]
    fn column_definitions_are_validated() {
        let err = CreateTable::from_json(&json!({
            "type": "create_table",
            "table_name": "t",
            "columns": ["a", "a", ".ROW_IS_DELETED", {"name": "b", "type": "decimal"}]
        }))
        .unwrap_err();
        let Error::JsonQl(exception) = err else {
            panic!("expected a JSONQL error");
        };
        assert_eq!(exception.violations.len(), 1, "{:?}", exception.violations);

        let err = CreateTable::from_json(&json!({
            "type": "create_table",
            "table_name": "t",
            "columns": ["a", "a", ".ROW_IS_DELETED"]
        }))
        .unwrap_err();
        let Error::JsonQl(exception) = err else {
            panic!("expected a JSONQL error");
        };
        assert_eq!(
            exception.violations,
            vec![
                "$.columns[1]: duplicate column \"a\"",
                "$.columns[2]: \".ROW_IS_DELETED\" is reserved",
            ]
        );
    }

    #[test]
    fn column_type_names_on_the_wire() {
        let columns: Vec<Value> = ColumnType::NAMES
            .iter()
            .map(|name| json!({"name": format!("c_{name}"), "type": name}))
            .collect();
        let create = CreateTable::from_json(&json!({
            "type": "create_table",
            "table_name": "t",
            "columns": columns
        }))
        .unwrap();
        let types: Vec<ColumnType> = create.columns.iter().map(|(_, column_type)| *column_type).collect();
        assert_eq!(
            types,
            [ColumnType::Any, ColumnType::Int, ColumnType::Float, ColumnType::Boolean, ColumnType::String]
        );

        let err = CreateTable::from_json(&json!({
            "type": "create_table",
            "table_name": "t",
            "columns": [{"name": "id", "type": "integer"}]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::JsonQl(_)));
    }

    #[test]
    fn drop_table_frees_metadata_and_rows() {
        let (_dir, mut storage) = temp_storage(64);
        users().run(&mut storage).unwrap();
        let rows = (0..5).map(|id| row(json!({"id": id, "name": "someone"}))).collect();
        InsertRows::new("users", rows).run(&mut storage).unwrap();
        let used = storage.block_count();
        assert!(used > 2);

        let mut drop = DropTable::new("users");
        let freed: Vec<Block> = drop.execute(&mut storage).collect::<Result<_>>().unwrap();
        assert_eq!(freed.len() as u32, used);
        assert!(freed.iter().all(Block::is_free));
        assert_eq!(storage.free_block_count() as u32, used);
        assert_eq!(storage.table_meta_data_gen().count(), 0);

        // the next table reuses the freed slots instead of growing the file
        users().run(&mut storage).unwrap();
        assert_eq!(storage.block_count(), used);
    }

    #[test]
    fn dropping_a_missing_table_fails() {
        let (_dir, mut storage) = temp_storage(64);
        let err = DropTable::from_json(&json!({"type": "drop_table", "table_name": "ghost"}))
            .unwrap()
            .run(&mut storage)
            .unwrap_err();
        assert!(matches!(err, Error::TableNotFound(name) if name == "ghost"));
    }
}

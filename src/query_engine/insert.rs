use std::collections::VecDeque;

use serde_json::{json, Value};
use tracing::debug;

use crate::common::error::{Error, Result};
use crate::common::{Row, NO_BLOCK};
use crate::storage_engine::{Block, DataBaseStorage, RowBlock, RowRecord};

use super::{base_properties, command_schema, schema, table_name, Command, RowSet, Select};

/// Appends one row to a table.
///
/// The row goes into the last row block when it fits. Otherwise a new block is
/// allocated and linked, which takes up to three writes: the new block, the old
/// tail's link, then the metadata block.
#[derive(Debug, Clone)]
pub struct InsertRow {
    table_name: String,
    row: Row,
    pending: Option<VecDeque<Block>>,
    result: Option<()>,
}

impl InsertRow {
    pub fn new(table_name: impl Into<String>, row: Row) -> Self {
        Self {
            table_name: table_name.into(),
            row,
            pending: None,
            result: None,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn plan(&self, storage: &mut DataBaseStorage) -> Result<VecDeque<Block>> {
        let (mut meta, owner) = storage.find_table(&self.table_name)?;
        let record = RowRecord::from_row(&self.row, &meta)?;

        let block_size = storage.block_size();
        let capacity = RowBlock::payload_capacity(block_size);
        if record.encoded_len() > capacity {
            return Err(Error::RowTooLarge {
                size: record.encoded_len(),
                capacity,
            });
        }

        let mut tail = None;
        if meta.last_row_block != NO_BLOCK {
            let (mut block, mut rows) = storage.read_row_block(meta.last_row_block, owner)?;
            if rows.fits(&record, block_size) {
                rows.records.push(record);
                rows.encode(&mut block)?;
                return Ok(VecDeque::from([block]));
            }
            tail = Some((block, rows));
        }

        let mut block = storage.allocate_block()?;
        let mut rows = RowBlock::new(owner);
        rows.records.push(record);
        rows.encode(&mut block)?;
        let new_index = block.index();
        debug!(table = %meta.name, block = new_index, "extended row chain");

        let mut blocks = VecDeque::from([block]);
        match tail {
            Some((mut tail_block, mut tail_rows)) => {
                tail_rows.next = new_index;
                tail_rows.encode(&mut tail_block)?;
                blocks.push_back(tail_block);
            }
            None => meta.first_row_block = new_index,
        }
        meta.last_row_block = new_index;

        let mut meta_block = storage.read_block(owner)?;
        meta.encode(&mut meta_block)?;
        blocks.push_back(meta_block);
        Ok(blocks)
    }
}

impl Command for InsertRow {
    type Output = ();

    fn json_schema() -> Value {
        let mut properties = base_properties("insert_row");
        properties.insert("row".into(), scalar_row_schema());
        command_schema(properties, &["type", "table_name", "row"])
    }

    fn from_json(json: &Value) -> Result<Self> {
        schema::check(&Self::json_schema(), json)?;
        let row = json["row"].as_object().cloned().unwrap_or_default();
        Ok(Self::new(table_name(json), row))
    }

    fn next_block(&mut self, storage: &mut DataBaseStorage) -> Result<Option<Block>> {
        if self.pending.is_none() {
            self.pending = Some(self.plan(storage)?);
        }
        match self.pending.as_mut().and_then(VecDeque::pop_front) {
            Some(block) => Ok(Some(block)),
            None => {
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

fn scalar_row_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": {"type": ["null", "boolean", "number", "string"]}
    })
}

/// Feeds rows one at a time through [`InsertRow`], forwarding its blocks.
#[derive(Debug, Default)]
pub(crate) struct RowFeeder {
    current: Option<InsertRow>,
    inserted: usize,
}

impl RowFeeder {
    pub(crate) fn inserted(&self) -> usize {
        self.inserted
    }

    pub(crate) fn next_block<I>(
        &mut self,
        table_name: &str,
        rows: &mut I,
        storage: &mut DataBaseStorage,
    ) -> Result<Option<Block>>
    where
        I: Iterator<Item = Row>,
    {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(block) = current.next_block(storage)? {
                    return Ok(Some(block));
                }
                self.current = None;
                self.inserted += 1;
            }
            match rows.next() {
                Some(row) => self.current = Some(InsertRow::new(table_name, row)),
                None => return Ok(None),
            }
        }
    }
}

/// Inserts a literal list of rows.
#[derive(Debug)]
pub struct InsertRows {
    table_name: String,
    rows: std::vec::IntoIter<Row>,
    checked: bool,
    feeder: RowFeeder,
    result: Option<usize>,
}

impl InsertRows {
    pub fn new(table_name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            table_name: table_name.into(),
            rows: rows.into_iter(),
            checked: false,
            feeder: RowFeeder::default(),
            result: None,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl Command for InsertRows {
    type Output = usize;

    fn json_schema() -> Value {
        let mut properties = base_properties("insert_rows");
        properties.insert(
            "rows".into(),
            json!({"type": "array", "items": scalar_row_schema()}),
        );
        command_schema(properties, &["type", "table_name", "rows"])
    }

    fn from_json(json: &Value) -> Result<Self> {
        schema::check(&Self::json_schema(), json)?;
        let rows = json["rows"]
            .as_array()
            .map(|rows| rows.iter().filter_map(Value::as_object).cloned().collect())
            .unwrap_or_default();
        Ok(Self::new(table_name(json), rows))
    }

    fn next_block(&mut self, storage: &mut DataBaseStorage) -> Result<Option<Block>> {
        if self.result.is_some() {
            return Ok(None);
        }
        if !self.checked {
            // An empty insert into a missing table still fails
            storage.find_table(&self.table_name)?;
            self.checked = true;
        }
        match self.feeder.next_block(&self.table_name, &mut self.rows, storage)? {
            Some(block) => Ok(Some(block)),
            None => {
                self.result = Some(self.feeder.inserted);
                Ok(None)
            }
        }
    }

    fn result(&self) -> Option<&usize> {
        self.result.as_ref()
    }

    fn into_result(self) -> Option<usize> {
        self.result
    }
}

/// Inserts the rows of a select. The select runs to completion before the first
/// row is written, so selecting from the target table copies a stable snapshot.
#[derive(Debug)]
pub struct Insert {
    table_name: String,
    select: Select,
    rows: Option<RowSet>,
    feeder: RowFeeder,
    result: Option<usize>,
}

impl Insert {
    pub fn new(table_name: impl Into<String>, select: Select) -> Self {
        Self {
            table_name: table_name.into(),
            select,
            rows: None,
            feeder: RowFeeder::default(),
            result: None,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl Command for Insert {
    type Output = usize;

    fn json_schema() -> Value {
        let mut properties = base_properties("insert");
        properties.insert("select".into(), json!({"type": "object"}));
        command_schema(properties, &["type", "table_name", "select"])
    }

    fn from_json(json: &Value) -> Result<Self> {
        schema::check(&Self::json_schema(), json)?;
        let select = Select::from_json(&json["select"]).map_err(|err| match err {
            Error::JsonQl(exception) => Error::JsonQl(exception.nested("$.select")),
            other => other,
        })?;
        Ok(Self::new(table_name(json), select))
    }

    fn next_block(&mut self, storage: &mut DataBaseStorage) -> Result<Option<Block>> {
        if self.result.is_some() {
            return Ok(None);
        }
        if self.rows.is_none() {
            if let Some(block) = self.select.next_block(storage)? {
                return Ok(Some(block));
            }
            storage.find_table(&self.table_name)?;
            let rows = self.select.take_result().unwrap_or_else(|| RowSet::new(Vec::new(), Vec::new()));
            debug!(table = %self.table_name, rows = rows.len(), "inserting selected rows");
            self.rows = Some(rows);
        }

        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };
        match self.feeder.next_block(&self.table_name, rows, storage)? {
            Some(block) => Ok(Some(block)),
            None => {
                self.result = Some(self.feeder.inserted);
                Ok(None)
            }
        }
    }

    fn result(&self) -> Option<&usize> {
        self.result.as_ref()
    }

    fn into_result(self) -> Option<usize> {
        self.result
    }
}

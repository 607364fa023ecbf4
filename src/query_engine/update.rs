use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::debug;

use crate::common::error::{Error, JsonQlException, Result};
use crate::common::table::TableMetaData;
use crate::common::{BlockIndex, Row, NO_BLOCK, ROW_IS_DELETED};
use crate::storage_engine::{Block, DataBaseStorage, RowBlock, RowRecord};

use super::insert::RowFeeder;
use super::{base_properties, command_schema, parse_filter, schema, table_name, Command, Expression};

#[derive(Debug)]
enum UpdateState {
    Pending,
    Scanning {
        meta: TableMetaData,
        owner: BlockIndex,
        next: BlockIndex,
        // guards against a looping chain
        remaining: u32,
        relocated: Vec<Row>,
    },
    Relocating(std::vec::IntoIter<Row>),
    Done,
}

/// Rewrites the live rows matching a filter, one row block per step.
///
/// Assignments are evaluated against the row as it was before the update. When
/// the rewritten rows outgrow their block, the updated rows of that block are
/// flagged deleted in place and re-appended to the table once the scan is over,
/// so the scan never meets them twice. Every matching row is checked before the
/// first block is handed out.
#[derive(Debug)]
pub struct Update {
    table_name: String,
    filter: Expression,
    assignments: BTreeMap<String, Expression>,
    state: UpdateState,
    updated: usize,
    feeder: RowFeeder,
    result: Option<usize>,
}

impl Update {
    pub fn new(
        table_name: impl Into<String>,
        filter: Expression,
        assignments: BTreeMap<String, Expression>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            filter,
            assignments,
            state: UpdateState::Pending,
            updated: 0,
            feeder: RowFeeder::default(),
            result: None,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn assignments(&self) -> &BTreeMap<String, Expression> {
        &self.assignments
    }

    /// Computes every updated row once without writing anything, so that a row
    /// the update cannot store fails the command before its first block. Rows
    /// relocated out of a grown block are only held in memory until the scan
    /// ends and must not be lost to a later failure.
    fn check_rows(&self, storage: &DataBaseStorage, meta: &TableMetaData, owner: BlockIndex) -> Result<()> {
        let capacity = RowBlock::payload_capacity(storage.block_size());
        for entry in storage.row_blocks(meta, owner) {
            let (_, rows) = entry?;
            for record in &rows.records {
                updated_row(&self.filter, &self.assignments, meta, record, capacity)?;
            }
        }
        Ok(())
    }

    fn check_targets(&self, meta: &TableMetaData) -> Result<()> {
        let columns = meta.column_map();
        for column in self.assignments.keys() {
            if column != ROW_IS_DELETED && !columns.contains_key(column) {
                return Err(Error::UnknownColumn {
                    table: meta.name.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }
}

/// The updated version of a live row matching `filter`, or `None` when the row
/// is deleted or filtered out. Fails when the new version breaks a column type
/// or cannot fit any row block.
fn updated_row(
    filter: &Expression,
    assignments: &BTreeMap<String, Expression>,
    meta: &TableMetaData,
    record: &RowRecord,
    capacity: usize,
) -> Result<Option<(Row, RowRecord)>> {
    if record.deleted {
        return Ok(None);
    }
    let row = record.to_row(meta);
    if !filter.evaluate(&row) {
        return Ok(None);
    }

    let mut new_row = row.clone();
    for (column, expression) in assignments {
        new_row.insert(column.clone(), expression.value(&row));
    }
    let new_record = RowRecord::from_row(&new_row, meta)?;
    if new_record.encoded_len() > capacity {
        return Err(Error::RowTooLarge {
            size: new_record.encoded_len(),
            capacity,
        });
    }
    Ok(Some((new_row, new_record)))
}

/// Applies the update to one row block. Returns how many rows matched, or `None`
/// when the block is left untouched.
fn rewrite_block(
    filter: &Expression,
    assignments: &BTreeMap<String, Expression>,
    meta: &TableMetaData,
    mut rows: RowBlock,
    block: &mut Block,
    relocated: &mut Vec<Row>,
) -> Result<Option<usize>> {
    let capacity = RowBlock::payload_capacity(block.size());

    let mut changes = Vec::new();
    for (position, record) in rows.records.iter().enumerate() {
        if let Some((new_row, new_record)) = updated_row(filter, assignments, meta, record, capacity)? {
            changes.push((position, new_row, new_record));
        }
    }

    if changes.is_empty() {
        return Ok(None);
    }
    let count = changes.len();

    let mut rewritten = rows.clone();
    for (position, _, record) in &changes {
        rewritten.records[*position] = record.clone();
    }
    if rewritten.payload_len() <= capacity {
        rewritten.encode(block)?;
    } else {
        debug!(block = block.index(), rows = count, "relocating grown rows");
        for (position, new_row, _) in changes {
            rows.records[position].deleted = true;
            relocated.push(new_row);
        }
        rows.encode(block)?;
    }
    Ok(Some(count))
}

impl Command for Update {
    type Output = usize;

    fn json_schema() -> Value {
        let mut properties = base_properties("update");
        properties.insert("where".into(), json!({}));
        properties.insert("set".into(), json!({"type": "object"}));
        command_schema(properties, &["type", "table_name", "set"])
    }

    fn from_json(json: &Value) -> Result<Self> {
        schema::check(&Self::json_schema(), json)?;

        let mut violations = Vec::new();
        let filter = parse_filter(json, &mut violations);
        let mut assignments = BTreeMap::new();
        if let Some(set) = json["set"].as_object() {
            for (column, expression) in set {
                let path = format!("$.set.{column}");
                if let Some(expression) = Expression::parse(expression, &path, &mut violations) {
                    assignments.insert(column.clone(), expression);
                }
            }
        }
        if !violations.is_empty() {
            return Err(JsonQlException::new(violations).into());
        }
        Ok(Self::new(table_name(json), filter, assignments))
    }

    fn next_block(&mut self, storage: &mut DataBaseStorage) -> Result<Option<Block>> {
        loop {
            match &mut self.state {
                UpdateState::Pending => {
                    let (meta, owner) = storage.find_table(&self.table_name)?;
                    self.check_targets(&meta)?;
                    self.check_rows(storage, &meta, owner)?;
                    self.state = UpdateState::Scanning {
                        next: meta.first_row_block,
                        remaining: storage.block_count(),
                        meta,
                        owner,
                        relocated: Vec::new(),
                    };
                }
                UpdateState::Scanning {
                    meta,
                    owner,
                    next,
                    remaining,
                    relocated,
                } => {
                    if *next == NO_BLOCK {
                        let rows = std::mem::take(relocated);
                        self.state = UpdateState::Relocating(rows.into_iter());
                        continue;
                    }
                    if *remaining == 0 {
                        return Err(Error::corrupt_block(*next, "row chain loops"));
                    }
                    *remaining -= 1;

                    let (mut block, rows) = storage.read_row_block(*next, *owner)?;
                    *next = rows.next;
                    let changed = rewrite_block(
                        &self.filter,
                        &self.assignments,
                        meta,
                        rows,
                        &mut block,
                        relocated,
                    )?;
                    if let Some(count) = changed {
                        self.updated += count;
                        return Ok(Some(block));
                    }
                }
                UpdateState::Relocating(rows) => {
                    if let Some(block) = self.feeder.next_block(&self.table_name, rows, storage)? {
                        return Ok(Some(block));
                    }
                    debug!(
                        table = %self.table_name,
                        updated = self.updated,
                        relocated = self.feeder.inserted(),
                        "update complete"
                    );
                    self.state = UpdateState::Done;
                    self.result = Some(self.updated);
                }
                UpdateState::Done => return Ok(None),
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

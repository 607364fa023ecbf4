//! Turns JSONQL documents into executable commands.
//!
//! A document is one command object or an array of them. Every command of a
//! batch is validated before the batch is returned, so a malformed batch never
//! reaches storage.

use serde_json::{json, Value};

use crate::common::error::{Error, JsonQlException, Result};
use crate::query_engine::{
    Command, CreateTable, Delete, DropTable, Insert, InsertRow, InsertRows, RowSet, Select, Update,
};
use crate::storage_engine::{Block, DataBaseStorage};

/// Every JSONQL command, closed over the `type` discriminator.
#[derive(Debug)]
pub enum CommandKind {
    CreateTable(CreateTable),
    DropTable(DropTable),
    Select(Select),
    InsertRow(InsertRow),
    InsertRows(InsertRows),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl CommandKind {
    /// The wire `type` of this command.
    pub fn command_type(&self) -> &'static str {
        match self {
            CommandKind::CreateTable(_) => "create_table",
            CommandKind::DropTable(_) => "drop_table",
            CommandKind::Select(_) => "select",
            CommandKind::InsertRow(_) => "insert_row",
            CommandKind::InsertRows(_) => "insert_rows",
            CommandKind::Insert(_) => "insert",
            CommandKind::Update(_) => "update",
            CommandKind::Delete(_) => "delete",
        }
    }
}

/// What a finished command produced.
#[derive(Debug)]
pub enum CommandOutput {
    Done,
    Count(usize),
    Rows(RowSet),
}

impl CommandOutput {
    pub fn into_json(self) -> Value {
        match self {
            CommandOutput::Done => json!({"ok": true}),
            CommandOutput::Count(count) => json!({"count": count}),
            CommandOutput::Rows(rows) => json!({"rows": rows.map(Value::Object).collect::<Vec<_>>()}),
        }
    }
}

/// A parsed command of any kind, executed through the same step-wise protocol
/// as the concrete commands.
#[derive(Debug)]
pub struct JsonQlCommand {
    kind: CommandKind,
    output: Option<CommandOutput>,
}

impl JsonQlCommand {
    pub fn new(kind: CommandKind) -> Self {
        Self { kind, output: None }
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn command_type(&self) -> &'static str {
        self.kind.command_type()
    }

    fn finish(&mut self) -> CommandOutput {
        match &mut self.kind {
            CommandKind::Select(select) => select
                .take_result()
                .map_or(CommandOutput::Done, CommandOutput::Rows),
            CommandKind::InsertRows(command) => count(command.result()),
            CommandKind::Insert(command) => count(command.result()),
            CommandKind::Update(command) => count(command.result()),
            CommandKind::Delete(command) => count(command.result()),
            CommandKind::CreateTable(_) | CommandKind::DropTable(_) | CommandKind::InsertRow(_) => {
                CommandOutput::Done
            }
        }
    }
}

fn count(result: Option<&usize>) -> CommandOutput {
    CommandOutput::Count(result.copied().unwrap_or_default())
}

impl Command for JsonQlCommand {
    type Output = CommandOutput;

    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"type": {"enum": JsonQlParser::COMMAND_TYPES}},
            "required": ["type"]
        })
    }

    fn from_json(json: &Value) -> Result<Self> {
        JsonQlParser::parse_command(json)
    }

    fn next_block(&mut self, storage: &mut DataBaseStorage) -> Result<Option<Block>> {
        if self.output.is_some() {
            return Ok(None);
        }
        let block = match &mut self.kind {
            CommandKind::CreateTable(command) => command.next_block(storage)?,
            CommandKind::DropTable(command) => command.next_block(storage)?,
            CommandKind::Select(command) => command.next_block(storage)?,
            CommandKind::InsertRow(command) => command.next_block(storage)?,
            CommandKind::InsertRows(command) => command.next_block(storage)?,
            CommandKind::Insert(command) => command.next_block(storage)?,
            CommandKind::Update(command) => command.next_block(storage)?,
            CommandKind::Delete(command) => command.next_block(storage)?,
        };
        if block.is_none() {
            self.output = Some(self.finish());
        }
        Ok(block)
    }

    fn result(&self) -> Option<&CommandOutput> {
        self.output.as_ref()
    }

    fn into_result(self) -> Option<CommandOutput> {
        self.output
    }
}

pub struct JsonQlParser;

impl JsonQlParser {
    pub const COMMAND_TYPES: [&'static str; 8] = [
        "create_table",
        "drop_table",
        "select",
        "insert_row",
        "insert_rows",
        "insert",
        "update",
        "delete",
    ];

    /// Parses JSONQL text. Text that is not JSON fails with a serde error.
    pub fn parse_str(text: &str) -> Result<Vec<JsonQlCommand>> {
        let json: Value = serde_json::from_str(text)?;
        Self::parse(&json)
    }

    /// Parses one command object or an array of them, keeping their order.
    ///
    /// Violations from every item of an array are reported together, rooted at
    /// the item's position.
    pub fn parse(json: &Value) -> Result<Vec<JsonQlCommand>> {
        let Value::Array(items) = json else {
            return Ok(vec![Self::parse_command(json)?]);
        };

        let mut commands = Vec::with_capacity(items.len());
        let mut violations = Vec::new();
        for (index, item) in items.iter().enumerate() {
            match Self::parse_command(item) {
                Ok(command) => commands.push(command),
                Err(Error::JsonQl(exception)) => {
                    violations.extend(exception.nested(&format!("$[{index}]")).violations)
                }
                Err(err) => return Err(err),
            }
        }
        if !violations.is_empty() {
            return Err(JsonQlException::new(violations).into());
        }
        Ok(commands)
    }

    pub fn parse_command(json: &Value) -> Result<JsonQlCommand> {
        if !json.is_object() {
            return Err(JsonQlException::single("$: expected a command object or an array of commands").into());
        }
        let command_type = match json.get("type") {
            Some(Value::String(command_type)) => command_type.as_str(),
            Some(other) => {
                return Err(JsonQlException::single(format!("$.type: expected string, got {other}")).into())
            }
            None => return Err(JsonQlException::single("$: missing required property \"type\"").into()),
        };

        let kind = match command_type {
            "create_table" => CommandKind::CreateTable(CreateTable::from_json(json)?),
            "drop_table" => CommandKind::DropTable(DropTable::from_json(json)?),
            "select" => CommandKind::Select(Select::from_json(json)?),
            "insert_row" => CommandKind::InsertRow(InsertRow::from_json(json)?),
            "insert_rows" => CommandKind::InsertRows(InsertRows::from_json(json)?),
            "insert" => CommandKind::Insert(Insert::from_json(json)?),
            "update" => CommandKind::Update(Update::from_json(json)?),
            "delete" => CommandKind::Delete(Delete::from_json(json)?),
            unknown => {
                return Err(JsonQlException::single(format!("$.type: unknown command type {unknown:?}")).into())
            }
        };
        Ok(JsonQlCommand::new(kind))
    }
}

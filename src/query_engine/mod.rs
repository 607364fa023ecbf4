//! JSONQL commands and the step-wise protocol that executes them.
//!
//! A command never writes to storage itself. Every block it changes is handed
//! to the caller by [`Command::next_block`], and the caller must persist it with
//! [`DataBaseStorage::write_block`] before asking for the next one. Stopping
//! early leaves exactly the blocks written so far on disk. [`Execution`] is the
//! iterator that does the write-back.

use serde_json::Value;

use crate::common::error::Result;
use crate::storage_engine::{Block, DataBaseStorage};

pub mod ddl;
pub mod delete;
pub mod expression;
pub mod insert;
pub mod row_set;
pub mod schema;
pub mod select;
pub mod update;

pub use ddl::{CreateTable, DropTable};
pub use delete::Delete;
pub use expression::Expression;
pub use insert::{Insert, InsertRow, InsertRows};
pub use row_set::RowSet;
pub use select::Select;
pub use update::Update;

pub trait Command {
    type Output;

    /// JSON Schema of the wire form.
    fn json_schema() -> Value
    where
        Self: Sized;

    /// Builds the command from its wire form, failing with every schema violation.
    fn from_json(json: &Value) -> Result<Self>
    where
        Self: Sized;

    /// Advances execution to the next mutated block, or `None` once complete.
    fn next_block(&mut self, storage: &mut DataBaseStorage) -> Result<Option<Block>>;

    /// `None` until execution has completed.
    fn result(&self) -> Option<&Self::Output>;

    fn into_result(self) -> Option<Self::Output>
    where
        Self: Sized;

    fn execute<'a>(&'a mut self, storage: &'a mut DataBaseStorage) -> Execution<'a, Self>
    where
        Self: Sized,
    {
        Execution {
            command: self,
            storage,
            finished: false,
        }
    }

    /// Executes to completion, persisting every block, and returns the result.
    fn run(mut self, storage: &mut DataBaseStorage) -> Result<Option<Self::Output>>
    where
        Self: Sized,
    {
        self.execute(storage).run()?;
        Ok(self.into_result())
    }
}

/// Drives a command, writing each mutated block back before yielding it.
pub struct Execution<'a, C: Command> {
    command: &'a mut C,
    storage: &'a mut DataBaseStorage,
    finished: bool,
}

impl<'a, C: Command> Execution<'a, C> {
    /// Drains the execution and returns how many blocks were written.
    pub fn run(self) -> Result<usize> {
        let mut written = 0;
        for block in self {
            block?;
            written += 1;
        }
        Ok(written)
    }
}

impl<'a, C: Command> Drop for Execution<'a, C> {
    /// Blocks the command allocated but never handed over go back to the free
    /// list, whether it failed or was abandoned.
    fn drop(&mut self) {
        self.storage.release_reservations();
    }
}

impl<'a, C: Command> Iterator for Execution<'a, C> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let step = self
            .command
            .next_block(self.storage)
            .and_then(|block| match block {
                Some(block) => self.storage.write_block(&block).map(|()| Some(block)),
                None => Ok(None),
            });
        match step {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// The `type`, `table_name` pair every command schema starts from.
pub(crate) fn base_properties(command_type: &str) -> serde_json::Map<String, Value> {
    let mut properties = serde_json::Map::new();
    properties.insert("type".into(), serde_json::json!({ "const": command_type }));
    properties.insert(
        "table_name".into(),
        serde_json::json!({ "type": "string", "minLength": 1 }),
    );
    properties
}

pub(crate) fn command_schema(
    properties: serde_json::Map<String, Value>,
    required: &[&str],
) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// `table_name` of a document that already passed its schema.
pub(crate) fn table_name(json: &Value) -> String {
    json.get("table_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Parses the optional `where` property, defaulting to match-all.
pub(crate) fn parse_filter(json: &Value, violations: &mut Vec<String>) -> Expression {
    match json.get("where") {
        Some(filter) => Expression::parse(filter, "$.where", violations).unwrap_or_default(),
        None => Expression::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::Error;
    use crate::test_utils::temp_storage;

    /// Allocates a block, then fails before yielding it.
    struct AllocateThenFail;

    impl Command for AllocateThenFail {
        type Output = ();

        fn json_schema() -> Value {
            Value::Null
        }

        fn from_json(_: &Value) -> Result<Self> {
            Ok(Self)
        }

        fn next_block(&mut self, storage: &mut DataBaseStorage) -> Result<Option<Block>> {
            let block = storage.allocate_block()?;
            Err(Error::corrupt_block(block.index(), "failed after allocating"))
        }

        fn result(&self) -> Option<&()> {
            None
        }

        fn into_result(self) -> Option<()> {
            None
        }
    }

    #[test]
    fn failed_execution_releases_its_allocations() {
        let (_dir, mut storage) = temp_storage(64);
        for _ in 0..3 {
            let err = AllocateThenFail.run(&mut storage).unwrap_err();
            assert!(matches!(err, Error::CorruptBlock { index: 0, .. }));
        }
        assert_eq!(storage.block_count(), 1);
        assert_eq!(storage.free_block_count(), 1);
    }

    #[test]
    fn execution_stops_after_an_error() {
        let (_dir, mut storage) = temp_storage(64);
        let mut command = AllocateThenFail;
        let mut execution = command.execute(&mut storage);
        assert!(matches!(execution.next(), Some(Err(_))));
        assert!(execution.next().is_none());
    }
}

use serde_json::{json, Value};
use tempfile::TempDir;

use surikov_db::common::ColumnType;
use surikov_db::query_engine::{CreateTable, Delete, DropTable, Expression, InsertRows, Select, Update};
use surikov_db::{Command, CommandOutput, DataBaseConfig, DataBaseStorage, Error, JsonQlParser};

fn open(dir: &TempDir, block_size: usize) -> DataBaseStorage {
    let config = DataBaseConfig::new(dir.path().join("scenario.surikov"), block_size);
    DataBaseStorage::from_config(&config).unwrap()
}

/// Runs a document and renders every output the way the shell prints it.
fn run(storage: &mut DataBaseStorage, document: Value) -> Vec<Value> {
    JsonQlParser::parse(&document)
        .unwrap()
        .into_iter()
        .map(|command| command.run(storage).unwrap().map_or(Value::Null, CommandOutput::into_json))
        .collect()
}

#[test]
fn users_scenario_with_small_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage = open(&dir, 64);

    let outputs = run(
        &mut storage,
        json!([
            {"type": "create_table", "table_name": "users", "columns": ["id", "name"]},
            {"type": "insert_rows", "table_name": "users", "rows": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]},
            {"type": "select", "table_name": "users", "where": {"eq": ["id", 1]}},
            {"type": "update", "table_name": "users", "where": {"eq": ["id", 2]}, "set": {"name": {"literal": "bb"}}},
            {"type": "select", "table_name": "users"}
        ]),
    );

    assert_eq!(
        outputs,
        vec![
            json!({"ok": true}),
            json!({"count": 2}),
            json!({"rows": [{"id": 1, "name": "a"}]}),
            json!({"count": 1}),
            json!({"rows": [{"id": 1, "name": "a"}, {"id": 2, "name": "bb"}]}),
        ]
    );
}

#[test]
fn tables_and_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut storage = open(&dir, 128);
        CreateTable::new("events", vec![("seq".into(), ColumnType::Int), ("kind".into(), ColumnType::String)])
            .run(&mut storage)
            .unwrap();
        let rows = (0..40)
            .map(|seq| json!({"seq": seq, "kind": if seq % 2 == 0 { "even" } else { "odd" }}))
            .map(|row| row.as_object().cloned().unwrap())
            .collect();
        InsertRows::new("events", rows).run(&mut storage).unwrap();
        Delete::new("events", Expression::column_eq("kind", "odd"))
            .run(&mut storage)
            .unwrap();
        storage.sync().unwrap();
    }

    let mut storage = open(&dir, 128);
    let seqs: Vec<Value> = Select::all("events")
        .run(&mut storage)
        .unwrap()
        .unwrap()
        .map(|row| row["seq"].clone())
        .collect();
    assert_eq!(seqs, (0..40).step_by(2).map(Value::from).collect::<Vec<_>>());
}

#[test]
fn reopening_with_another_block_size_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut storage = open(&dir, 64);
        CreateTable::new("t", vec![("a".into(), ColumnType::Any)])
            .run(&mut storage)
            .unwrap();
        // 64 bytes on disk, not a multiple of 48
    }
    let config = DataBaseConfig::new(dir.path().join("scenario.surikov"), 48);
    assert!(matches!(
        DataBaseStorage::from_config(&config),
        Err(Error::CorruptStorage { file_size: 64, .. })
    ));
}

#[test]
fn dropped_table_is_gone_for_every_command() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage = open(&dir, 64);
    run(
        &mut storage,
        json!([
            {"type": "create_table", "table_name": "users", "columns": ["id"]},
            {"type": "insert_rows", "table_name": "users", "rows": [{"id": 1}]},
            {"type": "drop_table", "table_name": "users"}
        ]),
    );

    assert!(matches!(Select::all("users").run(&mut storage), Err(Error::TableNotFound(_))));
    assert!(matches!(
        Delete::new("users", Expression::default()).run(&mut storage),
        Err(Error::TableNotFound(_))
    ));
    assert!(matches!(
        DropTable::new("users").run(&mut storage),
        Err(Error::TableNotFound(_))
    ));

    // the name is free again
    let outputs = run(
        &mut storage,
        json!([
            {"type": "create_table", "table_name": "users", "columns": [{"name": "email", "type": "string"}]},
            {"type": "select", "table_name": "users"}
        ]),
    );
    assert_eq!(outputs, vec![json!({"ok": true}), json!({"rows": []})]);
}

#[test]
fn invalid_batch_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(&dir, 64);

    let err = JsonQlParser::parse_str(
        r#"[
            {"type": "create_table", "table_name": "users", "columns": ["id"]},
            {"type": "update", "table_name": "users", "set": {"id": {"pow": [2, 3]}}},
            {"type": "explode"}
        ]"#,
    )
    .unwrap_err();

    let exception = match err {
        Error::JsonQl(exception) => exception,
        other => panic!("expected a JSONQL error, got {other}"),
    };
    assert_eq!(
        exception.violations(),
        [
            "$[1].set.id.pow: unknown operator \"pow\"",
            "$[2].type: unknown command type \"explode\"",
        ]
    );
    assert_eq!(storage.block_count(), 0);
}

#[test]
fn stopping_early_keeps_only_the_blocks_already_written() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut storage = open(&dir, 64);
        CreateTable::new("t", vec![("n".into(), ColumnType::Int)])
            .run(&mut storage)
            .unwrap();
        let rows = (0..12).map(|n| json!({"n": n}).as_object().cloned().unwrap()).collect();
        InsertRows::new("t", rows).run(&mut storage).unwrap();

        // every row block holds four rows; stop after the first one is rewritten
        let mut update = Update::new(
            "t",
            Expression::default(),
            [("n".to_string(), Expression::literal(-1))].into_iter().collect(),
        );
        let first = update.execute(&mut storage).next();
        assert!(matches!(first, Some(Ok(_))));
        assert!(update.result().is_none());
    }

    let mut storage = open(&dir, 64);
    let rewritten = Select::new("t", Expression::column_eq("n", -1))
        .run(&mut storage)
        .unwrap()
        .unwrap();
    assert_eq!(rewritten.len(), 4);
}

#[test]
fn insert_from_select_across_tables() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage = open(&dir, 256);

    let outputs = run(
        &mut storage,
        json!([
            {"type": "create_table", "table_name": "scores", "columns": [{"name": "player", "type": "string"}, {"name": "points", "type": "int"}]},
            {"type": "create_table", "table_name": "podium", "columns": [{"name": "player", "type": "string"}, {"name": "points", "type": "any"}]},
            {"type": "insert_rows", "table_name": "scores", "rows": [
                {"player": "ana", "points": 31},
                {"player": "bo", "points": 12},
                {"player": "cy", "points": 27}
            ]},
            {"type": "insert", "table_name": "podium", "select": {"type": "select", "table_name": "scores", "where": {"gt": ["points", 20]}}},
            {"type": "update", "table_name": "podium", "set": {"points": {"add": ["points", 0.5]}}},
            {"type": "select", "table_name": "podium"}
        ]),
    );

    assert_eq!(outputs[3], json!({"count": 2}));
    assert_eq!(outputs[4], json!({"count": 2}));
    assert_eq!(
        outputs[5],
        json!({"rows": [{"player": "ana", "points": 31.5}, {"player": "cy", "points": 27.5}]})
    );
}

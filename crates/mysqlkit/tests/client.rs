//! Cursor and getter behavior of `Client` over the in-memory connection.

mod common;

use std::fs;

use chrono::NaiveDate;
use common::MemoryDb;
use mysqlkit::{Client, Row, StatementResult, Value};

fn seeded_rows() -> StatementResult {
    let names = || {
        vec![
            "id".to_string(),
            "integervalue".to_string(),
            "doublevalue".to_string(),
            "booleanvalue".to_string(),
            "stringvalue".to_string(),
            "datetimevalue".to_string(),
        ]
    };
    StatementResult {
        rows: vec![
            Row::new(
                names(),
                vec![
                    Value::Int(1),
                    Value::Int(11),
                    Value::Double(1.15),
                    Value::TinyInt(1),
                    Value::Text("hello".into()),
                    Value::Text("2020-02-01 05:33:01".into()),
                ],
            ),
            Row::new(
                names(),
                vec![
                    Value::Int(2),
                    Value::Null,
                    Value::Null,
                    Value::TinyInt(0),
                    Value::Null,
                    Value::Null,
                ],
            ),
        ],
        ..StatementResult::default()
    }
}

#[test]
fn test_exec_and_iterate() {
    let mut db = MemoryDb::new();
    db.scripted.push_back(seeded_rows());
    let mut client = Client::from_connection(db);

    client.prepare("SELECT * FROM mytable1 WHERE integervalue > ?");
    client.bind_integer(10);
    client.exec().unwrap();

    assert!(client.next());
    assert_eq!(client.get_integer(0), Some(1));
    assert_eq!(client.get_integer(1), Some(11));
    assert_eq!(client.get_double(2), Some(1.15));
    assert_eq!(client.get_boolean(3), Some(true));
    assert_eq!(client.get_string(4).as_deref(), Some("hello"));
    assert_eq!(
        client.get_date_time(5),
        NaiveDate::from_ymd_opt(2020, 2, 1).and_then(|d| d.and_hms_opt(5, 33, 1))
    );

    assert!(client.next());
    assert_eq!(client.get_integer(1), None);
    assert_eq!(client.get_double(2), None);
    assert_eq!(client.get_boolean(3), Some(false));
    assert_eq!(client.get_string(4), None);
    assert_eq!(client.get_date_time(5), None);

    assert!(!client.next());
    assert_eq!(client.get_integer(0), None);

    let db = client.connection_mut().unwrap();
    assert_eq!(db.statements, vec!["SELECT * FROM mytable1 WHERE integervalue > ?"]);
}

#[test]
fn test_end_next_discards_rows() {
    let mut db = MemoryDb::new();
    db.scripted.push_back(seeded_rows());
    let mut client = Client::from_connection(db);

    client.prepare("SELECT * FROM mytable1");
    client.exec().unwrap();
    assert!(client.next());
    client.end_next();
    assert!(client.current_row().is_none());
    assert!(!client.next());
}

#[test]
fn test_prepare_clears_bindings() {
    let mut client = Client::from_connection(MemoryDb::new());
    client.prepare("INSERT INTO t VALUES (?, ?, ?, ?, ?)");
    client.bind_integer(11);
    client.bind_double(1.15);
    client.bind_boolean(true);
    client.bind_string("hello");
    client.bind_date_time(
        NaiveDate::from_ymd_opt(2020, 2, 1)
            .unwrap()
            .and_hms_opt(5, 33, 1)
            .unwrap(),
    );
    assert_eq!(client.bound_params().len(), 5);
    assert_eq!(client.bound_params()[0], Value::Int(11));
    assert_eq!(client.bound_params()[3], Value::Text("hello".into()));
    assert!(matches!(client.bound_params()[4], Value::Timestamp(_)));

    client.prepare("SELECT 1");
    assert!(client.bound_params().is_empty());
    assert_eq!(client.prepared_query(), "SELECT 1");
}

#[test]
fn test_exec_records_counters() {
    let mut db = MemoryDb::new();
    db.scripted.push_back(StatementResult {
        affected_rows: 1,
        last_insert_id: 6,
        ..StatementResult::default()
    });
    let mut client = Client::from_connection(db);

    client.prepare("INSERT INTO mytable1 (integervalue) VALUES (16)");
    client.exec().unwrap();
    assert_eq!(client.affected_rows(), 1);
    assert_eq!(client.last_insert_id(), 6);
    assert!(!client.next());
}

#[test]
fn test_blob_helpers_report_flags() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("photo.jpg");
    let target = dir.path().join("out.jpg");
    fs::write(&source, [0xFFu8, 0xD8, 0xFF]).unwrap();

    let mut client = Client::from_connection(MemoryDb::new());
    assert!(client.insert_blob(&source, "t", "img"));
    let id = client.last_insert_id();
    assert_eq!(id, 1);

    assert!(client.set_blob(&source, "t", "img", "id", 1));
    assert_eq!(client.affected_rows(), 1);

    assert!(client.get_blob("t", "img", "id", 1, &target));
    assert_eq!(fs::read(&target).unwrap(), vec![0xFF, 0xD8, 0xFF]);

    assert!(!client.get_blob("t", "img", "id", 2, dir.path().join("none.jpg")));
    assert!(!client.insert_blob(dir.path().join("missing.jpg"), "t", "img"));
}

#[test]
fn test_close_releases_connection() {
    let mut client = Client::from_connection(MemoryDb::new());
    assert!(client.is_open());
    client.close().unwrap();
    assert!(!client.is_open());
    assert!(client.connection_mut().is_none());
    client.close().unwrap();
}

mod helpers;

use dbi_engine::client::mock::{cell, MockClient};
use dbi_engine::client::FieldInfo;
use dbi_engine::{
    DbiError, DbiStatement, DriverConfig, ErrorCategory, FetchMode, FieldType, PullResult,
};
use helpers::{mock_driver_with, open_handle};

const NOTES: &str = "SELECT id, note, blob_col FROM notes";

fn script_notes(client: &MockClient) {
    client.script(
        NOTES,
        vec![
            FieldInfo::new("id", FieldType::Long),
            FieldInfo::new("note", FieldType::VarString),
            FieldInfo::new("blob_col", FieldType::MediumBlob),
        ],
        vec![
            vec![cell("1"), cell("a note well past four bytes"), None],
            vec![cell("2"), None, Some(vec![1, 2, 3, 4, 5, 6])],
        ],
    );
}

fn config(mode: FetchMode, capacity: usize) -> DriverConfig {
    DriverConfig {
        fetch_mode: mode,
        initial_value_capacity: capacity,
        ..DriverConfig::default()
    }
}

fn owned(result: PullResult<'_>) -> Option<Vec<u8>> {
    match result {
        PullResult::Value(v) => v.data.map(<[u8]>::to_vec),
        PullResult::Done => panic!("unexpected Done"),
    }
}

#[test]
fn test_pull_grows_buffer_for_long_values() {
    let client = MockClient::new();
    script_notes(&client);
    let driver = mock_driver_with(&client, config(FetchMode::Pull, 4));
    let mut handle = open_handle(&driver);

    let mut stmt = DbiStatement::new(NOTES);
    driver.prepare(&mut handle, &mut stmt).unwrap();
    driver.exec(&mut handle, &mut stmt, &[]).unwrap();

    assert_eq!(
        owned(driver.next_value(&mut handle, &mut stmt, 0, 0).unwrap()),
        Some(b"1".to_vec())
    );
    assert_eq!(
        owned(driver.next_value(&mut handle, &mut stmt, 1, 0).unwrap()),
        Some(b"a note well past four bytes".to_vec())
    );
    assert_eq!(
        owned(driver.next_value(&mut handle, &mut stmt, 2, 0).unwrap()),
        None
    );

    driver.flush(&mut handle, &mut stmt).unwrap();
    assert_eq!(driver.metrics().snapshot().buffer_regrowths, 1);
}

#[test]
fn test_pull_null_reports_zero_length_despite_stale_client_length() {
    let client = MockClient::new();
    script_notes(&client);
    client.set_stale_null_length(99);
    let driver = mock_driver_with(&client, config(FetchMode::Pull, 200));
    let mut handle = open_handle(&driver);

    let mut stmt = DbiStatement::new(NOTES);
    driver.prepare(&mut handle, &mut stmt).unwrap();
    driver.exec(&mut handle, &mut stmt, &[]).unwrap();
    for col in 0..3 {
        driver.next_value(&mut handle, &mut stmt, col, 0).unwrap();
    }
    driver.next_value(&mut handle, &mut stmt, 0, 1).unwrap();
    match driver.next_value(&mut handle, &mut stmt, 1, 1).unwrap() {
        PullResult::Value(v) => {
            assert_eq!(v.data, None);
            assert_eq!(v.length, 0);
            assert!(!v.binary);
        }
        PullResult::Done => panic!("expected NULL value"),
    }
    match driver.next_value(&mut handle, &mut stmt, 2, 1).unwrap() {
        PullResult::Value(v) => {
            assert_eq!(v.data, Some(&[1u8, 2, 3, 4, 5, 6][..]));
            assert!(v.binary);
        }
        PullResult::Done => panic!("expected blob value"),
    }
    assert_eq!(
        driver.next_value(&mut handle, &mut stmt, 0, 2).unwrap(),
        PullResult::Done
    );
    // Exhausted statements keep answering Done.
    assert_eq!(
        driver.next_value(&mut handle, &mut stmt, 0, 3).unwrap(),
        PullResult::Done
    );
}

#[test]
fn test_pull_value_still_growing_is_truncation() {
    let client = MockClient::new();
    script_notes(&client);
    client.set_length_drift(8);
    let driver = mock_driver_with(&client, config(FetchMode::Pull, 4));
    let mut handle = open_handle(&driver);

    let mut stmt = DbiStatement::new(NOTES);
    driver.prepare(&mut handle, &mut stmt).unwrap();
    driver.exec(&mut handle, &mut stmt, &[]).unwrap();
    driver.next_value(&mut handle, &mut stmt, 0, 0).unwrap();

    let err = driver.next_value(&mut handle, &mut stmt, 1, 0).unwrap_err();
    assert_eq!(err.error_category(), ErrorCategory::Execute);
    assert_eq!(err.sqlstate_str(), "01004");
    assert_eq!(handle.exception().sqlstate(), "01004");
}

#[test]
fn test_pull_call_in_bound_mode_is_unsupported() {
    let client = MockClient::new();
    script_notes(&client);
    let driver = mock_driver_with(&client, config(FetchMode::Bound, 200));
    let mut handle = open_handle(&driver);

    let mut stmt = DbiStatement::new(NOTES);
    driver.prepare(&mut handle, &mut stmt).unwrap();
    driver.exec(&mut handle, &mut stmt, &[]).unwrap();
    let err = driver.next_value(&mut handle, &mut stmt, 0, 0).unwrap_err();
    assert!(matches!(err, DbiError::UnsupportedFeature(_)));
}

#[test]
fn test_bound_rows_lengths_and_values() {
    let client = MockClient::new();
    script_notes(&client);
    client.set_stale_null_length(77);
    let driver = mock_driver_with(&client, config(FetchMode::Bound, 200));
    let mut handle = open_handle(&driver);

    let mut stmt = DbiStatement::new(NOTES);
    driver.prepare(&mut handle, &mut stmt).unwrap();
    driver.exec(&mut handle, &mut stmt, &[]).unwrap();

    assert!(driver.next_row(&mut handle, &mut stmt).unwrap());
    assert_eq!(driver.column_length(&mut handle, &stmt, 1).unwrap(), (27, false));
    assert_eq!(driver.column_length(&mut handle, &stmt, 2).unwrap(), (0, true));

    let mut buf = vec![0u8; 27];
    let n = driver.column_value(&mut handle, &mut stmt, 1, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"a note well past four bytes");

    let mut small = [0u8; 3];
    let err = driver
        .column_value(&mut handle, &mut stmt, 1, &mut small)
        .unwrap_err();
    assert_eq!(err.sqlstate_str(), "01004");

    assert!(driver.next_row(&mut handle, &mut stmt).unwrap());
    assert_eq!(driver.column_length(&mut handle, &stmt, 1).unwrap(), (0, false));
    assert_eq!(
        driver.column_value(&mut handle, &mut stmt, 1, &mut small).unwrap(),
        0
    );
    assert_eq!(driver.column_length(&mut handle, &stmt, 2).unwrap(), (6, true));

    assert!(!driver.next_row(&mut handle, &mut stmt).unwrap());
    assert_eq!(handle.connection().unwrap().active_cursor(), None);
    assert!(!driver.next_row(&mut handle, &mut stmt).unwrap());
}

#[test]
fn test_bound_rejects_wide_result_sets() {
    let client = MockClient::new();
    let columns = (0..65)
        .map(|i| FieldInfo::new(format!("c{}", i), FieldType::Long))
        .collect();
    client.script("SELECT * FROM wide", columns, vec![]);
    let driver = mock_driver_with(&client, config(FetchMode::Bound, 200));
    let mut handle = open_handle(&driver);

    let mut stmt = DbiStatement::new("SELECT * FROM wide");
    assert_eq!(driver.prepare(&mut handle, &mut stmt).unwrap(), (0, 65));
    let err = driver.exec(&mut handle, &mut stmt, &[]).unwrap_err();
    assert_eq!(err.sqlstate_str(), "54011");
    assert_eq!(handle.connection().unwrap().active_cursor(), None);
}

#[test]
fn test_bound_reads_require_the_statement_holding_the_cursor() {
    let client = MockClient::new();
    client.script(
        "SELECT avatar FROM a",
        vec![FieldInfo::new("avatar", FieldType::Blob)],
        vec![vec![Some(vec![9, 9])]],
    );
    client.script(
        "SELECT greeting FROM b",
        vec![FieldInfo::new("greeting", FieldType::VarString)],
        vec![vec![cell("hello world")]],
    );
    let driver = mock_driver_with(&client, config(FetchMode::Bound, 200));
    let mut handle = open_handle(&driver);

    let mut a = DbiStatement::new("SELECT avatar FROM a");
    let mut b = DbiStatement::new("SELECT greeting FROM b");
    driver.prepare(&mut handle, &mut a).unwrap();
    driver.prepare(&mut handle, &mut b).unwrap();

    driver.exec(&mut handle, &mut a, &[]).unwrap();
    driver.flush(&mut handle, &mut a).unwrap();
    let err = driver.column_length(&mut handle, &a, 0).unwrap_err();
    assert!(matches!(err, DbiError::InvalidState(_)));

    driver.exec(&mut handle, &mut b, &[]).unwrap();
    assert!(driver.next_row(&mut handle, &mut b).unwrap());

    let err = driver.column_length(&mut handle, &a, 0).unwrap_err();
    assert!(matches!(err, DbiError::CursorActive { active } if active == b.id()));
    let mut buf = [0u8; 32];
    let err = driver
        .column_value(&mut handle, &mut a, 0, &mut buf)
        .unwrap_err();
    assert_eq!(err.sqlstate_str(), "24000");

    assert_eq!(driver.column_length(&mut handle, &b, 0).unwrap(), (11, false));
    let n = driver.column_value(&mut handle, &mut b, 0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello world");
}

//! End-to-end tests against a live MySQL server through Connector/ODBC.
//!
//! Set ODBC_TEST_DSN (environment or `.env`) to a configured DSN name and
//! run with `--ignored`.

mod helpers;

use dbi_engine::{
    DbiHandle, DbiStatement, Driver, DriverConfig, ExecOutcome, IsolationLevel, ParamValue,
    PullResult, TransactionCmd,
};
use helpers::test_dsn;

fn live_driver() -> Option<Driver> {
    let _ = env_logger::builder().is_test(true).try_init();
    let Some(dsn) = test_dsn() else {
        eprintln!("⚠️  Skipping: ODBC_TEST_DSN not set");
        return None;
    };
    let config = DriverConfig {
        dsn: Some(dsn),
        ..DriverConfig::default()
    };
    Some(Driver::odbc(config).expect("odbc driver"))
}

fn first_text(driver: &Driver, handle: &mut DbiHandle, stmt: &mut DbiStatement) -> Option<String> {
    match driver.next_value(handle, stmt, 0, 0).expect("next_value") {
        PullResult::Value(v) => v.data.map(|d| String::from_utf8_lossy(d).into_owned()),
        PullResult::Done => None,
    }
}

#[test]
#[ignore]
fn e2e_open_select_close() {
    let Some(driver) = live_driver() else {
        return;
    };
    let mut handle = DbiHandle::new();
    driver.open(&mut handle).expect("open");
    assert!(driver.connected(&mut handle));

    let mut stmt = DbiStatement::new("SELECT CAST(? AS CHAR) AS v");
    assert_eq!(driver.prepare(&mut handle, &mut stmt).unwrap(), (1, 1));
    assert_eq!(
        driver
            .exec(&mut handle, &mut stmt, &[ParamValue::text("42")])
            .unwrap(),
        ExecOutcome::Rows
    );
    assert_eq!(
        first_text(&driver, &mut handle, &mut stmt).as_deref(),
        Some("42")
    );
    assert_eq!(
        driver.next_value(&mut handle, &mut stmt, 0, 1).unwrap(),
        PullResult::Done
    );

    driver.prepare_close(&mut handle, &mut stmt);
    driver.close(&mut handle);
}

#[test]
#[ignore]
fn e2e_savepoint_rollback_keeps_outer_work() {
    let Some(driver) = live_driver() else {
        return;
    };
    let mut handle = DbiHandle::new();
    driver.open(&mut handle).expect("open");

    let run = |sql: &str, handle: &mut DbiHandle| {
        let mut stmt = DbiStatement::new(sql);
        driver.prepare(handle, &mut stmt).expect("prepare");
        driver.exec(handle, &mut stmt, &[]).expect("exec");
        driver.prepare_close(handle, &mut stmt);
    };
    run("DROP TEMPORARY TABLE IF EXISTS dbi_sp", &mut handle);
    run("CREATE TEMPORARY TABLE dbi_sp (id INT) ENGINE=InnoDB", &mut handle);

    let iso = IsolationLevel::ReadCommitted;
    driver
        .transaction(&mut handle, 0, TransactionCmd::Begin, iso)
        .unwrap();
    run("INSERT INTO dbi_sp VALUES (1)", &mut handle);
    driver
        .transaction(&mut handle, 1, TransactionCmd::Begin, iso)
        .unwrap();
    run("INSERT INTO dbi_sp VALUES (2)", &mut handle);
    driver
        .transaction(&mut handle, 1, TransactionCmd::Rollback, iso)
        .unwrap();
    driver
        .transaction(&mut handle, 0, TransactionCmd::Commit, iso)
        .unwrap();

    let mut count = DbiStatement::new("SELECT COUNT(*) FROM dbi_sp");
    driver.prepare(&mut handle, &mut count).unwrap();
    driver.exec(&mut handle, &mut count, &[]).unwrap();
    assert_eq!(
        first_text(&driver, &mut handle, &mut count).as_deref(),
        Some("1")
    );
    driver.flush(&mut handle, &mut count).unwrap();
    driver.close(&mut handle);
}

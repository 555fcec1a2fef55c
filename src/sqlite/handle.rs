use rusqlite::OpenFlags;

use crate::connection::ConnectOptions;
use crate::driver::{Driver, DriverHandle};
use crate::error::SqliteBridgeError;
use crate::types::{IsolationLevel, RowFactory, RowValues, TextFactory};

use super::cursor::SqliteCursor;
use super::params::Params;
use super::query::collect_rows;

/// Opens rusqlite connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl Driver for SqliteDriver {
    type Handle = SqliteHandle;

    fn open(
        &self,
        target: &str,
        options: &ConnectOptions,
    ) -> Result<Self::Handle, SqliteBridgeError> {
        let mut flags = if options.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };
        if options.uri {
            flags |= OpenFlags::SQLITE_OPEN_URI;
        }
        // The bridge guarantees exclusive access, so SQLite's own mutex is redundant.
        flags |= OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = rusqlite::Connection::open_with_flags(target, flags)?;
        conn.busy_timeout(options.timeout)?;

        Ok(SqliteHandle {
            conn,
            isolation_level: options.isolation_level,
            row_factory: RowFactory::default(),
            text_factory: TextFactory::default(),
        })
    }
}

/// A rusqlite connection plus the classic sqlite3 transaction settings.
#[derive(Debug)]
pub struct SqliteHandle {
    conn: rusqlite::Connection,
    isolation_level: Option<IsolationLevel>,
    row_factory: RowFactory,
    text_factory: TextFactory,
}

impl SqliteHandle {
    /// Borrow the underlying rusqlite connection.
    #[must_use]
    pub fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }

    pub fn raw_mut(&mut self) -> &mut rusqlite::Connection {
        &mut self.conn
    }

    fn begin_if_needed(&self, sql: &str) -> Result<(), SqliteBridgeError> {
        let Some(level) = self.isolation_level else {
            return Ok(());
        };
        if self.conn.is_autocommit() && starts_implicit_transaction(sql) {
            self.conn.execute_batch(&format!("BEGIN {}", level.as_sql()))?;
        }
        Ok(())
    }

    fn commit_pending(&self) -> Result<(), SqliteBridgeError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }
}

impl DriverHandle for SqliteHandle {
    type Cursor = SqliteCursor;

    fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Self::Cursor, SqliteBridgeError> {
        self.begin_if_needed(sql)?;
        let params = Params::convert(params);
        let mut stmt = self.conn.prepare(sql)?;

        if stmt.column_count() > 0 {
            let (columns, rows) =
                collect_rows(&mut stmt, &params, self.row_factory, self.text_factory)?;
            return Ok(SqliteCursor::with_rows(columns, rows));
        }

        let changed = stmt.execute(&params.as_refs()[..])?;
        Ok(SqliteCursor::with_changes(
            i64::try_from(changed).unwrap_or(i64::MAX),
            self.conn.last_insert_rowid(),
        ))
    }

    fn execute_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<Self::Cursor, SqliteBridgeError> {
        if !starts_implicit_transaction(sql) {
            return Err(SqliteBridgeError::ExecutionError(
                "execute_many can only run INSERT, UPDATE, DELETE or REPLACE statements".into(),
            ));
        }
        self.begin_if_needed(sql)?;

        let mut stmt = self.conn.prepare(sql)?;
        let mut total: usize = 0;
        for set in param_sets {
            let params = Params::convert(set);
            total = total.saturating_add(stmt.execute(&params.as_refs()[..])?);
        }
        Ok(SqliteCursor::with_changes(
            i64::try_from(total).unwrap_or(i64::MAX),
            self.conn.last_insert_rowid(),
        ))
    }

    fn execute_script(&mut self, script: &str) -> Result<Self::Cursor, SqliteBridgeError> {
        self.commit_pending()?;
        self.conn.execute_batch(script)?;
        Ok(SqliteCursor::empty())
    }

    fn cursor(&mut self) -> Result<Self::Cursor, SqliteBridgeError> {
        Ok(SqliteCursor::empty())
    }

    fn commit(&mut self) -> Result<(), SqliteBridgeError> {
        self.commit_pending()
    }

    fn rollback(&mut self) -> Result<(), SqliteBridgeError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn close(self) -> Result<(), SqliteBridgeError> {
        self.conn.close().map_err(|(_, e)| SqliteBridgeError::SqliteError(e))
    }

    fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation_level
    }

    fn set_isolation_level(
        &mut self,
        level: Option<IsolationLevel>,
    ) -> Result<(), SqliteBridgeError> {
        if level.is_none() {
            self.commit_pending()?;
        }
        self.isolation_level = level;
        Ok(())
    }

    fn row_factory(&self) -> RowFactory {
        self.row_factory
    }

    fn set_row_factory(&mut self, factory: RowFactory) {
        self.row_factory = factory;
    }

    fn text_factory(&self) -> TextFactory {
        self.text_factory
    }

    fn set_text_factory(&mut self, factory: TextFactory) {
        self.text_factory = factory;
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn total_changes(&self) -> Result<u64, SqliteBridgeError> {
        let total: i64 = self
            .conn
            .query_row("SELECT total_changes()", [], |row| row.get(0))?;
        Ok(u64::try_from(total).unwrap_or(0))
    }
}

/// Whether `sql` is a statement that opens an implicit transaction.
///
/// Leading whitespace and SQL comments are skipped before the first keyword
/// is compared.
pub(crate) fn starts_implicit_transaction(sql: &str) -> bool {
    let keyword: String = skip_leading_comments(sql)
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    ["INSERT", "UPDATE", "DELETE", "REPLACE"]
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
}

fn skip_leading_comments(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.find('\n').map_or("", |idx| &rest[idx + 1..]);
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.find("*/").map_or("", |idx| &rest[idx + 2..]);
        } else {
            return sql;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NativeCursor;

    fn open_memory() -> SqliteHandle {
        SqliteDriver
            .open(":memory:", &ConnectOptions::new(":memory:"))
            .expect("open in-memory db")
    }

    #[test]
    fn classifies_implicit_transaction_statements() {
        assert!(starts_implicit_transaction("INSERT INTO t VALUES (1)"));
        assert!(starts_implicit_transaction("  update t set a = 1"));
        assert!(starts_implicit_transaction("-- note\nDELETE FROM t"));
        assert!(starts_implicit_transaction("/* x */ replace into t values (1)"));
        assert!(!starts_implicit_transaction("SELECT 1"));
        assert!(!starts_implicit_transaction("CREATE TABLE t (a)"));
        assert!(!starts_implicit_transaction("INSERTED"));
        assert!(!starts_implicit_transaction("-- only a comment"));
    }

    #[test]
    fn dml_opens_transaction_until_commit() {
        let mut handle = open_memory();
        handle.execute_script("CREATE TABLE t (a INTEGER);").unwrap();
        assert!(!handle.in_transaction());

        let cursor = handle
            .execute("INSERT INTO t (a) VALUES (?1)", &[RowValues::Int(7)])
            .unwrap();
        assert_eq!(cursor.row_count(), 1);
        assert_eq!(cursor.last_row_id(), Some(1));
        assert!(handle.in_transaction());

        handle.commit().unwrap();
        assert!(!handle.in_transaction());

        handle
            .execute("INSERT INTO t (a) VALUES (8)", &[])
            .unwrap();
        handle.rollback().unwrap();

        let mut rows = handle.execute("SELECT a FROM t", &[]).unwrap();
        let all = rows.fetch_all().unwrap();
        assert_eq!(all, vec![crate::types::Row::Tuple(vec![RowValues::Int(7)])]);
        assert_eq!(rows.row_count(), -1);
    }

    #[test]
    fn autocommit_mode_never_begins() {
        let mut handle = open_memory();
        handle.set_isolation_level(None).unwrap();
        handle.execute_script("CREATE TABLE t (a INTEGER);").unwrap();
        handle.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        assert!(!handle.in_transaction());
        assert_eq!(handle.total_changes().unwrap(), 1);
    }

    #[test]
    fn script_and_level_switch_commit_pending_work() {
        let mut handle = open_memory();
        handle.execute_script("CREATE TABLE t (a INTEGER);").unwrap();
        handle.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        assert!(handle.in_transaction());
        handle
            .execute_script("INSERT INTO t VALUES (2);")
            .unwrap();
        assert!(!handle.in_transaction());

        handle.execute("INSERT INTO t VALUES (3)", &[]).unwrap();
        handle.set_isolation_level(None).unwrap();
        assert!(!handle.in_transaction());

        let mut cursor = handle.execute("SELECT count(*) FROM t", &[]).unwrap();
        assert_eq!(
            cursor.fetch_one().unwrap().and_then(|r| r.get_index(0).cloned()),
            Some(RowValues::Int(3))
        );
    }

    #[test]
    fn execute_many_rejects_queries_and_sums_changes() {
        let mut handle = open_memory();
        handle.execute_script("CREATE TABLE t (a INTEGER);").unwrap();
        let err = handle.execute_many("SELECT ?1", &[vec![RowValues::Int(1)]]);
        assert!(matches!(err, Err(SqliteBridgeError::ExecutionError(_))));

        let sets: Vec<Vec<RowValues>> = (0..4).map(|i| vec![RowValues::Int(i)]).collect();
        let cursor = handle
            .execute_many("INSERT INTO t (a) VALUES (?1)", &sets)
            .unwrap();
        assert_eq!(cursor.row_count(), 4);
    }

    #[test]
    fn named_rows_and_text_factories() {
        let mut handle = open_memory();
        handle.set_row_factory(RowFactory::Named);
        let mut cursor = handle.execute("SELECT 'hi' AS greeting", &[]).unwrap();
        let row = cursor.fetch_one().unwrap().expect("one row");
        assert_eq!(row.get("greeting"), Some(&RowValues::Text("hi".into())));
        assert_eq!(
            cursor.description().as_deref(),
            Some(&vec!["greeting".to_string()])
        );

        handle.set_text_factory(TextFactory::Bytes);
        let mut cursor = handle.execute("SELECT 'hi'", &[]).unwrap();
        let row = cursor.fetch_one().unwrap().expect("one row");
        assert_eq!(row.get_index(0), Some(&RowValues::Blob(b"hi".to_vec())));
    }
}

use crate::contract::{DqCheck, DqReport, LoadError, LoadRecord, Loader, TableCounts};
use async_trait::async_trait;
use chrono::Utc;
use models::{DbConfig, LoadStatus, Quarter, StagingFormat, Table};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Row};
use std::collections::BTreeSet;
use std::path::Path;
use uuid::Uuid;

const LOAD_HISTORY: &str = "_faers_load_history";
const ROW_COUNTS: &str = "_faers_row_counts";

/// The reference native-bulk backend for Postgres-class engines. All
/// ingestion goes through `COPY ... FROM STDIN` in CSV wire format with the
/// empty field as the NULL sentinel; transaction boundaries are explicit
/// statements on one owned connection so data and metadata commit together.
#[derive(Debug)]
pub struct PostgresLoader {
    conn: PgConnection,
    in_txn: bool,
}

impl PostgresLoader {
    pub async fn connect(config: &DbConfig) -> Result<PostgresLoader, LoadError> {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .database(&config.dbname)
            .application_name("faersctl");
        if let Some(password) = config.password.as_deref() {
            options = options.password(password);
        }

        let conn = PgConnection::connect_with(&options)
            .await
            .map_err(classify_connect)?;
        tracing::info!(host = %config.host, dbname = %config.dbname, "connected to postgres");
        Ok(PostgresLoader {
            conn,
            in_txn: false,
        })
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, LoadError> {
        let done = sqlx::query(sql)
            .execute(&mut self.conn)
            .await
            .map_err(classify_statement)?;
        Ok(done.rows_affected())
    }

    async fn count(&mut self, sql: &str) -> Result<i64, LoadError> {
        sqlx::query_scalar(sql)
            .fetch_one(&mut self.conn)
            .await
            .map_err(LoadError::Metadata)
    }
}

fn classify_connect(err: sqlx::Error) -> LoadError {
    match &err {
        sqlx::Error::Database(db) if db.code().map_or(false, |code| code.starts_with("28")) => {
            LoadError::Auth(err)
        }
        _ => LoadError::Unreachable(err),
    }
}

// SQLSTATE class 23 is an integrity-constraint violation and class 22 a
// data exception (e.g. malformed COPY input); everything else surfaces as a
// failed transaction.
fn classify_statement(err: sqlx::Error) -> LoadError {
    let code = match &err {
        sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
        _ => None,
    };
    match code.as_deref() {
        Some(code) if code.starts_with("23") => LoadError::Constraint(err),
        Some(code) if code.starts_with("22") => LoadError::BulkFormat(err),
        _ => LoadError::TxnFailed(err),
    }
}

fn create_table_ddl(table: Table) -> String {
    let columns: Vec<String> = table
        .columns()
        .iter()
        .map(|column| format!("{column} text"))
        .collect();
    match table {
        Table::Demo => format!(
            "CREATE TABLE IF NOT EXISTS {table} ({}, PRIMARY KEY (primaryid))",
            columns.join(", ")
        ),
        _ => format!("CREATE TABLE IF NOT EXISTS {table} ({})", columns.join(", ")),
    }
}

#[async_trait]
impl Loader for PostgresLoader {
    fn bulk_format(&self) -> StagingFormat {
        StagingFormat::Csv
    }

    async fn prepare_schema(&mut self) -> Result<(), LoadError> {
        for table in Table::ALL {
            sqlx::query(&create_table_ddl(table))
                .execute(&mut self.conn)
                .await
                .map_err(LoadError::SchemaConflict)?;
        }
        for table in Table::CHILDREN {
            let ddl = format!(
                "CREATE INDEX IF NOT EXISTS {table}_caseid_idx ON {table} (caseid)"
            );
            sqlx::query(&ddl)
                .execute(&mut self.conn)
                .await
                .map_err(LoadError::SchemaConflict)?;
            let ddl = format!(
                "CREATE INDEX IF NOT EXISTS {table}_primaryid_idx ON {table} (primaryid)"
            );
            sqlx::query(&ddl)
                .execute(&mut self.conn)
                .await
                .map_err(LoadError::SchemaConflict)?;
        }

        let history = format!(
            "CREATE TABLE IF NOT EXISTS {LOAD_HISTORY} (
                load_id uuid PRIMARY KEY,
                quarter text NOT NULL,
                mode text NOT NULL,
                status text NOT NULL,
                started_at timestamptz NOT NULL,
                finished_at timestamptz,
                source_checksum text,
                error text
            )"
        );
        sqlx::query(&history)
            .execute(&mut self.conn)
            .await
            .map_err(LoadError::SchemaConflict)?;

        let counts = format!(
            "CREATE TABLE IF NOT EXISTS {ROW_COUNTS} (
                load_id uuid NOT NULL,
                table_name text NOT NULL,
                rows_in bigint NOT NULL,
                rows_after_dedup bigint NOT NULL,
                PRIMARY KEY (load_id, table_name)
            )"
        );
        sqlx::query(&counts)
            .execute(&mut self.conn)
            .await
            .map_err(LoadError::SchemaConflict)?;

        tracing::info!("schema prepared");
        Ok(())
    }

    async fn begin_txn(&mut self) -> Result<(), LoadError> {
        debug_assert!(!self.in_txn, "transaction already open");
        self.execute("BEGIN").await?;
        self.in_txn = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), LoadError> {
        self.execute("COMMIT").await?;
        self.in_txn = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), LoadError> {
        // A no-op outside a transaction, so failure paths can always call it.
        if !self.in_txn {
            return Ok(());
        }
        self.execute("ROLLBACK").await?;
        self.in_txn = false;
        Ok(())
    }

    async fn bulk_load(&mut self, table: Table, chunk: &Path) -> Result<u64, LoadError> {
        let statement = format!(
            "COPY {table} ({}) FROM STDIN WITH (FORMAT csv, HEADER true, NULL '')",
            table.columns().join(", ")
        );
        let file = tokio::fs::File::open(chunk).await?;
        let mut copy = self
            .conn
            .copy_in_raw(&statement)
            .await
            .map_err(classify_statement)?;
        if let Err(err) = copy.read_from(file).await {
            return Err(classify_statement(err));
        }
        let rows = copy.finish().await.map_err(classify_statement)?;
        tracing::debug!(%table, chunk = %chunk.display(), rows, "bulk loaded chunk");
        Ok(rows)
    }

    async fn delete_cases(&mut self, caseids: &BTreeSet<String>) -> Result<u64, LoadError> {
        if caseids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = caseids.iter().cloned().collect();
        let mut demo_rows = 0u64;
        for table in Table::ALL {
            let statement = format!("DELETE FROM {table} WHERE caseid = ANY($1)");
            let done = sqlx::query(&statement)
                .bind(&ids)
                .execute(&mut self.conn)
                .await
                .map_err(classify_statement)?;
            if table == Table::Demo {
                demo_rows = done.rows_affected();
            }
        }
        tracing::debug!(cases = ids.len(), demo_rows, "deleted case rows");
        Ok(demo_rows)
    }

    async fn exec_dq_checks(&mut self) -> Result<DqReport, LoadError> {
        let mut report = DqReport::default();

        let null_pks = self
            .count("SELECT count(*) FROM demo WHERE primaryid IS NULL OR primaryid = ''")
            .await?;
        report.checks.push(DqCheck {
            name: "demo_primaryid_present".to_string(),
            passed: null_pks == 0,
            detail: format!("{null_pks} demo rows with a missing primaryid"),
        });

        let duplicates = self
            .count(
                "SELECT count(*) FROM \
                 (SELECT primaryid FROM demo GROUP BY primaryid HAVING count(*) > 1) dupes",
            )
            .await?;
        report.checks.push(DqCheck {
            name: "demo_primaryid_unique".to_string(),
            passed: duplicates == 0,
            detail: format!("{duplicates} duplicated primaryids in demo"),
        });

        for table in Table::CHILDREN {
            let orphans = self
                .count(&format!(
                    "SELECT count(*) FROM {table} c \
                     WHERE NOT EXISTS (SELECT 1 FROM demo d WHERE d.primaryid = c.primaryid)"
                ))
                .await?;
            report.checks.push(DqCheck {
                name: format!("{table}_cascade"),
                passed: orphans == 0,
                detail: format!("{orphans} {table} rows without a demo parent"),
            });
        }

        Ok(report)
    }

    async fn close(self: Box<Self>) -> Result<(), LoadError> {
        self.conn.close().await.map_err(LoadError::TxnFailed)
    }

    async fn record_started(&mut self, record: &LoadRecord) -> Result<(), LoadError> {
        let statement = format!(
            "INSERT INTO {LOAD_HISTORY} (load_id, quarter, mode, status, started_at) \
             VALUES ($1, $2, $3, $4, $5)"
        );
        sqlx::query(&statement)
            .bind(record.load_id)
            .bind(record.quarter.to_string())
            .bind(&record.mode)
            .bind(&record.status)
            .bind(record.started_at)
            .execute(&mut self.conn)
            .await
            .map_err(LoadError::Metadata)?;
        Ok(())
    }

    async fn record_finished(
        &mut self,
        load_id: Uuid,
        status: LoadStatus,
        source_checksum: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), LoadError> {
        let statement = format!(
            "UPDATE {LOAD_HISTORY} \
             SET status = $2, finished_at = $3, \
                 source_checksum = COALESCE($4, source_checksum), error = $5 \
             WHERE load_id = $1"
        );
        sqlx::query(&statement)
            .bind(load_id)
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(source_checksum)
            .bind(error)
            .execute(&mut self.conn)
            .await
            .map_err(LoadError::Metadata)?;
        Ok(())
    }

    async fn record_row_counts(
        &mut self,
        load_id: Uuid,
        counts: &[TableCounts],
    ) -> Result<(), LoadError> {
        let statement = format!(
            "INSERT INTO {ROW_COUNTS} (load_id, table_name, rows_in, rows_after_dedup) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (load_id, table_name) DO UPDATE \
             SET rows_in = excluded.rows_in, rows_after_dedup = excluded.rows_after_dedup"
        );
        for count in counts {
            sqlx::query(&statement)
                .bind(load_id)
                .bind(count.table.as_str())
                .bind(count.rows_in as i64)
                .bind(count.rows_after_dedup as i64)
                .execute(&mut self.conn)
                .await
                .map_err(LoadError::Metadata)?;
        }
        Ok(())
    }

    async fn latest_success_quarter(&mut self) -> Result<Option<Quarter>, LoadError> {
        // Canonical quarter strings order lexically as they do temporally.
        let statement = format!(
            "SELECT quarter FROM {LOAD_HISTORY} WHERE status = 'SUCCESS' \
             ORDER BY quarter DESC LIMIT 1"
        );
        let quarter: Option<String> = sqlx::query_scalar(&statement)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(LoadError::Metadata)?;
        match quarter {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|err| LoadError::Backend(format!("bad quarter in metadata: {err}"))),
            None => Ok(None),
        }
    }

    async fn latest_success_checksum(
        &mut self,
        quarter: Quarter,
    ) -> Result<Option<String>, LoadError> {
        let statement = format!(
            "SELECT source_checksum FROM {LOAD_HISTORY} \
             WHERE quarter = $1 AND status = 'SUCCESS' \
             ORDER BY finished_at DESC NULLS LAST LIMIT 1"
        );
        let checksum: Option<Option<String>> = sqlx::query_scalar(&statement)
            .bind(quarter.to_string())
            .fetch_optional(&mut self.conn)
            .await
            .map_err(LoadError::Metadata)?;
        Ok(checksum.flatten())
    }

    async fn history(&mut self, quarter: Option<Quarter>) -> Result<Vec<LoadRecord>, LoadError> {
        let statement = format!(
            "SELECT load_id, quarter, mode, status, started_at, finished_at, \
                    source_checksum, error \
             FROM {LOAD_HISTORY} \
             WHERE $1::text IS NULL OR quarter = $1 \
             ORDER BY started_at"
        );
        let rows = sqlx::query(&statement)
            .bind(quarter.map(|q| q.to_string()))
            .fetch_all(&mut self.conn)
            .await
            .map_err(LoadError::Metadata)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let quarter: String = row.try_get("quarter").map_err(LoadError::Metadata)?;
            records.push(LoadRecord {
                load_id: row.try_get("load_id").map_err(LoadError::Metadata)?,
                quarter: quarter
                    .parse()
                    .map_err(|err| LoadError::Backend(format!("bad quarter in metadata: {err}")))?,
                mode: row.try_get("mode").map_err(LoadError::Metadata)?,
                status: row.try_get("status").map_err(LoadError::Metadata)?,
                started_at: row.try_get("started_at").map_err(LoadError::Metadata)?,
                finished_at: row.try_get("finished_at").map_err(LoadError::Metadata)?,
                source_checksum: row.try_get("source_checksum").map_err(LoadError::Metadata)?,
                error: row.try_get("error").map_err(LoadError::Metadata)?,
            });
        }
        Ok(records)
    }
}

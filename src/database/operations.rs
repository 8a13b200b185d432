/// PostgreSQL record backend for the sample store
use async_trait::async_trait;
use log::info;

use crate::database::connection::execute_with_retry;
use crate::database::store::{Record, RecordBackend};
use crate::error::{Error, Result};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS aranet4_samples (
    ts BIGINT PRIMARY KEY,
    record BYTEA NOT NULL
)";

const UPSERT_RECORD: &str = "INSERT INTO aranet4_samples(ts, record) VALUES ($1, $2)
     ON CONFLICT (ts) DO UPDATE SET record = EXCLUDED.record";

const SELECT_RECORDS: &str = "SELECT ts, record FROM aranet4_samples ORDER BY ts";

/// Stores 17-byte sample records keyed by UNIX second in `aranet4_samples`
pub struct PostgresBackend {
    database_url: String,
}

impl PostgresBackend {
    /// Connect once to make sure the table exists
    pub async fn open(database_url: &str) -> Result<Self> {
        execute_with_retry(database_url, |client| async move {
            client.execute(CREATE_TABLE, &[]).await
        })
        .await
        .map_err(Error::Database)?;
        info!("Sample table ready");

        Ok(PostgresBackend {
            database_url: database_url.to_string(),
        })
    }
}

#[async_trait]
impl RecordBackend for PostgresBackend {
    /// Upsert all records in a single transaction
    async fn put_records(&self, records: &[Record]) -> Result<()> {
        // Clone data for move into async closure
        let records = records.to_vec();

        execute_with_retry(&self.database_url, move |mut client| {
            let records = records.clone();
            async move {
                let tx = client.transaction().await?;
                let statement = tx.prepare(UPSERT_RECORD).await?;
                for (ts, record) in &records {
                    tx.execute(&statement, &[ts, &record.as_slice()]).await?;
                }
                tx.commit().await?;
                Ok(records.len())
            }
        })
        .await
        .map(|_| ())
        .map_err(Error::Database)
    }

    async fn records(&self) -> Result<Vec<(i64, Vec<u8>)>> {
        execute_with_retry(&self.database_url, |client| async move {
            let rows = client.query(SELECT_RECORDS, &[]).await?;
            Ok(rows
                .iter()
                .map(|row| (row.get::<_, i64>(0), row.get::<_, Vec<u8>>(1)))
                .collect())
        })
        .await
        .map_err(Error::Database)
    }
}

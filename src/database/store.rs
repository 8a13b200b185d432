/// Sample store: merges freshly downloaded history with what is already persisted
use async_trait::async_trait;
use log::{debug, info};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::RwLock;

use crate::database::codec::{self, RECORD_SIZE};
use crate::error::{Error, Result};
use crate::models::Sample;

/// Timestamps closer than this are the same sample (device/host clock jitter).
pub const TIME_RESOLUTION_SECS: i64 = 5;

/// One persisted record: UNIX-second key and encoded sample.
pub type Record = (i64, [u8; RECORD_SIZE]);

/// Key-value persistence for encoded samples.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Insert or overwrite records by key.
    async fn put_records(&self, records: &[Record]) -> Result<()>;

    /// All records, ordered by key.
    async fn records(&self) -> Result<Vec<(i64, Vec<u8>)>>;
}

/// Volatile backend, used when no database is configured.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<BTreeMap<i64, [u8; RECORD_SIZE]>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<i64, [u8; RECORD_SIZE]>>> {
        self.records
            .lock()
            .map_err(|_| Error::Database("in-memory store poisoned".into()))
    }
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    async fn put_records(&self, records: &[Record]) -> Result<()> {
        self.lock()?.extend(records.iter().copied());
        Ok(())
    }

    async fn records(&self) -> Result<Vec<(i64, Vec<u8>)>> {
        Ok(self
            .lock()?
            .iter()
            .map(|(key, record)| (*key, record.to_vec()))
            .collect())
    }
}

/// Orders two samples by time, treating timestamps less than
/// [`TIME_RESOLUTION_SECS`] apart as equal.
pub fn cmp_approx(a: &Sample, b: &Sample) -> Ordering {
    let at = a.time.unix_timestamp();
    let bt = b.time.unix_timestamp();
    if (at - bt).abs() < TIME_RESOLUTION_SECS {
        Ordering::Equal
    } else {
        at.cmp(&bt)
    }
}

/// Sorts samples by time.
///
/// Uses the exact timestamp as a stable key: this never contradicts
/// [`cmp_approx`], and unlike the approximate relation it is a total order.
pub fn sort_by_time(samples: &mut [Sample]) {
    samples.sort_by_key(|s| s.time.unix_timestamp());
}

pub struct SampleStore {
    backend: Box<dyn RecordBackend>,
    /// Most recent sample written. The write lock is held for a whole merge.
    last: RwLock<Option<Sample>>,
}

impl SampleStore {
    /// Open a store and recover the last-known sample from its newest record.
    pub async fn open(backend: Box<dyn RecordBackend>) -> Result<Self> {
        let last = match backend.records().await?.last() {
            Some((_, record)) => Some(codec::decode(record)?),
            None => None,
        };
        if let Some(last) = &last {
            info!("Last stored sample at {}", crate::utils::format_timestamp(&last.time));
        }
        Ok(SampleStore {
            backend,
            last: RwLock::new(last),
        })
    }

    pub async fn last(&self) -> Option<Sample> {
        self.last.read().await.clone()
    }

    /// Persist the samples of `batch` that are newer than the last-known
    /// sample, returning how many were written.
    pub async fn merge(&self, mut batch: Vec<Sample>) -> Result<usize> {
        let mut last = self.last.write().await;

        sort_by_time(&mut batch);
        let first_new = match last.as_ref() {
            Some(last) => batch
                .iter()
                .position(|s| cmp_approx(last, s) == Ordering::Less)
                .unwrap_or(batch.len()),
            None => 0,
        };
        let fresh = &batch[first_new..];
        if fresh.is_empty() {
            debug!("No new samples to store");
            return Ok(0);
        }

        let plural = if fresh.len() > 1 { "s" } else { "" };
        info!("Writing {} new sample{} to db...", fresh.len(), plural);
        let records = fresh
            .iter()
            .map(|s| Ok((s.time.unix_timestamp(), codec::encode(s)?)))
            .collect::<Result<Vec<Record>>>()?;
        self.backend.put_records(&records).await?;

        if let Some(newest) = fresh.last() {
            *last = Some(newest.clone().with_quality());
        }
        Ok(fresh.len())
    }

    /// Every stored sample, oldest first.
    pub async fn rows(&self) -> Result<Vec<Sample>> {
        let _guard = self.last.read().await;
        let mut rows = self
            .backend
            .records()
            .await?
            .iter()
            .map(|(_, record)| codec::decode(record))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        sort_by_time(&mut rows);
        Ok(rows)
    }
}

//! Scripted transport for exercising the protocol code without a device.
use async_trait::async_trait;
use bluer::Uuid;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::task::JoinHandle;

use crate::bluetooth::transport::{NotifyCallback, Transport};
use crate::error::{Error, Result};
use crate::models::Param;

/// Builds a time-series notification page.
pub fn page(param: Param, start: u16, count: u8, values: &[u8]) -> Vec<u8> {
    let mut raw = vec![param.id()];
    raw.extend_from_slice(&start.to_le_bytes());
    raw.push(count);
    raw.extend_from_slice(values);
    raw
}

#[derive(Default)]
pub struct MockTransport {
    values: HashMap<Uuid, Vec<u8>>,
    pages: HashMap<u8, Vec<Vec<u8>>>,
    writes: Mutex<Vec<Vec<u8>>>,
    unsubscribed: AtomicUsize,
    fail_writes: bool,
    fail_subscribe: bool,
    hang_up: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, characteristic: Uuid, value: &[u8]) -> Self {
        self.values.insert(characteristic, value.to_vec());
        self
    }

    /// Pages notified after a history request for `param`.
    pub fn with_pages(mut self, param: Param, pages: Vec<Vec<u8>>) -> Self {
        self.pages.insert(param.id(), pages);
        self
    }

    /// Every command write fails.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Every subscription attempt fails.
    pub fn failing_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    /// Close the notification stream once the scripted pages are sent.
    pub fn hanging_up(mut self) -> Self {
        self.hang_up = true;
        self
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn unsubscribed(&self) -> usize {
        self.unsubscribed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Subscription = JoinHandle<()>;

    async fn read_characteristic(&self, _service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        self.values
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("no value scripted for {}", characteristic)))
    }

    async fn write_characteristic(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Transport("write rejected".into()));
        }
        self.writes.lock().unwrap().push(value.to_vec());
        Ok(())
    }

    async fn subscribe(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
        mut on_value: NotifyCallback,
    ) -> Result<Self::Subscription> {
        if self.fail_subscribe {
            return Err(Error::Transport("notifications unavailable".into()));
        }
        // Answer the most recent history request
        let requested = self
            .writes
            .lock()
            .unwrap()
            .last()
            .and_then(|cmd| cmd.get(1).copied());
        let pages = requested
            .and_then(|id| self.pages.get(&id).cloned())
            .unwrap_or_default();

        let hang_up = self.hang_up;
        Ok(tokio::spawn(async move {
            for page in pages {
                tokio::task::yield_now().await;
                on_value(&page);
            }
            if hang_up {
                return;
            }
            // Keep the stream open until unsubscribed, like a real device
            std::future::pending::<()>().await;
        }))
    }

    async fn unsubscribe(&self, subscription: Self::Subscription) -> Result<()> {
        subscription.abort();
        self.unsubscribed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

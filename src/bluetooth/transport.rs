/// GATT access capability used by the Aranet4 protocol code
use async_trait::async_trait;
use bluer::Uuid;

use crate::bluetooth::uuids::{GENERIC_ACCESS_SERVICE, GENERIC_DEVICE_NAME};
use crate::error::Result;

/// Callback invoked with every notified characteristic value.
///
/// Runs on a task owned by the transport, never on the caller's task.
pub type NotifyCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Read, write and subscribe access to the characteristics of one connected
/// device.
///
/// At most one subscription per characteristic is expected to be active.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Handle returned by [`Transport::subscribe`], consumed by
    /// [`Transport::unsubscribe`].
    type Subscription: Send;

    async fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>>;

    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()>;

    /// Starts notifications on a characteristic. Dropping the callback (for
    /// instance because the notification stream ended) is how the transport
    /// reports that no further values will arrive.
    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
        on_value: NotifyCallback,
    ) -> Result<Self::Subscription>;

    async fn unsubscribe(&self, subscription: Self::Subscription) -> Result<()>;

    /// Device name from the GAP service.
    async fn device_name(&self) -> Result<Option<String>> {
        let raw = self
            .read_characteristic(GENERIC_ACCESS_SERVICE, GENERIC_DEVICE_NAME)
            .await?;
        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }
}

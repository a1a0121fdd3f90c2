use std::time::Duration;

use async_trait::async_trait;
use bluefusion_collectors::{CollectorError, OsBleSource};
use bluefusion_types::Address;
use thiserror::Error;
use uuid::Uuid;

/// Device Name characteristic, used by the health probe.
pub const DEVICE_NAME_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000_2A00_0000_1000_8000_00805F9B34FB);

#[derive(Debug, Error)]
pub enum TargetError {
    #[error(transparent)]
    Collector(#[from] CollectorError),
    #[error("operation timed out")]
    Timeout,
}

/// The collector capability surface the manager depends on. `OsBleSource` implements this directly;
/// a mock implementation drives the unit tests below without a real
/// adapter.
#[async_trait]
pub trait ManagedTarget: Send + Sync {
    async fn connect(&self, address: Address) -> Result<(), TargetError>;
    async fn disconnect(&self, address: Address) -> Result<(), TargetError>;
    async fn read_device_name(&self, address: Address) -> Result<Vec<u8>, TargetError>;
}

/// Lets the manager share a single collector instance with the rest of the
/// monitor instead of owning a second one.
#[async_trait]
impl<T: ManagedTarget> ManagedTarget for std::sync::Arc<T> {
    async fn connect(&self, address: Address) -> Result<(), TargetError> {
        T::connect(self, address).await
    }

    async fn disconnect(&self, address: Address) -> Result<(), TargetError> {
        T::disconnect(self, address).await
    }

    async fn read_device_name(&self, address: Address) -> Result<Vec<u8>, TargetError> {
        T::read_device_name(self, address).await
    }
}

#[async_trait]
impl ManagedTarget for OsBleSource {
    async fn connect(&self, address: Address) -> Result<(), TargetError> {
        Ok(OsBleSource::connect(self, address).await?)
    }

    async fn disconnect(&self, address: Address) -> Result<(), TargetError> {
        Ok(OsBleSource::disconnect(self, address).await?)
    }

    async fn read_device_name(&self, address: Address) -> Result<Vec<u8>, TargetError> {
        Ok(self.read_characteristic(address, DEVICE_NAME_CHARACTERISTIC).await?)
    }
}

/// Run `fut` under a deadline: the name-read health check uses a fixed 5s
/// timeout, connection attempts use the per-device `connection_timeout`.
pub async fn with_timeout<T>(
    duration: Duration,
    fut: impl std::future::Future<Output = Result<T, TargetError>>,
) -> Result<T, TargetError> {
    tokio::time::timeout(duration, fut).await.map_err(|_| TargetError::Timeout)?
}

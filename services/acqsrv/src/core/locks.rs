//! Per-device mutual exclusion
//!
//! One async mutex per configured device. The periodic cycle and on-demand
//! requests both go through here, so two transactions on the same device never
//! overlap while different devices proceed independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::core::register_map::RegisterMap;
use crate::error::{AcqError, Result};

/// Exclusive access to one device, released on drop
#[derive(Debug)]
pub struct DeviceGuard {
    device: String,
    acquired_at: Instant,
    _guard: OwnedMutexGuard<()>,
}

impl DeviceGuard {
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        trace!(
            "Released {} after {:?}",
            self.device,
            self.acquired_at.elapsed()
        );
    }
}

/// Fixed set of device locks, created at startup
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: HashMap<String, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new<I, S>(device_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let locks = device_ids
            .into_iter()
            .map(|id| (id.into(), Arc::new(Mutex::new(()))))
            .collect();
        Self { locks }
    }

    /// One lock per device in the map
    pub fn for_map(map: &RegisterMap) -> Self {
        Self::new(map.device_ids())
    }

    fn lock_for(&self, device: &str) -> Result<Arc<Mutex<()>>> {
        self.locks
            .get(device)
            .cloned()
            .ok_or_else(|| AcqError::device_not_found(device))
    }

    /// Wait for the device lock without bound
    pub async fn acquire(&self, device: &str) -> Result<DeviceGuard> {
        let lock = self.lock_for(device)?;
        let guard = lock.lock_owned().await;
        Ok(self.guard(device, guard))
    }

    /// Wait for the device lock at most `wait`; a busy device yields `DeviceBusy`
    pub async fn acquire_timeout(&self, device: &str, wait: Duration) -> Result<DeviceGuard> {
        let lock = self.lock_for(device)?;
        match tokio::time::timeout(wait, lock.lock_owned()).await {
            Ok(guard) => Ok(self.guard(device, guard)),
            Err(_) => Err(AcqError::DeviceBusy(format!(
                "{} still held after {:?}",
                device, wait
            ))),
        }
    }

    /// Whether someone currently holds the device lock
    pub fn is_held(&self, device: &str) -> bool {
        self.locks
            .get(device)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    fn guard(&self, device: &str, guard: OwnedMutexGuard<()>) -> DeviceGuard {
        trace!("Acquired {}", device);
        DeviceGuard {
            device: device.to_string(),
            acquired_at: Instant::now(),
            _guard: guard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let registry = LockRegistry::new(["trm202"]);
        let err = registry.acquire("trm999").await.unwrap_err();
        assert!(matches!(err, AcqError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn same_device_waits_other_device_does_not() {
        let registry = LockRegistry::new(["pressure_sensor", "trm202"]);
        let held = registry.acquire("pressure_sensor").await.unwrap();
        assert!(registry.is_held("pressure_sensor"));

        let busy = registry
            .acquire_timeout("pressure_sensor", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(busy, AcqError::DeviceBusy(_)));

        let other = registry
            .acquire_timeout("trm202", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(other.device(), "trm202");

        drop(held);
        assert!(!registry.is_held("pressure_sensor"));
        registry
            .acquire_timeout("pressure_sensor", Duration::from_millis(20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn guard_is_released_when_holder_fails() {
        let registry = Arc::new(LockRegistry::new(["trm210"]));

        let task_registry = registry.clone();
        let result: Result<()> = tokio::spawn(async move {
            let _guard = task_registry.acquire("trm210").await?;
            Err(AcqError::protocol("exception"))
        })
        .await
        .unwrap();
        assert!(result.is_err());

        assert!(!registry.is_held("trm210"));
    }

    #[tokio::test]
    async fn waiters_are_serialized() {
        let registry = Arc::new(LockRegistry::new(["trm200"]));
        let inside = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let max_inside = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                tokio::spawn(async move {
                    let _guard = registry.acquire("trm200").await.unwrap();
                    let now = inside.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, std::sync::atomic::Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}

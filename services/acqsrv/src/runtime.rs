//! Service wiring and the periodic poll task

use axum::Router;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{self, AppState, LastCycle};
use crate::config::AppConfig;
use crate::control::ControlService;
use crate::core::interlock::SafetyInterlock;
use crate::core::locks::LockRegistry;
use crate::core::poller::{PollCoordinator, PollSettings};
use crate::core::register_map::RegisterMap;
use crate::core::transport::Connector;
use crate::error::Result;
use crate::storage::AcquisitionStore;

/// All long-lived components of a running service
pub struct AcquisitionService {
    pub map: Arc<RegisterMap>,
    pub locks: Arc<LockRegistry>,
    pub coordinator: Arc<PollCoordinator>,
    pub control: Arc<ControlService>,
    pub store: Arc<dyn AcquisitionStore>,
    pub last_cycle: LastCycle,
    pub interval: Duration,
    service_name: String,
}

impl AcquisitionService {
    /// Validate configuration and assemble the components around `connector` and `store`
    pub fn build(
        config: &AppConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn AcquisitionStore>,
    ) -> Result<Self> {
        let map = Arc::new(RegisterMap::from_config(config)?);
        let settings = PollSettings::from_config(&config.polling)?;
        let locks = Arc::new(LockRegistry::for_map(&map));

        let interlock = match &config.interlock {
            Some(interlock) => SafetyInterlock::from_config(
                interlock,
                &map,
                connector.clone(),
                settings.timeouts,
            )?
            .map(Arc::new),
            None => None,
        };
        if let Some(interlock) = &interlock {
            info!(
                "Safety interlock armed: threshold {} -> {}",
                interlock.threshold(),
                interlock.actuator()
            );
        }

        let coordinator = Arc::new(
            PollCoordinator::new(
                map.clone(),
                locks.clone(),
                connector.clone(),
                store.clone(),
                settings,
            )
            .with_interlock(interlock),
        );
        let control = Arc::new(ControlService::new(
            map.clone(),
            locks.clone(),
            connector,
            settings.timeouts,
            settings.lock_timeout,
        ));

        if map.is_empty() {
            warn!("No devices configured, cycles will only reset unit availability");
        }

        Ok(Self {
            map,
            locks,
            coordinator,
            control,
            store,
            last_cycle: Arc::new(RwLock::new(None)),
            interval: config.polling.interval()?,
            service_name: config.service.name.clone(),
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.control.clone(),
            self.store.clone(),
            self.last_cycle.clone(),
            self.service_name.clone(),
        )
    }

    pub fn router(&self) -> Router {
        api::create_api_routes(self.app_state())
    }

    /// Start periodic cycles until `token` is cancelled
    pub fn start_polling(&self, token: CancellationToken) -> JoinHandle<()> {
        start_polling_task(
            self.coordinator.clone(),
            self.interval,
            self.last_cycle.clone(),
            token,
        )
    }
}

/// Spawn the poll loop; the first cycle starts immediately
///
/// Cancellation is observed between cycles, so an in-flight cycle always
/// finishes and persists. Ticks missed while a cycle overran are skipped.
pub fn start_polling_task(
    coordinator: Arc<PollCoordinator>,
    interval: Duration,
    last_cycle: LastCycle,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("Polling task started, interval {:?}", interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {},
            }

            let report = coordinator.run_cycle().await;
            *last_cycle.write() = Some(report);
        }

        info!("Polling task stopped");
    })
}

//! Input service: owns the shared server connection and creates sessions

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use openiptv_core::protocol::{Connector, MessageDispatcher};
use openiptv_core::{Config, Error, Locator, Result};
use openiptv_player::{PlaybackPipeline, TimeshiftController};

use crate::host::HostNotifier;
use crate::recording::{ProgramResolver, RecordingSession};
use crate::session::TvSession;

/// Which live session holds which channel
#[derive(Debug, Clone, Default)]
pub struct TuneRegistry {
    tuned: Arc<DashMap<Locator, u64>>,
}

impl TuneRegistry {
    /// Claim `locator` for `session_id`. Fails when another session holds it.
    pub fn claim(&self, locator: &Locator, session_id: u64) -> Result<()> {
        match self.tuned.entry(locator.clone()) {
            Entry::Occupied(entry) if *entry.get() != session_id => {
                Err(Error::AlreadyTuned(locator.to_string()))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(session_id);
                Ok(())
            }
        }
    }

    pub fn release_session(&self, session_id: u64) {
        self.tuned.retain(|_, holder| *holder != session_id);
    }

    #[must_use]
    pub fn holder(&self, locator: &Locator) -> Option<u64> {
        self.tuned.get(locator).map(|entry| *entry.value())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tuned.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tuned.is_empty()
    }

    fn clear(&self) {
        self.tuned.clear();
    }
}

pub struct InputService {
    config: Config,
    connector: Arc<dyn Connector>,
    connection: Mutex<Option<Arc<dyn MessageDispatcher>>>,
    registry: TuneRegistry,
    next_session_id: AtomicU64,
}

impl InputService {
    #[must_use]
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            connection: Mutex::new(None),
            registry: TuneRegistry::default(),
            next_session_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &TuneRegistry {
        &self.registry
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// The shared connection, established on first use
    async fn connection(&self) -> Result<Arc<dyn MessageDispatcher>> {
        let mut connection = self.connection.lock().await;
        if let Some(dispatcher) = connection.as_ref() {
            return Ok(Arc::clone(dispatcher));
        }

        let dispatcher = self
            .connector
            .connect(&self.config.connection)
            .await
            .map_err(|e| {
                warn!(
                    address = %self.config.connection.address(),
                    error = %e,
                    "Failed to connect to server"
                );
                match e {
                    Error::Connection(_) => e,
                    other => Error::Connection(other.to_string()),
                }
            })?;

        info!(
            address = %self.config.connection.address(),
            client_name = %self.config.connection.subscription_client_name(),
            "Connected to server"
        );
        *connection = Some(Arc::clone(&dispatcher));
        Ok(dispatcher)
    }

    pub async fn create_session(
        &self,
        input_id: &str,
        pipeline: Arc<dyn PlaybackPipeline>,
        notifier: Arc<dyn HostNotifier>,
    ) -> Result<TvSession> {
        let dispatcher = self.connection().await?;
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let controller = TimeshiftController::new(
            pipeline,
            dispatcher,
            self.config.timeshift.clone(),
            self.config.recording.clone(),
        );

        info!(session_id, input_id, "Session created");
        Ok(TvSession::new(
            session_id,
            input_id,
            controller,
            notifier,
            self.registry.clone(),
        ))
    }

    pub async fn create_recording_session(
        &self,
        resolver: Arc<dyn ProgramResolver>,
        notifier: Arc<dyn HostNotifier>,
    ) -> Result<RecordingSession> {
        let dispatcher = self.connection().await?;
        Ok(RecordingSession::new(dispatcher, resolver, notifier))
    }

    /// Drop the shared connection; the next session reconnects
    pub async fn shutdown(&self) {
        if self.connection.lock().await.take().is_some() {
            info!("Server connection dropped");
        }
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;
    use async_trait::async_trait;
    use openiptv_core::config::ConnectionConfig;
    use openiptv_player::mock::{MockDispatcher, MockPipeline};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicUsize,
        refuse: bool,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn MessageDispatcher>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(Error::InvalidState {
                    operation: "connect",
                    state: format!("{} refused", config.address()),
                });
            }
            Ok(MockDispatcher::new())
        }
    }

    fn locator(id: u32) -> Locator {
        Locator::parse(format!("content://android.media.tv/channel/{id}")).unwrap()
    }

    #[tokio::test]
    async fn test_connection_is_shared_and_lazy() {
        let connector = Arc::new(CountingConnector::default());
        let service = InputService::new(Config::default(), connector.clone());
        assert!(!service.is_connected().await);

        service
            .create_session("input", MockPipeline::new(), RecordingNotifier::new())
            .await
            .unwrap();
        service
            .create_session("input", MockPipeline::new(), RecordingNotifier::new())
            .await
            .unwrap();

        assert!(service.is_connected().await);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        service.shutdown().await;
        assert!(!service.is_connected().await);
    }

    #[tokio::test]
    async fn test_connection_failure_aborts_session_creation() {
        let connector = Arc::new(CountingConnector {
            refuse: true,
            ..CountingConnector::default()
        });
        let service = InputService::new(Config::default(), connector);

        let result = service
            .create_session("input", MockPipeline::new(), RecordingNotifier::new())
            .await;

        let Err(error) = result else {
            panic!("session created without a connection");
        };
        assert!(matches!(error, Error::Connection(_)));
        assert!(error.is_fatal());
        assert!(!service.is_connected().await);
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let service = InputService::new(Config::default(), Arc::new(CountingConnector::default()));

        let first = service
            .create_session("input", MockPipeline::new(), RecordingNotifier::new())
            .await
            .unwrap();
        let second = service
            .create_session("input", MockPipeline::new(), RecordingNotifier::new())
            .await
            .unwrap();

        assert_ne!(first.session_id(), second.session_id());
    }

    #[test]
    fn test_registry_claims() {
        let registry = TuneRegistry::default();

        registry.claim(&locator(1), 10).unwrap();
        registry.claim(&locator(1), 10).unwrap();
        assert!(matches!(registry.claim(&locator(1), 11), Err(Error::AlreadyTuned(_))));

        registry.claim(&locator(2), 10).unwrap();
        registry.release_session(10);
        assert!(registry.is_empty());
        registry.claim(&locator(1), 11).unwrap();
        assert_eq!(registry.holder(&locator(1)), Some(11));
    }
}

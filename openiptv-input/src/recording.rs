//! Recording session: schedules server-side recordings for a program

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use openiptv_core::protocol::{ClientMessage, MessageDispatcher};
use openiptv_core::time::ms_to_secs;
use openiptv_core::{Locator, Result};

use crate::host::{HostNotifier, TvRecordingSession};

/// Program metadata needed to schedule a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramInfo {
    pub event_id: u32,
    /// Epoch milliseconds
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Looks up program metadata from the host's guide
#[async_trait]
pub trait ProgramResolver: Send + Sync {
    async fn resolve(&self, program: &Locator) -> Result<ProgramInfo>;
}

pub struct RecordingSession {
    dispatcher: Arc<dyn MessageDispatcher>,
    resolver: Arc<dyn ProgramResolver>,
    notifier: Arc<dyn HostNotifier>,
    channel: Mutex<Option<Locator>>,
    program: Mutex<Option<Locator>>,
}

impl RecordingSession {
    #[must_use]
    pub fn new(
        dispatcher: Arc<dyn MessageDispatcher>,
        resolver: Arc<dyn ProgramResolver>,
        notifier: Arc<dyn HostNotifier>,
    ) -> Self {
        Self {
            dispatcher,
            resolver,
            notifier,
            channel: Mutex::new(None),
            program: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn channel(&self) -> Option<Locator> {
        self.channel.lock().clone()
    }

    async fn schedule(&self, program: &Locator) -> Result<ProgramInfo> {
        let info = self.resolver.resolve(program).await?;
        self.dispatcher
            .send(ClientMessage::AddDvrEntry {
                event_id: info.event_id,
                start: ms_to_secs(info.start_ms),
                stop: ms_to_secs(info.end_ms),
            })
            .await?;
        Ok(info)
    }
}

#[async_trait]
impl TvRecordingSession for RecordingSession {
    async fn on_tune(&self, channel: Locator) {
        self.notifier.tuned(&channel);
        debug!(channel = %channel, "Recording session tuned");
        *self.channel.lock() = Some(channel);
    }

    async fn on_start_recording(&self, program: Option<Locator>) {
        *self.program.lock() = program.clone();
        let Some(program) = program else {
            warn!("Recording requested without a program");
            self.notifier.recording_error("no program to record");
            return;
        };

        match self.schedule(&program).await {
            Ok(info) => info!(
                program = %program,
                event_id = info.event_id,
                channel = ?self.channel().map(|c| c.to_string()),
                "Recording scheduled"
            ),
            Err(e) => {
                warn!(program = %program, error = %e, "Failed to schedule recording");
                self.notifier.recording_error(&e.to_string());
            }
        }
    }

    async fn on_stop_recording(&self) {
        let program = self.program.lock().clone();
        self.notifier.recording_stopped(program.as_ref());
    }

    async fn on_release(&self) {
        debug!("Recording session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, RecordingNotifier};
    use openiptv_core::Error;
    use openiptv_player::mock::MockDispatcher;

    struct Guide;

    #[async_trait]
    impl ProgramResolver for Guide {
        async fn resolve(&self, program: &Locator) -> Result<ProgramInfo> {
            match program.id()? {
                77 => Ok(ProgramInfo {
                    event_id: 77,
                    start_ms: 1_700_000_000_000,
                    end_ms: 1_700_003_600_999,
                }),
                other => Err(Error::UnknownProgram(other.to_string())),
            }
        }
    }

    fn program(id: u32) -> Locator {
        Locator::parse(format!("content://android.media.tv/program/{id}")).unwrap()
    }

    fn session(dispatcher: &Arc<MockDispatcher>, notifier: &Arc<RecordingNotifier>) -> RecordingSession {
        RecordingSession::new(dispatcher.clone(), Arc::new(Guide), notifier.clone())
    }

    #[tokio::test]
    async fn test_start_recording_adds_dvr_entry_in_seconds() {
        let dispatcher = MockDispatcher::new();
        let notifier = RecordingNotifier::new();
        let session = session(&dispatcher, &notifier);
        let channel = Locator::parse("content://android.media.tv/channel/3").unwrap();

        session.on_tune(channel.clone()).await;
        session.on_start_recording(Some(program(77))).await;

        assert_eq!(session.channel(), Some(channel.clone()));
        assert_eq!(
            dispatcher.sent(),
            vec![ClientMessage::AddDvrEntry {
                event_id: 77,
                start: 1_700_000_000,
                stop: 1_700_003_600,
            }]
        );
        assert_eq!(notifier.events(), vec![Event::Tuned(channel)]);
    }

    #[tokio::test]
    async fn test_unknown_program_surfaces_error() {
        let dispatcher = MockDispatcher::new();
        let notifier = RecordingNotifier::new();
        let session = session(&dispatcher, &notifier);

        session.on_start_recording(Some(program(5))).await;

        assert!(dispatcher.sent().is_empty());
        assert!(matches!(notifier.events()[0], Event::RecordingError(_)));
    }

    #[tokio::test]
    async fn test_send_failure_surfaces_error() {
        let dispatcher = MockDispatcher::new();
        dispatcher.set_fail_sends(true);
        let notifier = RecordingNotifier::new();
        let session = session(&dispatcher, &notifier);

        session.on_start_recording(Some(program(77))).await;

        assert!(matches!(notifier.events()[0], Event::RecordingError(_)));
    }

    #[tokio::test]
    async fn test_stop_reports_program() {
        let dispatcher = MockDispatcher::new();
        let notifier = RecordingNotifier::new();
        let session = session(&dispatcher, &notifier);

        session.on_start_recording(Some(program(77))).await;
        session.on_stop_recording().await;
        session.on_release().await;

        assert_eq!(
            notifier.events(),
            vec![Event::RecordingStopped(Some(program(77)))]
        );
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let dispatcher = MockDispatcher::new();
        let notifier = RecordingNotifier::new();
        let session = session(&dispatcher, &notifier);

        session.on_start_recording(None).await;
        session.on_stop_recording().await;

        assert_eq!(
            notifier.events(),
            vec![
                Event::RecordingError("no program to record".to_string()),
                Event::RecordingStopped(None),
            ]
        );
    }
}

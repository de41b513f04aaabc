use parking_lot::Mutex;
use std::sync::Arc;

use openiptv_core::Locator;
use openiptv_player::{TrackDescriptor, TrackType};

use crate::host::{HostNotifier, Notice, TimeShiftStatus, VideoUnavailableReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TimeShift(TimeShiftStatus),
    VideoUnavailable(VideoUnavailableReason),
    VideoAvailable,
    ContentAllowed,
    TracksChanged(Vec<String>),
    TrackSelected(TrackType, Option<String>),
    Notice(Notice),
    Tuned(Locator),
    RecordingStopped(Option<Locator>),
    RecordingError(String),
}

/// Notifier that records everything it is told
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl HostNotifier for RecordingNotifier {
    fn time_shift_status_changed(&self, status: TimeShiftStatus) {
        self.record(Event::TimeShift(status));
    }

    fn video_unavailable(&self, reason: VideoUnavailableReason) {
        self.record(Event::VideoUnavailable(reason));
    }

    fn video_available(&self) {
        self.record(Event::VideoAvailable);
    }

    fn content_allowed(&self) {
        self.record(Event::ContentAllowed);
    }

    fn tracks_changed(&self, tracks: &[TrackDescriptor]) {
        self.record(Event::TracksChanged(tracks.iter().map(|t| t.id.clone()).collect()));
    }

    fn track_selected(&self, track_type: TrackType, track_id: Option<&str>) {
        self.record(Event::TrackSelected(track_type, track_id.map(str::to_string)));
    }

    fn notice(&self, notice: Notice) {
        self.record(Event::Notice(notice));
    }

    fn tuned(&self, channel: &Locator) {
        self.record(Event::Tuned(channel.clone()));
    }

    fn recording_stopped(&self, program: Option<&Locator>) {
        self.record(Event::RecordingStopped(program.cloned()));
    }

    fn recording_error(&self, reason: &str) {
        self.record(Event::RecordingError(reason.to_string()));
    }
}

//! Track catalog
//!
//! Converts the pipeline's renderer → group → track view into host-visible
//! descriptors and derives the currently selected track per type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Language codes that name no real language and are never surfaced
const SUPPRESSED_LANGUAGES: [&str; 4] = ["und", "nar", "syn", "mis"];

const SUBTITLE_MIME_TYPES: [&str; 12] = [
    "application/x-subrip",
    "application/ttml+xml",
    "application/x-quicktime-tx3g",
    "application/x-mp4-vtt",
    "application/x-rawcc",
    "application/vobsub",
    "application/pgs",
    "application/dvbsubs",
    "application/cea-608",
    "application/cea-708",
    "application/x-mp4-cea-608",
    "application/x-media3-cues",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Video,
    Audio,
    Subtitle,
}

impl TrackType {
    /// Classify a sample MIME type
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.to_ascii_lowercase();
        if mime.starts_with("video/") {
            Some(Self::Video)
        } else if mime.starts_with("audio/") {
            Some(Self::Audio)
        } else if mime.starts_with("text/") || SUBTITLE_MIME_TYPES.contains(&mime.as_str()) {
            Some(Self::Subtitle)
        } else {
            None
        }
    }
}

/// How well the pipeline can decode a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSupport {
    Handled,
    ExceedsCapabilities,
    UnsupportedDrm,
    UnsupportedSubtype,
    UnsupportedType,
}

/// Pipeline-side description of one track
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Format {
    pub id: Option<String>,
    pub sample_mime_type: Option<String>,
    pub frame_rate: Option<f32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pixel_width_height_ratio: Option<f32>,
    pub channel_count: Option<u32>,
    pub sample_rate: Option<u32>,
    pub language: Option<String>,
}

/// Tracks carrying the same content in alternative encodings
#[derive(Debug, Default, PartialEq)]
pub struct TrackGroup {
    pub formats: Vec<Format>,
}

/// A group as mapped to one renderer, with per-track support levels
#[derive(Debug, Clone)]
pub struct MappedGroup {
    pub group: Arc<TrackGroup>,
    pub support: Vec<FormatSupport>,
}

impl MappedGroup {
    fn support_at(&self, index: usize) -> FormatSupport {
        self.support
            .get(index)
            .copied()
            .unwrap_or(FormatSupport::UnsupportedType)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RendererTracks {
    pub groups: Vec<MappedGroup>,
}

/// Everything the pipeline found in the source, per renderer
#[derive(Debug, Clone, Default)]
pub struct MappedTrackInfo {
    pub renderers: Vec<RendererTracks>,
}

/// Active selection of one renderer
#[derive(Debug, Clone)]
pub struct TrackSelection {
    pub group: Arc<TrackGroup>,
    pub indices: Vec<usize>,
}

impl TrackSelection {
    fn contains(&self, group: &Arc<TrackGroup>, index: usize) -> bool {
        Arc::ptr_eq(&self.group, group) && self.indices.contains(&index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
    pub pixel_aspect_ratio: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TrackAttributes {
    Video {
        frame_rate: Option<f32>,
        size: Option<VideoSize>,
    },
    Audio {
        channel_count: Option<u32>,
        sample_rate: Option<u32>,
    },
    Subtitle,
}

/// Host-visible track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: String,
    pub language: Option<String>,
    pub attributes: TrackAttributes,
}

impl TrackDescriptor {
    #[must_use]
    pub const fn track_type(&self) -> TrackType {
        match self.attributes {
            TrackAttributes::Video { .. } => TrackType::Video,
            TrackAttributes::Audio { .. } => TrackType::Audio,
            TrackAttributes::Subtitle => TrackType::Subtitle,
        }
    }

    /// Build a descriptor, or `None` when the format has no id or no known type
    #[must_use]
    pub fn from_format(format: &Format) -> Option<Self> {
        let id = format.id.clone()?;
        let track_type = format.sample_mime_type.as_deref().and_then(TrackType::from_mime)?;

        let attributes = match track_type {
            TrackType::Video => TrackAttributes::Video {
                frame_rate: format.frame_rate,
                size: match (format.width, format.height) {
                    (Some(width), Some(height)) => Some(VideoSize {
                        width,
                        height,
                        pixel_aspect_ratio: format.pixel_width_height_ratio.unwrap_or(1.0),
                    }),
                    _ => None,
                },
            },
            TrackType::Audio => TrackAttributes::Audio {
                channel_count: format.channel_count,
                sample_rate: format.sample_rate,
            },
            TrackType::Subtitle => TrackAttributes::Subtitle,
        };

        Some(Self {
            id,
            language: visible_language(format.language.as_deref()),
            attributes,
        })
    }
}

fn visible_language(language: Option<&str>) -> Option<String> {
    language
        .filter(|lang| !lang.is_empty() && !SUPPRESSED_LANGUAGES.contains(lang))
        .map(str::to_string)
}

pub type TrackSelectionMap = BTreeMap<TrackType, String>;

/// Compute host-visible tracks and the selection map.
///
/// Only tracks the pipeline reports as [`FormatSupport::Handled`] are listed.
/// `selections` is indexed by renderer.
#[must_use]
pub fn compute_tracks(
    mapped: &MappedTrackInfo,
    selections: &[Option<TrackSelection>],
) -> (Vec<TrackDescriptor>, TrackSelectionMap) {
    let mut tracks = Vec::new();
    let mut selected = TrackSelectionMap::new();

    for (renderer_index, renderer) in mapped.renderers.iter().enumerate() {
        let selection = selections.get(renderer_index).and_then(Option::as_ref);

        for mapped_group in &renderer.groups {
            for (track_index, format) in mapped_group.group.formats.iter().enumerate() {
                if mapped_group.support_at(track_index) != FormatSupport::Handled {
                    continue;
                }
                let Some(descriptor) = TrackDescriptor::from_format(format) else {
                    continue;
                };

                if selection.is_some_and(|s| s.contains(&mapped_group.group, track_index)) {
                    selected.insert(descriptor.track_type(), descriptor.id.clone());
                }
                tracks.push(descriptor);
            }
        }
    }

    (tracks, selected)
}

//! Tuned resource locators

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{Error, Result};

/// What a locator points at, derived from its first path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKind {
    Channel,
    Program,
    RecordedProgram,
}

/// Locator of a tunable resource, e.g. `content://android.media.tv/channel/42`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator(String);

impl Locator {
    /// Parse and validate a locator string
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let locator = Self(raw);
        locator.segments()?;
        Ok(locator)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> Result<LocatorKind> {
        let (kind, _) = self.segments()?;
        match kind.as_str() {
            "channel" => Ok(LocatorKind::Channel),
            "program" => Ok(LocatorKind::Program),
            "recorded_program" => Ok(LocatorKind::RecordedProgram),
            other => Err(Error::InvalidLocator(format!(
                "{}: unknown resource type {other}",
                self.0
            ))),
        }
    }

    /// Numeric id carried in the last path segment
    pub fn id(&self) -> Result<u32> {
        let (_, id) = self.segments()?;
        id.parse::<u32>()
            .map_err(|_| Error::InvalidLocator(format!("{}: non-numeric id {id}", self.0)))
    }

    fn segments(&self) -> Result<(String, String)> {
        let url = Url::parse(&self.0)
            .map_err(|e| Error::InvalidLocator(format!("{}: {e}", self.0)))?;
        let mut segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        match (segments.pop(), segments.pop()) {
            (Some(id), Some(kind)) => Ok((kind.to_string(), id.to_string())),
            _ => Err(Error::InvalidLocator(format!(
                "{}: expected <type>/<id> path",
                self.0
            ))),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_locator() {
        let locator = Locator::parse("content://android.media.tv/channel/42").unwrap();
        assert_eq!(locator.kind().unwrap(), LocatorKind::Channel);
        assert_eq!(locator.id().unwrap(), 42);
        assert_eq!(locator.to_string(), "content://android.media.tv/channel/42");
    }

    #[test]
    fn test_recorded_program_locator() {
        let locator = Locator::parse("content://android.media.tv/recorded_program/7").unwrap();
        assert_eq!(locator.kind().unwrap(), LocatorKind::RecordedProgram);
        assert_eq!(locator.id().unwrap(), 7);
    }

    #[test]
    fn test_invalid_locators() {
        assert!(Locator::parse("not a url").is_err());
        assert!(Locator::parse("content://android.media.tv/").is_err());

        let locator = Locator::parse("content://android.media.tv/channel/abc").unwrap();
        assert!(locator.id().is_err());

        let locator = Locator::parse("content://android.media.tv/widget/3").unwrap();
        assert!(locator.kind().is_err());
    }
}

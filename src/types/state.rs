//! Request/reply session state

use std::fmt;

use super::LookupPart;

/// Progress of a polling session from connect to streaming.
///
/// States only move forward, except that a lookup table failing validation
/// sends the session back to [`LinkState::AwaitingLookup1`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connected,
    AwaitingCameraData,
    AwaitingLookup1,
    AwaitingLookup2,
    AwaitingLookup3,
    /// Terminal until the session is disposed
    Streaming,
}

impl LinkState {
    /// State that waits for the given lookup part.
    pub fn awaiting(part: LookupPart) -> Self {
        match part {
            LookupPart::First => LinkState::AwaitingLookup1,
            LookupPart::Second => LinkState::AwaitingLookup2,
            LookupPart::Third => LinkState::AwaitingLookup3,
        }
    }

    /// Whether bootstrap is still in progress.
    pub fn is_bootstrapping(self) -> bool {
        matches!(
            self,
            LinkState::AwaitingCameraData
                | LinkState::AwaitingLookup1
                | LinkState::AwaitingLookup2
                | LinkState::AwaitingLookup3
        )
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connected => "connected",
            LinkState::AwaitingCameraData => "awaiting camera data",
            LinkState::AwaitingLookup1 => "awaiting lookup 1",
            LinkState::AwaitingLookup2 => "awaiting lookup 2",
            LinkState::AwaitingLookup3 => "awaiting lookup 3",
            LinkState::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

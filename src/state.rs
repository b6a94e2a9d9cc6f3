/// LCP automaton state as listed in RFC 1661 section 4.1.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum State {
    Initial,
    Starting,
    Closed,
    Stopped,
    Closing,
    Stopping,
    RequestSent,
    AckReceived,
    AckSent,
    Opened,
}

impl Default for State {
    fn default() -> Self {
        Self::Initial
    }
}

impl State {
    pub const ALL: [State; 10] = [
        Self::Initial,
        Self::Starting,
        Self::Closed,
        Self::Stopped,
        Self::Closing,
        Self::Stopping,
        Self::RequestSent,
        Self::AckReceived,
        Self::AckSent,
        Self::Opened,
    ];

    /// Whether a Configure-Request of ours is outstanding.
    pub fn is_negotiating(&self) -> bool {
        matches!(self, Self::RequestSent | Self::AckReceived | Self::AckSent)
    }

    /// Whether a Terminate-Request of ours is outstanding.
    pub fn is_terminating(&self) -> bool {
        matches!(self, Self::Closing | Self::Stopping)
    }

    /// The lower layer is down in these states.
    pub fn is_lower_down(&self) -> bool {
        matches!(self, Self::Initial | Self::Starting)
    }

    /// States in which the restart timer is never running.
    pub(crate) fn stops_timer(&self) -> bool {
        matches!(
            self,
            Self::Initial | Self::Starting | Self::Closed | Self::Stopped | Self::Opened
        )
    }
}

/// Coarse stage of a connection, ordered by numeric value.
///
/// Protocols are only brought up once the phase reaches their activation
/// phase. Phase only regresses through `Termination` or `Down`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum Phase {
    Down = 0,
    Termination = 1,
    Establishment = 2,
    Authentication = 15,
    Network = 20,
    Established = 25,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Down
    }
}

impl Phase {
    /// The phase protocols are brought up in after this one has completed.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Self::Authentication => Some(Self::Network),
            Self::Network => Some(Self::Established),
            _ => None,
        }
    }

    /// Whether protocols are brought up in this phase.
    pub fn is_activating(&self) -> bool {
        *self >= Self::Authentication
    }
}

use crate::{Phase, State};

/// Automaton events, named after RFC 1661 section 4.1.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Event {
    Up,
    Down,
    UpFailed,
    Open,
    Close,
    TimeoutGood,
    TimeoutBad,
    ConfigureRequestGood,
    ConfigureRequestBad,
    ConfigureAck,
    ConfigureNak,
    TerminateRequest,
    TerminateAck,
    UnknownCode,
    CodeRejectGood,
    CodeRejectBad,
    EchoOrDiscard,
}

/// Connection progress as seen by the user.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Report {
    GoingUp,
    UpSuccessful,
    DownSuccessful,
    DeviceUpFailed,
    NegotiationFailed,
    AuthenticationRequested,
    AuthenticationFailed,
    ConnectionLost,
}

/// Observer of an interface.
///
/// Called with the interface lock held, implementations must not call back
/// into the interface.
pub trait Listener: Send {
    fn state_changed(&mut self, _old: State, _new: State) {}
    fn phase_changed(&mut self, _old: Phase, _new: Phase) {}
    fn report(&mut self, _report: Report) {}
}

/// Listener that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullListener;

impl Listener for NullListener {}

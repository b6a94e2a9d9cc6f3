use tracing::warn;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AuthenticationStatus {
    NotAuthenticated,
    Authenticating,
    Successful,
    Failed,
}

impl Default for AuthenticationStatus {
    fn default() -> Self {
        Self::NotAuthenticated
    }
}

/// Which end of the link is being authenticated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    Local,
    Peer,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct Outcome {
    status: AuthenticationStatus,
    name: Option<String>,
}

/// Authentication outcome of both sides.
///
/// The network phase is only reached once neither side is still
/// authenticating or has failed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuthenticationGate {
    local: Outcome,
    peer: Outcome,
}

impl AuthenticationGate {
    fn outcome(&self, side: Side) -> &Outcome {
        match side {
            Side::Local => &self.local,
            Side::Peer => &self.peer,
        }
    }

    fn outcome_mut(&mut self, side: Side) -> &mut Outcome {
        match side {
            Side::Local => &mut self.local,
            Side::Peer => &mut self.peer,
        }
    }

    pub fn status(&self, side: Side) -> AuthenticationStatus {
        self.outcome(side).status
    }

    /// The name that was accepted or denied.
    pub fn name(&self, side: Side) -> Option<&str> {
        self.outcome(side).name.as_deref()
    }

    pub fn request(&mut self, side: Side) {
        *self.outcome_mut(side) = Outcome {
            status: AuthenticationStatus::Authenticating,
            name: None,
        };
    }

    /// Resolves a pending request. Returns `false` if none was pending.
    pub fn accept(&mut self, side: Side, name: Option<&str>) -> bool {
        self.resolve(side, name, AuthenticationStatus::Successful)
    }

    /// Resolves a pending request. Returns `false` if none was pending.
    pub fn deny(&mut self, side: Side, name: Option<&str>) -> bool {
        self.resolve(side, name, AuthenticationStatus::Failed)
    }

    fn resolve(&mut self, side: Side, name: Option<&str>, status: AuthenticationStatus) -> bool {
        let outcome = self.outcome_mut(side);
        if outcome.status != AuthenticationStatus::Authenticating {
            warn!(
                "{:?} authentication resolved as {:?} without pending request, status {:?}",
                side, status, outcome.status
            );
            return false;
        }

        outcome.status = status;
        outcome.name = name.map(str::to_owned);
        true
    }

    pub fn request_local(&mut self) {
        self.request(Side::Local);
    }

    pub fn accept_local(&mut self, name: Option<&str>) -> bool {
        self.accept(Side::Local, name)
    }

    pub fn deny_local(&mut self, name: Option<&str>) -> bool {
        self.deny(Side::Local, name)
    }

    pub fn request_peer(&mut self) {
        self.request(Side::Peer);
    }

    pub fn accept_peer(&mut self, name: Option<&str>) -> bool {
        self.accept(Side::Peer, name)
    }

    pub fn deny_peer(&mut self, name: Option<&str>) -> bool {
        self.deny(Side::Peer, name)
    }

    /// Whether the connection may advance past the authentication phase.
    pub fn allows_network(&self) -> bool {
        [self.local.status, self.peer.status].iter().all(|status| {
            !matches!(
                status,
                AuthenticationStatus::Authenticating | AuthenticationStatus::Failed
            )
        })
    }

    pub fn has_failed(&self) -> bool {
        self.local.status == AuthenticationStatus::Failed
            || self.peer.status == AuthenticationStatus::Failed
    }

    pub fn is_pending(&self) -> bool {
        self.local.status == AuthenticationStatus::Authenticating
            || self.peer.status == AuthenticationStatus::Authenticating
    }

    /// Forgets both outcomes. Names are kept for reporting.
    pub fn reset(&mut self) {
        self.local.status = AuthenticationStatus::NotAuthenticated;
        self.peer.status = AuthenticationStatus::NotAuthenticated;
    }
}

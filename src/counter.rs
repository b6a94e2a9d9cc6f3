/// Bounded retry budget for request, terminate and nak exchanges.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NegotiationCounter {
    max: u32,
    remaining: u32,
}

impl NegotiationCounter {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            remaining: max,
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Restores the full budget.
    pub fn initialize(&mut self) {
        self.remaining = self.max;
    }

    pub fn zero(&mut self) {
        self.remaining = 0;
    }

    /// Takes one unit from the budget.
    ///
    /// Returns `true` if the budget was already exhausted, in which case
    /// nothing is taken.
    pub fn consume(&mut self) -> bool {
        if self.remaining == 0 {
            return true;
        }

        self.remaining -= 1;
        false
    }
}

/// Wrapping 8-bit packet identifier that remembers the last value it issued.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Identifier {
    next: u8,
    last: Option<u8>,
}

impl Default for Identifier {
    fn default() -> Self {
        Self::random()
    }
}

impl Identifier {
    pub fn new(first: u8) -> Self {
        Self {
            next: first,
            last: None,
        }
    }

    pub fn random() -> Self {
        Self::new(rand::random())
    }

    /// Issues the next identifier and remembers it.
    pub fn next_id(&mut self) -> u8 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        self.last = Some(id);

        id
    }

    /// The identifier of the most recently sent packet, if any.
    pub fn last(&self) -> Option<u8> {
        self.last
    }

    /// Whether `id` is the reply to the most recently sent packet.
    pub fn matches(&self, id: u8) -> bool {
        self.last == Some(id)
    }

    /// Moves away from an identifier the peer is using.
    pub fn avoid(&mut self, peer: u8) {
        if self.next == peer {
            self.next = self.next.wrapping_sub(128);
        }
    }
}

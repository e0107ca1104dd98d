//! Trigger / wait / read state machine shared by the triggered drivers

/// A conversion the chip still reports as busy after this many conversion
/// delays is treated as lost.
pub(crate) const CONVERSION_TIMEOUT_FACTOR: u32 = 10;

/// Where a triggered driver is within one conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConversionState {
    /// Nothing in flight; the next call issues a trigger.
    Idle,
    /// Trigger issued, `waited_ms` accumulated since.
    Waiting { waited_ms: u32 },
    /// A cycle was interrupted and its progress cannot be trusted.
    Unknown,
}

/// What the driver has to do on this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConversionStep {
    Trigger,
    Wait,
    Read,
}

#[derive(Debug)]
pub(crate) struct ConversionCycle {
    pub(crate) state: ConversionState,
    delay_ms: u32,
    timeout_ms: u32,
    /// Time waited when the last read step was issued.
    waited_at_read_ms: u32,
}

impl ConversionCycle {
    pub(crate) const fn new(delay_ms: u32) -> Self {
        Self {
            state: ConversionState::Idle,
            delay_ms,
            timeout_ms: delay_ms.saturating_mul(CONVERSION_TIMEOUT_FACTOR),
            waited_at_read_ms: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ConversionState::Idle;
    }

    /// Mark the cycle as interrupted, e.g. after a failed bus transfer.
    pub(crate) fn fault(&mut self) {
        self.state = ConversionState::Unknown;
    }

    /// Keep waiting for a conversion the chip reports as not yet done.
    ///
    /// Returns `false`, leaving the cycle in `Unknown`, once the total wait
    /// has passed the timeout.
    pub(crate) fn extend(&mut self) -> bool {
        if self.waited_at_read_ms > self.timeout_ms {
            self.state = ConversionState::Unknown;
            return false;
        }

        self.state = ConversionState::Waiting {
            waited_ms: self.waited_at_read_ms,
        };
        true
    }

    pub(crate) fn advance(&mut self, elapsed_ms: u32) -> ConversionStep {
        match self.state {
            ConversionState::Idle => {
                self.state = ConversionState::Waiting { waited_ms: 0 };
                ConversionStep::Trigger
            }
            ConversionState::Waiting { waited_ms } => {
                let waited_ms = waited_ms.saturating_add(elapsed_ms);
                if waited_ms > self.delay_ms {
                    self.waited_at_read_ms = waited_ms;
                    self.state = ConversionState::Idle;
                    ConversionStep::Read
                } else {
                    self.state = ConversionState::Waiting { waited_ms };
                    ConversionStep::Wait
                }
            }
            // Fail safe: start over, the trigger goes out on the next call.
            ConversionState::Unknown => {
                self.state = ConversionState::Idle;
                ConversionStep::Wait
            }
        }
    }
}

//! Exchange notifications

/// Broadcast after every completed exchange. Exactly one per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// The agent answered with `ok: true`
    Succeeded {
        seq: u64,
        action: String,
        /// Raw response text
        response: String,
    },
    /// Transport failure, agent error, or cancellation before dispatch
    Failed {
        seq: u64,
        action: String,
        error: String,
    },
}

impl ExchangeEvent {
    /// Submission sequence number of the request this event belongs to
    pub fn seq(&self) -> u64 {
        match self {
            ExchangeEvent::Succeeded { seq, .. } | ExchangeEvent::Failed { seq, .. } => *seq,
        }
    }

    pub fn action(&self) -> &str {
        match self {
            ExchangeEvent::Succeeded { action, .. } | ExchangeEvent::Failed { action, .. } => {
                action
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExchangeEvent::Succeeded { .. })
    }

    /// Response text on success, error text on failure
    pub fn message(&self) -> &str {
        match self {
            ExchangeEvent::Succeeded { response, .. } => response,
            ExchangeEvent::Failed { error, .. } => error,
        }
    }
}

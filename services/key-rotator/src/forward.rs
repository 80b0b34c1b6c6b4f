//! Attempt state machine for one forwarded request
//!
//! Pure state machine: receives events, returns (new_state, action).
//! The executor in `proxy.rs` performs the I/O implied by each action and
//! feeds the result back as the next event.
//!
//! At most `max_attempts` (the pool size) upstream calls are made. Every
//! rotation puts the failed credential on cooldown, so a single request never
//! retries the same credential. A final transport failure also cools the
//! credential down; a final quota response does not.

use provider::ErrorClassification;

/// Where a forwarded request is in its attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardState {
    /// Asking the pool for a credential; `attempt` is 1-based
    Selecting { attempt: usize },
    /// Upstream call in flight with the credential at `index`
    Calling { attempt: usize, index: usize },
    /// Terminal
    Done,
}

/// Results reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardEvent {
    /// Pool returned the credential at `index`
    Selected { index: usize },
    /// Every credential is cooling down
    NoneAvailable,
    /// Upstream answered; classified by status
    Responded { classification: ErrorClassification },
    /// No response (connect error, timeout, credential not attachable)
    TransportFailed,
    /// Executor invariant broke (e.g. no credential held while calling)
    Fault,
}

/// How the request ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Hand the last upstream response to the caller
    Deliver,
    /// Synthetic 429: no credential was available to try
    PoolExhausted,
    /// Synthetic 502: the final attempt got no response
    BadGateway,
    /// Synthetic 500
    Internal,
}

/// Actions the executor should perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardAction {
    /// Ask the pool for the next credential
    Select,
    /// Send the request with the selected credential
    Call { index: usize },
    /// Discard the last response, put `index` on cooldown, then select again
    Rotate { index: usize },
    /// Stop. `exhaust` names a credential to put on cooldown first.
    Finish {
        outcome: Outcome,
        exhaust: Option<usize>,
    },
}

/// Starting point for every forwarded request.
pub fn initial() -> (ForwardState, ForwardAction) {
    (ForwardState::Selecting { attempt: 1 }, ForwardAction::Select)
}

/// Handle a state transition. Pure function: no I/O.
///
/// A quota signal on the final attempt is delivered verbatim and leaves that
/// credential usable; only "nothing was available to try" produces the
/// synthetic 429.
pub fn handle_event(
    state: ForwardState,
    event: ForwardEvent,
    max_attempts: usize,
) -> (ForwardState, ForwardAction) {
    match (state, event) {
        // --- Selecting ---
        (ForwardState::Selecting { attempt }, ForwardEvent::Selected { index }) => (
            ForwardState::Calling { attempt, index },
            ForwardAction::Call { index },
        ),

        (ForwardState::Selecting { .. }, ForwardEvent::NoneAvailable) => {
            finish(Outcome::PoolExhausted, None)
        }

        // --- Calling: evaluate the attempt ---
        (ForwardState::Calling { .. }, ForwardEvent::Responded { classification })
            if !classification.rotates() =>
        {
            finish(Outcome::Deliver, None)
        }

        (
            ForwardState::Calling { attempt, index },
            ForwardEvent::Responded { .. } | ForwardEvent::TransportFailed,
        ) if attempt < max_attempts => (
            ForwardState::Selecting {
                attempt: attempt + 1,
            },
            ForwardAction::Rotate { index },
        ),

        (ForwardState::Calling { .. }, ForwardEvent::Responded { .. }) => {
            finish(Outcome::Deliver, None)
        }

        (ForwardState::Calling { index, .. }, ForwardEvent::TransportFailed) => {
            finish(Outcome::BadGateway, Some(index))
        }

        // --- Anything else ends the request ---
        (_, _) => finish(Outcome::Internal, None),
    }
}

fn finish(outcome: Outcome, exhaust: Option<usize>) -> (ForwardState, ForwardAction) {
    (ForwardState::Done, ForwardAction::Finish { outcome, exhaust })
}

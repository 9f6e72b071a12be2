//! States for the mode switch state machine.
//!
//! This modules is private and restricted to the
//! [`mode_switch`](crate::mode_switch) scope.
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use std::thread;

use log::{debug, info};

use super::events::*;
use super::state_machine::Transition;
use crate::communicator::ModeCommunicator;
use crate::discovery::discover_with_retry;
use crate::error::{Error, Result};
use crate::transport::HidTransport;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// During this call, the state does its work and requests a transition to
    /// a `new state` by returning the appropriate `event`. The `event` is
    /// consumed to create the `new state` using the corresponding [`From`]
    /// trait implementation.
    fn run<T: HidTransport>(&mut self, transition: &mut Transition<'_, T>) -> Event;
}

// Request State ===============================================================

/// The initial state: the device is still connected through the communicator
/// for the mode it is leaving.
///
/// From the `RequestState`, the state machine can evolve via the following
/// transitions:
///
///  * **[`SettleEvent`] => [`SettleState`]** when the request was written and
///    the device is re-enumerating,
///  * **[`AdoptEvent`] => [`VerifyState`]** when the request returned a
///    communicator for the new mode directly,
///  * **[`FailedEvent`] => [`DoneState`]** when the request could not be
///    written.
///
/// In all cases the old communicator is consumed and its handle closed.
#[derive(Debug)]
pub(crate) struct RequestState {
    /// Consumed when the request is made.
    pub communicator: Option<ModeCommunicator>,
}
impl Runnable for RequestState {
    fn run<T: HidTransport>(&mut self, transition: &mut Transition<'_, T>) -> Event {
        info!("=> Request");

        if let Some(communicator) = self.communicator.take() {
            return match communicator.request_mode_change(transition.to) {
                Ok(Some(communicator)) => Event::Adopt(AdoptEvent { communicator }),
                Ok(None) => Event::Settle(SettleEvent {}),
                Err(error) => Event::Failed(FailedEvent { error }),
            };
        }

        // We should never reach here!
        unreachable!()
    }
}

// Settle State ================================================================

/// The device is rebooting. Wait for it to show up on the bus again.
#[derive(Debug)]
pub(crate) struct SettleState {}
impl Runnable for SettleState {
    fn run<T: HidTransport>(&mut self, transition: &mut Transition<'_, T>) -> Event {
        info!("=> Settle");
        debug!(
            "Giving the device {:?} to re-enumerate",
            transition.settings.settle_delay
        );
        thread::sleep(transition.settings.settle_delay);
        Event::Rediscover(RediscoverEvent {})
    }
}

// Rediscover State ============================================================

/// Look for the device again. The old path is meaningless after
/// re-enumeration, so this is a fresh discovery.
#[derive(Debug)]
pub(crate) struct RediscoverState {}
impl Runnable for RediscoverState {
    fn run<T: HidTransport>(&mut self, transition: &mut Transition<'_, T>) -> Event {
        info!("=> Rediscover");
        match discover_with_retry(&mut *transition.transport, transition.settings) {
            Ok(Some(communicator)) => Event::Adopt(AdoptEvent { communicator }),
            Ok(None) => Event::Failed(FailedEvent {
                error: Error::ModeTransitionFailed {
                    from: transition.from,
                    expected: transition.to,
                    found: None,
                },
            }),
            Err(error) => Event::Failed(FailedEvent { error }),
        }
    }
}

// Verify State ================================================================

/// A communicator is available; check that the device is really in the
/// requested mode before handing it out.
#[derive(Debug)]
pub(crate) struct VerifyState {
    /// Consumed when verified.
    pub communicator: Option<ModeCommunicator>,
}
impl Runnable for VerifyState {
    fn run<T: HidTransport>(&mut self, transition: &mut Transition<'_, T>) -> Event {
        info!("=> Verify");

        if let Some(communicator) = self.communicator.take() {
            let found = communicator.mode();
            if found == transition.to {
                return Event::Done(DoneEvent { communicator });
            }
            // dropping the communicator closes the unexpected device
            return Event::Failed(FailedEvent {
                error: Error::ModeTransitionFailed {
                    from: transition.from,
                    expected: transition.to,
                    found: Some(found),
                },
            });
        }

        // We should never reach here!
        unreachable!()
    }
}

// Done State ==================================================================

/// Terminal state holding the outcome of the switch.
#[derive(Debug)]
pub(crate) struct DoneState {
    pub outcome: Result<ModeCommunicator>,
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<AdoptEvent> for VerifyState {
    fn from(event: AdoptEvent) -> VerifyState {
        VerifyState {
            communicator: Some(event.communicator),
        }
    }
}

impl From<SettleEvent> for SettleState {
    fn from(_: SettleEvent) -> SettleState {
        SettleState {}
    }
}

impl From<RediscoverEvent> for RediscoverState {
    fn from(_: RediscoverEvent) -> RediscoverState {
        RediscoverState {}
    }
}

impl From<DoneEvent> for DoneState {
    fn from(event: DoneEvent) -> DoneState {
        DoneState {
            outcome: Ok(event.communicator),
        }
    }
}
impl From<FailedEvent> for DoneState {
    fn from(event: FailedEvent) -> DoneState {
        DoneState {
            outcome: Err(event.error),
        }
    }
}

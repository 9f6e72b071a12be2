//! Events for the mode switch state machine.
//!
//! This modules is private and restricted to the
//! [`mode_switch`](crate::mode_switch) scope.
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use crate::communicator::ModeCommunicator;
use crate::error::Error;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// AdoptEvent ==================================================================

/// Event fired when a communicator for the device is available, either
/// returned directly by the mode change request or found by discovery. It
/// triggers a transition to the `Verify` state.
#[derive(Debug)]
pub(crate) struct AdoptEvent {
    pub communicator: ModeCommunicator,
}

// SettleEvent =================================================================

/// Event fired when the mode change request was written and the device is
/// dropping off the bus to re-enumerate.
#[derive(Debug)]
pub(crate) struct SettleEvent {}

// RediscoverEvent =============================================================

/// Event fired once the device had time to reboot.
#[derive(Debug)]
pub(crate) struct RediscoverEvent {}

// DoneEvent ===================================================================

/// Event fired when the device is verified to be in the requested mode.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub communicator: ModeCommunicator,
}

// FailedEvent =================================================================

/// Event fired from any state when the switch can not be completed. There is
/// no way back: the old handle is already closed.
#[derive(Debug)]
pub(crate) struct FailedEvent {
    pub error: Error,
}

// Events enum ==================================================================

/// Events that can be triggered within the mode switch state machine.
#[derive(Debug)]
pub(crate) enum Event {
    Adopt(AdoptEvent),
    Settle(SettleEvent),
    Rediscover(RediscoverEvent),
    Done(DoneEvent),
    Failed(FailedEvent),
}

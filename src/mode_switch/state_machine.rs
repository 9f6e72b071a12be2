//! Mode switch state machine.
//!
//! A mode change makes the device reboot into the other firmware. It drops
//! off the USB bus the moment the request is written and comes back under a
//! new product ID, and possibly a new path. The handle used to send the
//! request is therefore closed right away and never reused; the only proof of
//! success is finding the device again, in the requested mode.
//!
//! The following state diagram summarizes the states and transitions:
//!
//! ```text
//!                     START
//!                       |
//!                       v
//!                 .-----------.
//!                 |  Request  |----------------.
//!                 '-----------'                |
//!                   |       |                  |
//!         re-enumerates   communicator         |
//!                   |     returned             |
//!                   v       |                  |
//!              .--------.   |                  |
//!              | Settle |   |                  |
//!              '--------'   |                  |
//!                   |       |                  |
//!                   v       |                  |
//!            .------------. |       not found  |
//!            | Rediscover |-+--------------.   | write
//!            '------------' |              |   | error
//!                   |       |              |   |
//!                 found     |              |   |
//!                   v       v              |   |
//!                 .-----------.  wrong     |   |
//!                 |  Verify   |--mode---.  |   |
//!                 '-----------'         |  |   |
//!                       |               v  v   v
//!                       |            .----------.
//!                       '----------->|   Done   |
//!                                    '----------'
//!                                          |
//!                                          v
//!                                         END
//! ```

use std::fmt;

use super::events::*;
use super::states::*;
use crate::communicator::ModeCommunicator;
use crate::device::DeviceMode;
use crate::error::Result;
use crate::settings::Settings;
use crate::transport::HidTransport;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Data shared by all states of one mode switch.
pub(crate) struct Transition<'a, T: HidTransport> {
    pub transport: &'a mut T,
    pub settings: &'a Settings,
    pub from: DeviceMode,
    pub to: DeviceMode,
}

/// Represents one run of the mode switch state machine. Use the `factory()`
/// function to get an instance then run it by calling its `run()` method.
pub(crate) struct ModeSwitch<'a, T: HidTransport> {
    sm: SwitchStates<'a, T>,
}
impl<'a, T: HidTransport> ModeSwitch<'a, T> {
    /// The event loop runs until the `Done` state is reached and returns the
    /// communicator for the requested mode.
    pub fn run(self) -> Result<ModeCommunicator> {
        let mut sm = self.sm;
        loop {
            sm = match sm.step() {
                SwitchStates::Done(sm) => return sm.state.outcome,
                other => other,
            };
        }
    }
}

/// Factory function for the mode switch state machine, taking over the
/// `communicator` of the mode being left.
pub(crate) fn factory<'a, T: HidTransport>(
    transport: &'a mut T,
    settings: &'a Settings,
    communicator: ModeCommunicator,
    target: DeviceMode,
) -> ModeSwitch<'a, T> {
    let from = communicator.mode();
    ModeSwitch {
        // The machine naturally starts in the `Request` state.
        sm: SwitchStates::Request(SwitchSM {
            transition: Transition {
                transport,
                settings,
                from,
                to: target,
            },
            state: RequestState {
                communicator: Some(communicator),
            },
        }),
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// The raw state machine: the shared transition data and the current state.
struct SwitchSM<'a, T: HidTransport, S> {
    transition: Transition<'a, T>,
    state: S,
}
impl<'a, T: HidTransport, S: Runnable> SwitchSM<'a, T, S> {
    fn run(&mut self) -> Event {
        self.state.run(&mut self.transition)
    }
}
impl<'a, T: HidTransport, S> SwitchSM<'a, T, S> {
    /// Moves the shared data over to the next state.
    fn transit<N>(self, state: N) -> SwitchSM<'a, T, N> {
        SwitchSM {
            transition: self.transition,
            state,
        }
    }
}
impl<'a, T: HidTransport, S: fmt::Debug> fmt::Debug for SwitchSM<'a, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchSM")
            .field("from", &self.transition.from)
            .field("to", &self.transition.to)
            .field("state", &self.state)
            .finish()
    }
}

/// An enum wrapper around the states of the mode switch state machine.
enum SwitchStates<'a, T: HidTransport> {
    Request(SwitchSM<'a, T, RequestState>),
    Settle(SwitchSM<'a, T, SettleState>),
    Rediscover(SwitchSM<'a, T, RediscoverState>),
    Verify(SwitchSM<'a, T, VerifyState>),
    Done(SwitchSM<'a, T, DoneState>),
}
impl<'a, T: HidTransport> SwitchStates<'a, T> {
    /// The unit of work in the state machine event loop. It runs the current
    /// state and decides the next transition from the event it returns.
    /// Transitions are implemented with `From`/`Into`, so a state/event
    /// mismatch does not compile.
    fn step(self) -> Self {
        match self {
            SwitchStates::Request(mut sm) => {
                let event = sm.run();
                match event {
                    Event::Settle(ev) => SwitchStates::Settle(sm.transit(ev.into())),
                    Event::Adopt(ev) => SwitchStates::Verify(sm.transit(ev.into())),
                    Event::Failed(ev) => SwitchStates::Done(sm.transit(ev.into())),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SwitchStates::Settle(mut sm) => {
                let event = sm.run();
                match event {
                    Event::Rediscover(ev) => SwitchStates::Rediscover(sm.transit(ev.into())),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SwitchStates::Rediscover(mut sm) => {
                let event = sm.run();
                match event {
                    Event::Adopt(ev) => SwitchStates::Verify(sm.transit(ev.into())),
                    Event::Failed(ev) => SwitchStates::Done(sm.transit(ev.into())),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SwitchStates::Verify(mut sm) => {
                let event = sm.run();
                match event {
                    Event::Done(ev) => SwitchStates::Done(sm.transit(ev.into())),
                    Event::Failed(ev) => SwitchStates::Done(sm.transit(ev.into())),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            done @ SwitchStates::Done(_) => done,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
use crate::transport::mock::{self, MockBus};

#[cfg(test)]
fn settings() -> Settings {
    crate::settings::SettingsBuilder::new()
        .settle_delay(std::time::Duration::from_millis(0))
        .finalize()
}

#[cfg(test)]
fn communicator_on(bus: &MockBus, mode: DeviceMode) -> ModeCommunicator {
    ModeCommunicator::new(mode, bus.handle("old"), crate::report::WireFormat::CURRENT)
}

#[test]
fn old_handle_closed_before_rediscovery() {
    let bus = MockBus::new(vec![vec![mock::bootloader("new")]]);
    let settings = settings();
    let comm = communicator_on(&bus, DeviceMode::Application);
    let mut transport = bus.transport();

    let comm = factory(&mut transport, &settings, comm, DeviceMode::Bootloader)
        .run()
        .unwrap();

    assert_eq!(comm.mode(), DeviceMode::Bootloader);
    assert_eq!(bus.writes_to("old"), vec![vec![0x08, 0x42]]);
    assert_eq!(bus.opened(), vec!["old", "new"]);
    assert_eq!(bus.max_open_handles(), 1);
}

#[test]
fn missing_device_reports_modes() {
    let bus = MockBus::new(vec![vec![]]);
    let settings = settings();
    let comm = communicator_on(&bus, DeviceMode::Bootloader);
    let mut transport = bus.transport();

    let result = factory(&mut transport, &settings, comm, DeviceMode::Application).run();

    assert!(matches!(
        result,
        Err(crate::error::Error::ModeTransitionFailed {
            from: DeviceMode::Bootloader,
            expected: DeviceMode::Application,
            found: None,
        })
    ));
    assert_eq!(bus.open_handles(), 0);
}

//! Switching the device between application and bootloader.
//!
//! **Example** - Running the state machine from
//! [`Device::set_mode`](crate::Device::set_mode):
//! ```ignore
//! use crate::mode_switch;
//!
//! let communicator =
//!     mode_switch::factory(&mut transport, &settings, communicator, target).run()?;
//! ```

mod events;
mod state_machine;
mod states;

pub(crate) use state_machine::factory;

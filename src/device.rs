//! The physical device and its modes.
//!
//! A [`Device`] represents the physical unit, whatever mode it is in. It
//! holds the communicator for the current mode and is the only place where
//! the mode changes: [`Device::set_mode`] runs the
//! [mode switch state machine](crate::mode_switch) and replaces the
//! communicator with the one found after the device re-enumerated.
//!
//! **Example** - Switching to the bootloader and back:
//! ```no_run
//! use hidflash::{Device, DeviceMode, HidApiTransport, Settings};
//!
//! # fn main() -> hidflash::Result<()> {
//! let device = Device::open(HidApiTransport::new()?, Settings::default())?;
//! let device = device.set_mode(DeviceMode::Bootloader)?;
//! let device = device.set_mode(DeviceMode::Application)?;
//! assert_eq!(device.mode(), DeviceMode::Application);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;

use log::{debug, info};

use crate::communicator::{BootloaderCommunicator, ModeCommunicator};
use crate::discovery::discover;
use crate::error::{Error, Result};
use crate::mode_switch;
use crate::settings::Settings;
use crate::transport::HidTransport;

/// The firmware the device is running.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DeviceMode {
    Application,
    Bootloader,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::Application => f.write_str("app"),
            DeviceMode::Bootloader => f.write_str("bootloader"),
        }
    }
}

impl FromStr for DeviceMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "app" | "application" => Ok(DeviceMode::Application),
            "bootloader" | "boot" => Ok(DeviceMode::Bootloader),
            _ => Err(format!("unknown mode `{}`", s)),
        }
    }
}

/// The physical device.
///
/// Holds exactly one open handle, owned by the current communicator. Dropping
/// the device closes it.
pub struct Device<T: HidTransport> {
    transport: T,
    settings: Settings,
    communicator: ModeCommunicator,
}

impl<T: HidTransport> Device<T> {
    /// Looks for the device. Returns `None` if it is not connected.
    pub fn find(mut transport: T, settings: Settings) -> Result<Option<Self>> {
        Ok(discover(&mut transport, &settings)?.map(|communicator| {
            debug!("Found device in {} mode", communicator.mode());
            Device {
                transport,
                settings,
                communicator,
            }
        }))
    }

    /// Like [`find`](Self::find), but a missing device is an error.
    pub fn open(transport: T, settings: Settings) -> Result<Self> {
        Self::find(transport, settings)?.ok_or(Error::DeviceNotFound)
    }

    pub fn mode(&self) -> DeviceMode {
        self.communicator.mode()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn communicator(&self) -> &ModeCommunicator {
        &self.communicator
    }

    /// The bootloader communicator, if the device is in the bootloader.
    pub fn bootloader_mut(&mut self) -> Option<&mut BootloaderCommunicator> {
        match &mut self.communicator {
            ModeCommunicator::Bootloader(comm) => Some(comm),
            ModeCommunicator::Application(_) => None,
        }
    }

    /// Switches the device to `target` and makes sure it arrived there.
    ///
    /// Does nothing if the device already is in `target`. Otherwise the
    /// current handle is closed, the device reboots and is looked up again
    /// after [`Settings::settle_delay`]. On error the device is gone: either
    /// it did not come back, came back in another mode, or the request could
    /// not be sent. In all cases its handle is closed.
    pub fn set_mode(self, target: DeviceMode) -> Result<Self> {
        let previous = self.mode();
        if previous == target {
            debug!("Device already in {} mode", target);
            return Ok(self);
        }

        info!("Switching device from {} to {} mode", previous, target);
        let Device {
            mut transport,
            settings,
            communicator,
        } = self;
        let communicator =
            mode_switch::factory(&mut transport, &settings, communicator, target).run()?;

        Ok(Device {
            transport,
            settings,
            communicator,
        })
    }
}

impl<T: HidTransport> fmt::Debug for Device<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("communicator", &self.communicator)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
use crate::transport::mock::{self, MockBus};

#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
fn quick_settings() -> Settings {
    crate::settings::SettingsBuilder::new()
        .settle_delay(Duration::from_millis(0))
        .finalize()
}

#[test]
fn mode_names() {
    assert_eq!(DeviceMode::Application.to_string(), "app");
    assert_eq!(DeviceMode::Bootloader.to_string(), "bootloader");
    assert_eq!("app".parse::<DeviceMode>(), Ok(DeviceMode::Application));
    assert_eq!("boot".parse::<DeviceMode>(), Ok(DeviceMode::Bootloader));
    assert!("dfu".parse::<DeviceMode>().is_err());
}

#[test]
fn find_nothing() {
    let bus = MockBus::new(vec![vec![mock::entry(0x046D, 0xC52B, "mouse")]]);
    assert!(Device::find(bus.transport(), quick_settings())
        .unwrap()
        .is_none());
    assert!(matches!(
        Device::open(bus.transport(), quick_settings()),
        Err(Error::DeviceNotFound)
    ));
    assert!(bus.opened().is_empty());
}

#[test]
fn enter_bootloader() {
    let bus = MockBus::new(vec![
        vec![mock::app("app-path")],
        vec![mock::bootloader("boot-path")],
    ]);
    let device = Device::open(bus.transport(), quick_settings()).unwrap();
    assert_eq!(device.mode(), DeviceMode::Application);

    let mut device = device.set_mode(DeviceMode::Bootloader).unwrap();

    assert_eq!(device.mode(), DeviceMode::Bootloader);
    assert!(device.bootloader_mut().is_some());
    assert_eq!(bus.writes_to("app-path"), vec![vec![0x08, 0x42]]);
    assert_eq!(bus.opened(), vec!["app-path", "boot-path"]);
    assert_eq!(bus.open_handles(), 1);
    assert_eq!(bus.max_open_handles(), 1);
}

#[test]
fn leave_bootloader() {
    let bus = MockBus::new(vec![
        vec![mock::bootloader("boot-path")],
        vec![mock::app("app-path")],
    ]);
    let device = Device::open(bus.transport(), quick_settings()).unwrap();

    let mut device = device.set_mode(DeviceMode::Application).unwrap();

    assert_eq!(device.mode(), DeviceMode::Application);
    assert!(device.bootloader_mut().is_none());
    assert_eq!(bus.writes(), vec![vec![0x00, 0xFF, 0xFF]]);
}

#[test]
fn set_mode_is_idempotent() {
    let bus = MockBus::new(vec![
        vec![mock::app("app-path")],
        vec![mock::bootloader("boot-path")],
    ]);
    let device = Device::open(bus.transport(), quick_settings()).unwrap();

    let device = device.set_mode(DeviceMode::Bootloader).unwrap();
    assert_eq!(bus.writes().len(), 1);
    assert_eq!(bus.scan_count(), 2);

    let device = device.set_mode(DeviceMode::Bootloader).unwrap();
    assert_eq!(device.mode(), DeviceMode::Bootloader);
    assert_eq!(bus.writes().len(), 1);
    assert_eq!(bus.scan_count(), 2);
}

#[test]
fn same_mode_is_noop() {
    let bus = MockBus::new(vec![vec![mock::app("app-path")]]);
    let device = Device::open(bus.transport(), quick_settings()).unwrap();

    let device = device.set_mode(DeviceMode::Application).unwrap();

    assert_eq!(device.mode(), DeviceMode::Application);
    assert!(bus.writes().is_empty());
    assert_eq!(bus.scan_count(), 1);
}

#[test]
fn device_does_not_come_back() {
    let bus = MockBus::new(vec![vec![mock::app("app-path")], vec![]]);
    let device = Device::open(bus.transport(), quick_settings()).unwrap();

    let result = device.set_mode(DeviceMode::Bootloader);

    assert!(matches!(
        result,
        Err(Error::ModeTransitionFailed {
            from: DeviceMode::Application,
            expected: DeviceMode::Bootloader,
            found: None,
        })
    ));
    assert_eq!(bus.open_handles(), 0);
}

#[test]
fn device_comes_back_in_wrong_mode() {
    let bus = MockBus::new(vec![
        vec![mock::bootloader("boot-path")],
        vec![mock::bootloader("boot-path-2")],
    ]);
    let device = Device::open(bus.transport(), quick_settings()).unwrap();

    let result = device.set_mode(DeviceMode::Application);

    assert!(matches!(
        result,
        Err(Error::ModeTransitionFailed {
            from: DeviceMode::Bootloader,
            expected: DeviceMode::Application,
            found: Some(DeviceMode::Bootloader),
        })
    ));
    assert_eq!(bus.open_handles(), 0);
    assert_eq!(bus.max_open_handles(), 1);
}

#[test]
fn request_write_fails() {
    let bus = MockBus::new(vec![
        vec![mock::app("app-path")],
        vec![mock::bootloader("boot-path")],
    ]);
    let device = Device::open(bus.transport(), quick_settings()).unwrap();
    bus.fail_writes();

    let result = device.set_mode(DeviceMode::Bootloader);

    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(bus.open_handles(), 0);
    // no rediscovery after a failed request
    assert_eq!(bus.scan_count(), 1);
}

#[test]
fn ambiguous_after_switch() {
    let bus = MockBus::new(vec![
        vec![mock::app("app-path")],
        vec![mock::bootloader("boot-1"), mock::bootloader("boot-2")],
    ]);
    let device = Device::open(bus.transport(), quick_settings()).unwrap();

    let result = device.set_mode(DeviceMode::Bootloader);

    assert!(matches!(result, Err(Error::AmbiguousDevice { .. })));
    assert_eq!(bus.open_handles(), 0);
}

#[test]
fn bounded_rediscovery() {
    let bus = MockBus::new(vec![
        vec![mock::app("app-path")],
        vec![],
        vec![],
        vec![mock::bootloader("boot-path")],
    ]);
    let settings = crate::settings::SettingsBuilder::new()
        .settle_delay(Duration::from_millis(0))
        .rediscover_attempts(3)
        .rediscover_interval(Duration::from_millis(0))
        .finalize();
    let device = Device::open(bus.transport(), settings).unwrap();

    let device = device.set_mode(DeviceMode::Bootloader).unwrap();

    assert_eq!(device.mode(), DeviceMode::Bootloader);
    assert_eq!(bus.scan_count(), 4);
}

#[test]
fn rediscovery_gives_up() {
    let bus = MockBus::new(vec![vec![mock::app("app-path")], vec![]]);
    let settings = crate::settings::SettingsBuilder::new()
        .settle_delay(Duration::from_millis(0))
        .rediscover_attempts(2)
        .rediscover_interval(Duration::from_millis(0))
        .finalize();
    let device = Device::open(bus.transport(), settings).unwrap();

    let result = device.set_mode(DeviceMode::Bootloader);

    assert!(matches!(
        result,
        Err(Error::ModeTransitionFailed { found: None, .. })
    ));
    assert_eq!(bus.scan_count(), 4);
}

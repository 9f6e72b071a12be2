//! Settings related to device recognition, the firmware wire format and mode
//! transitions.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

use std::time::Duration;

use crate::device::DeviceMode;
use crate::report::{AddressUnit, WireFormat};

// =============================================================================
// Public Interface
// =============================================================================

/// USB vendor ID reported by both the application and the bootloader.
pub const VENDOR_ID: u16 = 0x03EB;

/// USB product ID of the device in application mode.
pub const PRODUCT_ID_APP: u16 = 0x2041;

/// USB product ID of the device in bootloader mode.
pub const PRODUCT_ID_BOOTLOADER: u16 = 0x2067;

/// Total flash size of the targeted microcontroller (ATmega8u2 has 8Kb).
pub const FLASH_SIZE_BYTES: u32 = 8192;

/// Groups all settings used by `hidflash` and acts as a
/// [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// USB vendor ID shared by both modes.
    pub vendor_id: u16,
    /// USB product ID of the application.
    pub product_id_app: u16,
    /// USB product ID of the bootloader.
    pub product_id_bootloader: u16,

    /// Report ID and address unit of the targeted firmware revision.
    pub wire_format: WireFormat,

    /// Time given to the device to reboot and re-enumerate after a mode change
    /// report was written, before looking for it again.
    pub settle_delay: Duration,
    /// Additional discovery scans after the first one came back empty. Zero
    /// means a single scan.
    pub rediscover_attempts: usize,
    /// Pause between discovery scans when `rediscover_attempts` is non zero.
    pub rediscover_interval: Duration,

    /// Flash capacity images are checked against before flashing, if any.
    pub flash_size: Option<u32>,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

impl Settings {
    /// The recognition table: maps a USB vendor/product ID pair to the mode
    /// the device is in, or `None` for unrelated hardware.
    pub fn recognize(&self, vendor_id: u16, product_id: u16) -> Option<DeviceMode> {
        if vendor_id != self.vendor_id {
            return None;
        }
        if product_id == self.product_id_app {
            Some(DeviceMode::Application)
        } else if product_id == self.product_id_bootloader {
            Some(DeviceMode::Bootloader)
        } else {
            None
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        SettingsBuilder::new().finalize()
    }
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```
/// use hidflash::{AddressUnit, SettingsBuilder};
///
/// let settings = SettingsBuilder::new()
///     .enter_bootloader_report_id(0x01)
///     .address_unit(AddressUnit::Words)
///     .finalize();
/// assert_eq!(settings.wire_format.enter_bootloader_report_id, 0x01);
/// ```
#[derive(Default)]
pub struct SettingsBuilder {
    settings: Settings,
}
impl SettingsBuilder {
    /// Start building the settings using default values for the current
    /// firmware revision.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                vendor_id: VENDOR_ID,
                product_id_app: PRODUCT_ID_APP,
                product_id_bootloader: PRODUCT_ID_BOOTLOADER,
                wire_format: WireFormat::CURRENT,
                settle_delay: Duration::from_secs(1),
                rediscover_attempts: 0,
                rediscover_interval: Duration::from_millis(500),
                flash_size: Some(FLASH_SIZE_BYTES),
                _private_use_builder: (),
            },
        }
    }

    /// Set the USB vendor ID
    pub fn vendor_id(mut self, vendor_id: u16) -> Self {
        self.settings.vendor_id = vendor_id;
        self
    }

    /// Set the USB product IDs of the application and of the bootloader
    pub fn product_ids(mut self, app: u16, bootloader: u16) -> Self {
        self.settings.product_id_app = app;
        self.settings.product_id_bootloader = bootloader;
        self
    }

    /// Set the whole wire format at once
    pub fn wire_format(mut self, wire_format: WireFormat) -> Self {
        self.settings.wire_format = wire_format;
        self
    }

    /// Set the report ID of the enter-bootloader report
    pub fn enter_bootloader_report_id(mut self, report_id: u8) -> Self {
        self.settings.wire_format.enter_bootloader_report_id = report_id;
        self
    }

    /// Set the unit of page addresses
    pub fn address_unit(mut self, address_unit: AddressUnit) -> Self {
        self.settings.wire_format.address_unit = address_unit;
        self
    }

    /// Set the delay between a mode change request and rediscovery
    pub fn settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settings.settle_delay = settle_delay;
        self
    }

    /// Set how many more times discovery is attempted after a mode change
    pub fn rediscover_attempts(mut self, attempts: usize) -> Self {
        self.settings.rediscover_attempts = attempts;
        self
    }

    /// Set the pause between rediscovery attempts
    pub fn rediscover_interval(mut self, interval: Duration) -> Self {
        self.settings.rediscover_interval = interval;
        self
    }

    /// Set the flash capacity, or `None` to skip the capacity check
    pub fn flash_size(mut self, flash_size: Option<u32>) -> Self {
        self.settings.flash_size = flash_size;
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            vendor_id: 0x03EB,
            product_id_app: 0x2041,
            product_id_bootloader: 0x2067,
            wire_format: WireFormat {
                enter_bootloader_report_id: 0x08,
                address_unit: AddressUnit::Bytes,
            },
            settle_delay: Duration::from_secs(1),
            rediscover_attempts: 0,
            rediscover_interval: Duration::from_millis(500),
            flash_size: Some(8192),
            _private_use_builder: (),
        }
    )
}

#[test]
fn legacy_wire_format() {
    let settings = SettingsBuilder::new()
        .wire_format(WireFormat::LEGACY)
        .finalize();
    assert_eq!(settings.wire_format.enter_bootloader_report_id, 0x01);
    assert_eq!(settings.wire_format.address_unit, AddressUnit::Words);
}

#[test]
fn report_id_and_unit_are_independent() {
    let settings = SettingsBuilder::new()
        .enter_bootloader_report_id(0x01)
        .finalize();
    assert_eq!(settings.wire_format.enter_bootloader_report_id, 0x01);
    assert_eq!(settings.wire_format.address_unit, AddressUnit::Bytes);
}

#[test]
fn settle_delay() {
    let settings = SettingsBuilder::new()
        .settle_delay(Duration::from_millis(250))
        .finalize();
    assert_eq!(settings.settle_delay, Duration::from_millis(250));
}

#[test]
fn rediscovery() {
    let settings = SettingsBuilder::new()
        .rediscover_attempts(9)
        .rediscover_interval(Duration::from_millis(100))
        .finalize();
    assert_eq!(settings.rediscover_attempts, 9);
    assert_eq!(settings.rediscover_interval, Duration::from_millis(100));
}

#[test]
fn recognition_table() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings.recognize(0x03EB, 0x2041),
        Some(DeviceMode::Application)
    );
    assert_eq!(
        settings.recognize(0x03EB, 0x2067),
        Some(DeviceMode::Bootloader)
    );
    assert_eq!(settings.recognize(0x03EB, 0x2042), None);
    assert_eq!(settings.recognize(0x046D, 0x2041), None);
}

#[test]
fn custom_ids() {
    let settings = SettingsBuilder::new()
        .vendor_id(0x1209)
        .product_ids(0x0001, 0x0002)
        .finalize();
    assert_eq!(settings.recognize(0x1209, 0x0002), Some(DeviceMode::Bootloader));
    assert_eq!(settings.recognize(0x03EB, 0x2041), None);
}

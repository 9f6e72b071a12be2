//! Hidflash is a utility to update the firmware of a small USB HID device
//! carrying both an application firmware and a bootloader firmware, such as
//! an ATmega8u2 used as a USB bridge. Only one of the two runs at a time; the
//! device shows up on the bus under a different product ID in each mode.
//!
//! Both firmwares speak plain HID output reports:
//!
//! * the application reboots into the bootloader on a special report,
//! * the bootloader accepts 128-byte flash pages, and reboots into the
//!   application on a special page address.
//!
//! Hidflash finds the device, tells which mode it is in, switches it from one
//! mode to the other and streams a firmware image to the bootloader.
//!
//! The mode switch is the delicate part: the device drops off the bus as soon
//! as it accepted the request, and comes back as a new device. It is
//! implemented as a state machine in terms of **states** and **transitions**
//! between them with the following characteristics:
//!
//! * Can only be in one state at any time.
//! * Each state can have its own associated data if needed.
//! * Some data is shared between **all** states.
//! * Transitions between states are triggered via typed **events** and follow
//!   defined semantics.
//! * Only explicitly defined transitions are permitted and as many errors as
//!   possible are detected at **compile-time**.
//! * Transitioning from one state to another consumes the original state and
//!   renders it unusable.
//!
//! The implementation of state transitions leverages `rust`'s `From` and `Into`
//! pattern: each `event` type is converted into the `state` it leads to, and
//! only transitions for which the `From` trait is implemented are authorized.
//!
//! The same ownership discipline applies to the device handle. A
//! [`ModeCommunicator`] owns the only open handle, changing mode consumes it,
//! and dropping it closes the handle. A handle of a device that re-enumerated
//! can therefore never be reused.
//!
//! **Example** - Flashing an Intel HEX file:
//! ```no_run
//! use hidflash::{flash_firmware, Device, FlashImage, HidApiTransport, Settings};
//!
//! # fn main() -> hidflash::Result<()> {
//! let image = FlashImage::load("firmware.hex")?;
//! let device = Device::open(HidApiTransport::new()?, Settings::default())?;
//! let device = flash_firmware(device, &image)?;
//! println!("device is in {} mode", device.mode());
//! # Ok(())
//! # }
//! ```

mod communicator;
mod device;
mod discovery;
mod error;
mod flashing;
mod image;
mod mode_switch;
mod report;
mod settings;
mod transport;

pub use communicator::{ApplicationCommunicator, BootloaderCommunicator, ModeCommunicator};
pub use device::{Device, DeviceMode};
pub use discovery::{discover, discover_with_retry};
pub use error::{Error, Result};
pub use flashing::flash_firmware;
pub use image::{FlashImage, Page, ADDRESS_SPACE_END};
pub use report::{
    encode_enter_bootloader, encode_leave_bootloader, encode_page_write, AddressUnit, WireFormat,
    ENTER_BOOTLOADER_REPORT_ID, LEGACY_ENTER_BOOTLOADER_REPORT_ID, PAGE_SIZE,
};
pub use settings::{
    Settings, SettingsBuilder, FLASH_SIZE_BYTES, PRODUCT_ID_APP, PRODUCT_ID_BOOTLOADER, VENDOR_ID,
};
pub use transport::{DeviceEntry, HidApiTransport, HidHandle, HidTransport};

//! Errors reported by device discovery, mode switching and flashing.

use thiserror::Error;

use crate::device::DeviceMode;

/// Errors which can occur while finding, switching or flashing the device.
#[derive(Debug, Error)]
pub enum Error {
    /// No recognized device is connected.
    #[error("could not find the device")]
    DeviceNotFound,

    /// More than one physical device matched the recognition table. The target
    /// is ambiguous and none of them is picked.
    #[error("more than one device found: {paths:?}")]
    AmbiguousDevice { paths: Vec<String> },

    /// The device did not come back after a mode change, or came back in
    /// another mode than requested.
    #[error(
        "device is {} after attempting to switch from {from} to {expected}",
        whereabouts(.found)
    )]
    ModeTransitionFailed {
        from: DeviceMode,
        expected: DeviceMode,
        found: Option<DeviceMode>,
    },

    /// The image start address is not on a flash page boundary.
    #[error("image start address 0x{address:04X} is not page aligned")]
    MisalignedAddress { address: u32 },

    /// An image extends past the flash address space, or a page address does
    /// not fit into the 16 bits of the page-write report.
    #[error("address 0x{address:06X} is out of range")]
    AddressOutOfRange { address: u32 },

    /// The image extends past the end of the application flash.
    #[error("image ends at 0x{end:04X}, beyond the flash capacity of {flash_size} bytes")]
    ImageTooLarge { end: u32, flash_size: u32 },

    /// The image source has a gap or an overlap.
    #[error("source contains non-contiguous data (expected 0x{expected:04X}, found 0x{found:04X})")]
    NonContiguousImage { expected: u32, found: u32 },

    /// The image source contains no data records.
    #[error("source contains no data")]
    EmptyImage,

    /// The image source is not valid Intel HEX.
    #[error("invalid Intel HEX: {0}")]
    InvalidHex(String),

    /// The transport accepted fewer bytes than the report holds.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },

    /// The retry loop around rediscovery failed for another reason than the
    /// device not showing up.
    #[error("internal error while looking for the device: {0}")]
    Retry(String),

    /// An error reported by the HID transport.
    #[error(transparent)]
    Transport(#[from] hidapi::HidError),

    /// An error while reading the image source.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn whereabouts(found: &Option<DeviceMode>) -> String {
    match found {
        Some(mode) => format!("in {} mode", mode),
        None => "gone".to_owned(),
    }
}

/// Shorthand for a Result with the crate's own Error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn transition_failure_names_all_modes() {
    let err = Error::ModeTransitionFailed {
        from: DeviceMode::Application,
        expected: DeviceMode::Bootloader,
        found: Some(DeviceMode::Application),
    };
    assert_eq!(
        err.to_string(),
        "device is in app mode after attempting to switch from app to bootloader"
    );
}

#[test]
fn transition_failure_without_device() {
    let err = Error::ModeTransitionFailed {
        from: DeviceMode::Bootloader,
        expected: DeviceMode::Application,
        found: None,
    };
    assert_eq!(
        err.to_string(),
        "device is gone after attempting to switch from bootloader to app"
    );
}

#[test]
fn misaligned_address_is_hex() {
    let err = Error::MisalignedAddress { address: 0x1801 };
    assert_eq!(err.to_string(), "image start address 0x1801 is not page aligned");
}

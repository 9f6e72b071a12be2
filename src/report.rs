//! HID report layouts understood by the application and the bootloader
//! firmware.
//!
//! All reports are plain byte vectors ready to be handed to
//! [`HidHandle::write`](crate::transport::HidHandle::write); the first byte is
//! always the report ID.
//!
//! ```text
//!  enter bootloader   [report_id][0x42]
//!  leave bootloader   [0x00][0xFF][0xFF]
//!  page write         [0x00][addr_lo][addr_hi][PAGE_SIZE bytes of payload]
//! ```
//!
//! Two details changed between firmware revisions: the report ID of the
//! enter-bootloader report and the unit of the page address. Both are captured
//! in a [`WireFormat`].

use std::convert::TryFrom;

use crate::error::{Error, Result};

/// Flash page size of the target microcontroller in bytes.
///
/// ATmega8u2 has 128-bytes pages. See `SPM_PAGESIZE` in `iom8u2.h`.
pub const PAGE_SIZE: usize = 128;

/// Length of a page-write report: report ID, 16-bit address and the payload.
pub const PAGE_WRITE_REPORT_LEN: usize = 1 + 2 + PAGE_SIZE;

/// Report ID used by the current application firmware for the device control
/// report.
pub const ENTER_BOOTLOADER_REPORT_ID: u8 = 0x08;

/// Report ID used by early application firmware revisions.
pub const LEGACY_ENTER_BOOTLOADER_REPORT_ID: u8 = 0x01;

/// Device control command asking the application to reboot into the
/// bootloader.
const ENTER_BOOTLOADER_COMMAND: u8 = 0x42;

/// Page address the bootloader interprets as "start the application".
const START_APPLICATION_ADDRESS: u16 = 0xFFFF;

/// Unit of the address field in a page-write report.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AddressUnit {
    /// Raw byte offset into the flash.
    Bytes,
    /// Byte offset divided by two (16-bit flash words).
    Words,
}

impl AddressUnit {
    /// Converts a flash byte address to the value sent in the report.
    pub fn encode(self, byte_address: u32) -> Result<u16> {
        let value = match self {
            AddressUnit::Bytes => byte_address,
            AddressUnit::Words => byte_address / 2,
        };
        u16::try_from(value).map_err(|_| Error::AddressOutOfRange {
            address: byte_address,
        })
    }
}

impl std::str::FromStr for AddressUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "bytes" => Ok(AddressUnit::Bytes),
            "words" => Ok(AddressUnit::Words),
            _ => Err(format!("unknown address unit `{}`", s)),
        }
    }
}

/// The firmware-revision specific parts of the wire protocol.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WireFormat {
    /// Report ID of the enter-bootloader report.
    pub enter_bootloader_report_id: u8,
    /// Unit of the page address in page-write reports.
    pub address_unit: AddressUnit,
}

impl WireFormat {
    /// The current firmware: device control report 8, byte addresses.
    pub const CURRENT: WireFormat = WireFormat {
        enter_bootloader_report_id: ENTER_BOOTLOADER_REPORT_ID,
        address_unit: AddressUnit::Bytes,
    };

    /// Early firmware: first report ID, word addresses.
    pub const LEGACY: WireFormat = WireFormat {
        enter_bootloader_report_id: LEGACY_ENTER_BOOTLOADER_REPORT_ID,
        address_unit: AddressUnit::Words,
    };
}

impl Default for WireFormat {
    fn default() -> Self {
        WireFormat::CURRENT
    }
}

/// Report instructing the application to reboot into the bootloader.
pub fn encode_enter_bootloader(report_id: u8) -> Vec<u8> {
    vec![report_id, ENTER_BOOTLOADER_COMMAND]
}

/// Report instructing the bootloader to jump to the application.
pub fn encode_leave_bootloader() -> Vec<u8> {
    let mut report = vec![0x00];
    report.extend_from_slice(&START_APPLICATION_ADDRESS.to_le_bytes());
    report
}

/// Report writing one flash page. `page_address` is already encoded in the
/// unit of the target firmware.
pub fn encode_page_write(page_address: u16, page: &[u8; PAGE_SIZE]) -> Vec<u8> {
    let mut report = Vec::with_capacity(PAGE_WRITE_REPORT_LEN);
    report.push(0x00);
    report.extend_from_slice(&page_address.to_le_bytes());
    report.extend_from_slice(page);
    report
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn enter_bootloader_layout() {
    assert_eq!(encode_enter_bootloader(0x08), [0x08, 0x42]);
    assert_eq!(
        encode_enter_bootloader(LEGACY_ENTER_BOOTLOADER_REPORT_ID),
        [0x01, 0x42]
    );
}

#[test]
fn leave_bootloader_layout() {
    assert_eq!(encode_leave_bootloader(), [0x00, 0xFF, 0xFF]);
}

#[test]
fn page_write_layout() {
    let mut page = [0u8; PAGE_SIZE];
    page.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);

    let report = encode_page_write(0x1880, &page);
    assert_eq!(report.len(), PAGE_WRITE_REPORT_LEN);
    assert_eq!(&report[..3], &[0x00, 0x80, 0x18]);
    assert_eq!(&report[3..], &page[..]);
}

#[test]
fn address_units() {
    assert_eq!(AddressUnit::Bytes.encode(0x1800).unwrap(), 0x1800);
    assert_eq!(AddressUnit::Words.encode(0x1800).unwrap(), 0x0C00);
    assert_eq!(AddressUnit::Words.encode(0x1_FF80).unwrap(), 0xFFC0);
}

#[test]
fn address_out_of_range() {
    assert!(matches!(
        AddressUnit::Bytes.encode(0x1_0000),
        Err(Error::AddressOutOfRange { address: 0x1_0000 })
    ));
}

#[test]
fn default_wire_format_is_current() {
    assert_eq!(WireFormat::default(), WireFormat::CURRENT);
    assert_eq!("words".parse::<AddressUnit>(), Ok(AddressUnit::Words));
    assert!("pages".parse::<AddressUnit>().is_err());
}

//! Mode-specific communication with the device.
//!
//! The device speaks a different protocol in each [`DeviceMode`]. A
//! communicator owns the open handle of a device known to be in one mode and
//! implements that mode's protocol. The mode is not state of the communicator
//! but of the firmware it talks to, and is constant for the communicator's
//! lifetime: changing mode consumes the communicator.

use std::fmt;

use hexplay::HexViewBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, log_enabled, trace, Level::Trace};

use crate::device::DeviceMode;
use crate::error::{Error, Result};
use crate::image::FlashImage;
use crate::report::{self, AddressUnit, WireFormat, PAGE_SIZE};
use crate::transport::HidHandle;

// =============================================================================
// Public Interface
// =============================================================================

/// A communicator for whichever mode the device is currently in.
pub enum ModeCommunicator {
    Application(ApplicationCommunicator),
    Bootloader(BootloaderCommunicator),
}

impl ModeCommunicator {
    /// Wraps an open handle of a device in `mode`.
    pub(crate) fn new(mode: DeviceMode, dev: Box<dyn HidHandle>, wire_format: WireFormat) -> Self {
        match mode {
            DeviceMode::Application => ModeCommunicator::Application(ApplicationCommunicator {
                dev,
                report_id: wire_format.enter_bootloader_report_id,
            }),
            DeviceMode::Bootloader => ModeCommunicator::Bootloader(BootloaderCommunicator {
                dev,
                address_unit: wire_format.address_unit,
            }),
        }
    }

    pub fn mode(&self) -> DeviceMode {
        match self {
            ModeCommunicator::Application(_) => ApplicationCommunicator::MODE,
            ModeCommunicator::Bootloader(_) => BootloaderCommunicator::MODE,
        }
    }

    /// Requests the device to reboot into `target`.
    ///
    /// Returns the communicator for the new mode when the same connection
    /// stays usable, or `None` when the device drops off the bus and has to be
    /// found again. The current protocol always re-enumerates.
    ///
    /// The handle is closed when this returns, whether the request could be
    /// written or not.
    ///
    /// # Panics
    ///
    /// If `target` is the communicator's own mode.
    pub fn request_mode_change(self, target: DeviceMode) -> Result<Option<ModeCommunicator>> {
        match self {
            ModeCommunicator::Application(comm) => comm.request_mode_change(target),
            ModeCommunicator::Bootloader(comm) => comm.request_mode_change(target),
        }
    }
}

impl fmt::Debug for ModeCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeCommunicator::Application(comm) => fmt::Debug::fmt(comm, f),
            ModeCommunicator::Bootloader(comm) => fmt::Debug::fmt(comm, f),
        }
    }
}

// Application =================================================================

/// Communicator for the application firmware.
pub struct ApplicationCommunicator {
    dev: Box<dyn HidHandle>,
    report_id: u8,
}

impl ApplicationCommunicator {
    pub const MODE: DeviceMode = DeviceMode::Application;

    /// The application only knows how to reboot into the bootloader.
    pub fn request_mode_change(self, target: DeviceMode) -> Result<Option<ModeCommunicator>> {
        assert_eq!(
            target,
            DeviceMode::Bootloader,
            "the application can only switch to the bootloader"
        );
        let mut dev = self.dev;
        write_report(dev.as_mut(), &report::encode_enter_bootloader(self.report_id))?;
        // the device re-enumerates and has to be found again
        Ok(None)
    }
}

impl fmt::Debug for ApplicationCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationCommunicator")
            .field("report_id", &self.report_id)
            .finish()
    }
}

// Bootloader ==================================================================

/// Communicator for the bootloader firmware.
pub struct BootloaderCommunicator {
    dev: Box<dyn HidHandle>,
    address_unit: AddressUnit,
}

impl BootloaderCommunicator {
    pub const MODE: DeviceMode = DeviceMode::Bootloader;

    /// The bootloader leaves by jumping to the application.
    pub fn request_mode_change(self, target: DeviceMode) -> Result<Option<ModeCommunicator>> {
        assert_eq!(
            target,
            DeviceMode::Application,
            "the bootloader can only switch to the application"
        );
        let mut dev = self.dev;
        write_report(dev.as_mut(), &report::encode_leave_bootloader())?;
        Ok(None)
    }

    /// Writes `image` to flash, page by page in ascending address order, and
    /// returns the number of pages written.
    ///
    /// The start address must be page aligned; a trailing partial page is
    /// padded with zeros. Nothing is written when the image is rejected.
    ///
    /// The device stays in the bootloader afterwards.
    pub fn flash(&mut self, image: &FlashImage) -> Result<usize> {
        if image.start_address() % PAGE_SIZE as u32 != 0 {
            return Err(Error::MisalignedAddress {
                address: image.start_address(),
            });
        }

        // Encode all addresses up-front so that an out of range image is
        // rejected before the first page is touched.
        let pages = image
            .pages()
            .map(|page| {
                self.address_unit
                    .encode(page.address)
                    .map(|address| (address, page))
            })
            .collect::<Result<Vec<_>>>()?;
        info!(
            "Flashing {} pages at 0x{:04X} ({:?} addressing)",
            pages.len(),
            image.start_address(),
            self.address_unit
        );

        let pb = ProgressBar::new(pages.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "[HF] ⏩ Flashing [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages",
                )
                .progress_chars("=>-"),
        );

        for (address, page) in &pages {
            debug!("Page 0x{:04X} -> address field 0x{:04X}", page.address, address);
            let report = report::encode_page_write(*address, &page.data);
            if let Err(err) = write_report(self.dev.as_mut(), &report) {
                pb.abandon();
                return Err(err);
            }
            pb.inc(1);
        }
        pb.finish_with_message("[HF] Flashing completed");

        Ok(pages.len())
    }
}

impl fmt::Debug for BootloaderCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootloaderCommunicator")
            .field("address_unit", &self.address_unit)
            .finish()
    }
}

// =============================================================================
// Private stuff
// =============================================================================

fn write_report(dev: &mut dyn HidHandle, report: &[u8]) -> Result<()> {
    // Dump the report in a hex table for debugging
    if log_enabled!(Trace) {
        let view = HexViewBuilder::new(report)
            .address_offset(0)
            .row_width(16)
            .finish();
        trace!("Writing report:\n{}", view);
    }

    let written = dev.write(report)?;
    if written < report.len() {
        return Err(Error::ShortWrite {
            expected: report.len(),
            written,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
use crate::transport::mock::MockBus;

#[cfg(test)]
fn bootloader_on(bus: &MockBus, address_unit: AddressUnit) -> BootloaderCommunicator {
    BootloaderCommunicator {
        dev: bus.handle("boot"),
        address_unit,
    }
}

#[test]
fn flash_single_page() {
    let bus = MockBus::default();
    let mut comm = bootloader_on(&bus, AddressUnit::Bytes);

    let bytes: Vec<u8> = (0..128).collect();
    let pages = comm.flash(&FlashImage::new(0x1800, bytes.clone()).unwrap()).unwrap();

    assert_eq!(pages, 1);
    let mut expected = vec![0x00, 0x00, 0x18];
    expected.extend_from_slice(&bytes);
    assert_eq!(bus.writes(), vec![expected]);
}

#[test]
fn flash_single_page_word_addressing() {
    let bus = MockBus::default();
    let mut comm = bootloader_on(&bus, AddressUnit::Words);

    let bytes: Vec<u8> = (0..128).collect();
    comm.flash(&FlashImage::new(0x1800, bytes).unwrap()).unwrap();

    assert_eq!(&bus.writes()[0][..3], &[0x00, 0x00, 0x0C]);
}

#[test]
fn flash_two_pages() {
    let bus = MockBus::default();
    let mut comm = bootloader_on(&bus, AddressUnit::Bytes);

    let bytes: Vec<u8> = (0..=255).collect();
    assert_eq!(comm.flash(&FlashImage::new(0x1800, bytes.clone()).unwrap()).unwrap(), 2);

    let writes = bus.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(&writes[0][..3], &[0x00, 0x00, 0x18]);
    assert_eq!(&writes[0][3..], &bytes[..128]);
    assert_eq!(&writes[1][..3], &[0x00, 0x80, 0x18]);
    assert_eq!(&writes[1][3..], &bytes[128..]);
}

#[test]
fn flash_pads_last_page() {
    let bus = MockBus::default();
    let mut comm = bootloader_on(&bus, AddressUnit::Bytes);

    let bytes = vec![0xAAu8; 300];
    assert_eq!(comm.flash(&FlashImage::new(0x0000, bytes).unwrap()).unwrap(), 3);

    let writes = bus.writes();
    assert!(writes.iter().all(|w| w.len() == report::PAGE_WRITE_REPORT_LEN));
    let last = &writes[2][3..];
    assert!(last[..300 - 256].iter().all(|b| *b == 0xAA));
    assert!(last[300 - 256..].iter().all(|b| *b == 0x00));
}

#[test]
fn flash_exact_multiple_has_no_padding() {
    let bus = MockBus::default();
    let mut comm = bootloader_on(&bus, AddressUnit::Bytes);

    let bytes: Vec<u8> = (0..4 * 128).map(|i| (i % 251) as u8).collect();
    comm.flash(&FlashImage::new(0x0400, bytes.clone()).unwrap()).unwrap();

    let payload: Vec<u8> = bus.writes().iter().flat_map(|w| w[3..].to_vec()).collect();
    assert_eq!(payload, bytes);
}

#[test]
fn flash_payload_is_padded_image_for_any_length() {
    for &start in &[0x0000u32, 0x1800] {
        for len in 0..=3 * PAGE_SIZE + 1 {
            let bus = MockBus::default();
            let mut comm = bootloader_on(&bus, AddressUnit::Bytes);
            let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8 + 1).collect();

            let pages = comm
                .flash(&FlashImage::new(start, bytes.clone()).unwrap())
                .unwrap();

            let writes = bus.writes();
            let expected_pages = (len + PAGE_SIZE - 1) / PAGE_SIZE;
            assert_eq!(pages, expected_pages, "len {}", len);
            assert_eq!(writes.len(), expected_pages, "len {}", len);

            for (index, write) in writes.iter().enumerate() {
                let address = start + (index * PAGE_SIZE) as u32;
                assert_eq!(write.len(), report::PAGE_WRITE_REPORT_LEN);
                assert_eq!(u32::from(u16::from_le_bytes([write[1], write[2]])), address);
            }

            let mut expected = bytes;
            expected.resize(expected_pages * PAGE_SIZE, 0x00);
            let payload: Vec<u8> = writes.iter().flat_map(|w| w[3..].to_vec()).collect();
            assert_eq!(payload, expected, "len {}", len);
        }
    }
}

#[test]
fn flash_addresses_strictly_ascending() {
    let bus = MockBus::default();
    let mut comm = bootloader_on(&bus, AddressUnit::Bytes);

    comm.flash(&FlashImage::new(0x0080, vec![1; 1000]).unwrap()).unwrap();

    let addresses: Vec<u16> = bus
        .writes()
        .iter()
        .map(|w| u16::from_le_bytes([w[1], w[2]]))
        .collect();
    assert_eq!(addresses.len(), 8);
    assert!(addresses.windows(2).all(|w| w[1] == w[0] + 128));
    assert_eq!(addresses[0], 0x0080);
}

#[test]
fn flash_misaligned_writes_nothing() {
    let bus = MockBus::default();
    let mut comm = bootloader_on(&bus, AddressUnit::Bytes);

    let result = comm.flash(&FlashImage::new(0x1801, vec![0; 128]).unwrap());

    assert!(matches!(result, Err(Error::MisalignedAddress { address: 0x1801 })));
    assert!(bus.writes().is_empty());
}

#[test]
fn flash_out_of_range_writes_nothing() {
    let bus = MockBus::default();
    let mut comm = bootloader_on(&bus, AddressUnit::Bytes);

    let result = comm.flash(&FlashImage::new(0xFF80, vec![0; 256]).unwrap());

    assert!(matches!(result, Err(Error::AddressOutOfRange { address: 0x1_0000 })));
    assert!(bus.writes().is_empty());
}

#[test]
fn flash_short_write() {
    let bus = MockBus::default();
    bus.accept_only(64);
    let mut comm = bootloader_on(&bus, AddressUnit::Bytes);

    let result = comm.flash(&FlashImage::new(0, vec![0; 256]).unwrap());

    assert!(matches!(
        result,
        Err(Error::ShortWrite {
            expected: 131,
            written: 64
        })
    ));
    assert_eq!(bus.writes().len(), 1);
}

#[test]
fn application_requests_bootloader() {
    let bus = MockBus::default();
    let comm = ModeCommunicator::new(
        DeviceMode::Application,
        bus.handle("app"),
        WireFormat::CURRENT,
    );
    assert_eq!(comm.mode(), DeviceMode::Application);

    let next = comm.request_mode_change(DeviceMode::Bootloader).unwrap();

    assert!(next.is_none());
    assert_eq!(bus.writes(), vec![vec![0x08, 0x42]]);
    assert_eq!(bus.open_handles(), 0);
}

#[test]
fn legacy_application_report_id() {
    let bus = MockBus::default();
    let comm = ModeCommunicator::new(DeviceMode::Application, bus.handle("app"), WireFormat::LEGACY);

    comm.request_mode_change(DeviceMode::Bootloader).unwrap();

    assert_eq!(bus.writes(), vec![vec![0x01, 0x42]]);
}

#[test]
fn bootloader_requests_application() {
    let bus = MockBus::default();
    let comm = ModeCommunicator::new(
        DeviceMode::Bootloader,
        bus.handle("boot"),
        WireFormat::CURRENT,
    );
    assert_eq!(comm.mode(), DeviceMode::Bootloader);

    assert!(comm
        .request_mode_change(DeviceMode::Application)
        .unwrap()
        .is_none());
    assert_eq!(bus.writes(), vec![vec![0x00, 0xFF, 0xFF]]);
    assert_eq!(bus.open_handles(), 0);
}

#[test]
fn handle_closed_when_request_fails() {
    let bus = MockBus::default();
    bus.fail_writes();
    let comm = ModeCommunicator::new(
        DeviceMode::Bootloader,
        bus.handle("boot"),
        WireFormat::CURRENT,
    );

    let result = comm.request_mode_change(DeviceMode::Application);

    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(bus.open_handles(), 0);
}

#[test]
#[should_panic(expected = "can only switch to the bootloader")]
fn request_own_mode_panics() {
    let bus = MockBus::default();
    let comm = ModeCommunicator::new(DeviceMode::Application, bus.handle("app"), WireFormat::CURRENT);
    let _ = comm.request_mode_change(DeviceMode::Application);
}

//! Flashing a firmware image, from whatever mode the device is in.

use log::info;

use crate::device::{Device, DeviceMode};
use crate::error::{Error, Result};
use crate::image::FlashImage;
use crate::transport::HidTransport;

/// Writes `image` to the device and boots it.
///
/// The image is checked against [`Settings::flash_size`](crate::Settings)
/// before the device is touched. Then the device is switched to the
/// bootloader, every page is written and the device is switched back to the
/// application.
///
/// Any failure aborts the whole operation. There is no rollback: a device
/// that failed while flashing is left in the bootloader with a partially
/// written application.
pub fn flash_firmware<T: HidTransport>(device: Device<T>, image: &FlashImage) -> Result<Device<T>> {
    if let Some(flash_size) = device.settings().flash_size {
        if image.end_address() > flash_size {
            return Err(Error::ImageTooLarge {
                end: image.end_address(),
                flash_size,
            });
        }
    }

    info!("Flashing {}", image);
    let mut device = device.set_mode(DeviceMode::Bootloader)?;

    let mode = device.mode();
    let pages = device
        .bootloader_mut()
        .ok_or(Error::ModeTransitionFailed {
            from: mode,
            expected: DeviceMode::Bootloader,
            found: Some(mode),
        })?
        .flash(image)?;
    info!("{} pages written", pages);

    device.set_mode(DeviceMode::Application)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
use crate::settings::{Settings, SettingsBuilder};

#[cfg(test)]
use crate::transport::mock::{self, MockBus};

#[cfg(test)]
fn quick_settings() -> Settings {
    SettingsBuilder::new()
        .settle_delay(std::time::Duration::from_millis(0))
        .finalize()
}

#[test]
fn flash_from_application() {
    let bus = MockBus::new(vec![
        vec![mock::app("app-1")],
        vec![mock::bootloader("boot")],
        vec![mock::app("app-2")],
    ]);
    let device = Device::open(bus.transport(), quick_settings()).unwrap();
    let image = FlashImage::new(0x0100, vec![0xAA; 200]).unwrap();

    let device = flash_firmware(device, &image).unwrap();

    assert_eq!(device.mode(), DeviceMode::Application);
    assert_eq!(bus.writes_to("app-1"), vec![vec![0x08, 0x42]]);

    let boot_writes = bus.writes_to("boot");
    assert_eq!(boot_writes.len(), 3);
    assert_eq!(&boot_writes[0][..3], &[0x00, 0x00, 0x01]);
    assert_eq!(&boot_writes[1][..3], &[0x00, 0x80, 0x01]);
    assert_eq!(boot_writes[1][3 + 71], 0xAA);
    assert!(boot_writes[1][3 + 72..].iter().all(|b| *b == 0));
    assert_eq!(boot_writes[2], vec![0x00, 0xFF, 0xFF]);

    assert!(bus.writes_to("app-2").is_empty());
    assert_eq!(bus.opened(), vec!["app-1", "boot", "app-2"]);
    assert_eq!(bus.max_open_handles(), 1);
}

#[test]
fn flash_from_bootloader() {
    let bus = MockBus::new(vec![vec![mock::bootloader("boot")], vec![mock::app("app")]]);
    let device = Device::open(bus.transport(), quick_settings()).unwrap();
    let image = FlashImage::new(0x0000, vec![0x11; 128]).unwrap();

    let device = flash_firmware(device, &image).unwrap();

    assert_eq!(device.mode(), DeviceMode::Application);
    assert_eq!(bus.writes().len(), 2);
    assert_eq!(bus.writes()[1], vec![0x00, 0xFF, 0xFF]);
}

#[test]
fn misaligned_image_stays_in_bootloader() {
    let bus = MockBus::new(vec![vec![mock::app("app")], vec![mock::bootloader("boot")]]);
    let device = Device::open(bus.transport(), quick_settings()).unwrap();
    let image = FlashImage::new(0x0010, vec![0x11; 16]).unwrap();

    let result = flash_firmware(device, &image);

    assert!(matches!(
        result,
        Err(Error::MisalignedAddress { address: 0x0010 })
    ));
    assert!(bus.writes_to("boot").is_empty());
    assert_eq!(bus.open_handles(), 0);
}

#[test]
fn too_large_image_leaves_device_alone() {
    let bus = MockBus::new(vec![vec![mock::app("app")]]);
    let device = Device::open(bus.transport(), quick_settings()).unwrap();
    let image = FlashImage::new(0x1F80, vec![0x11; 256]).unwrap();

    let result = flash_firmware(device, &image);

    assert!(matches!(
        result,
        Err(Error::ImageTooLarge {
            end: 0x2080,
            flash_size: 8192
        })
    ));
    assert!(bus.writes().is_empty());
    assert_eq!(bus.scan_count(), 1);
}

#[test]
fn no_flash_size_check_when_unset() {
    let bus = MockBus::new(vec![vec![mock::bootloader("boot")], vec![mock::app("app")]]);
    let settings = SettingsBuilder::new()
        .settle_delay(std::time::Duration::from_millis(0))
        .flash_size(None)
        .finalize();
    let device = Device::open(bus.transport(), settings).unwrap();
    let image = FlashImage::new(0x2000, vec![0x11; 128]).unwrap();

    flash_firmware(device, &image).unwrap();

    assert_eq!(&bus.writes()[0][..3], &[0x00, 0x00, 0x20]);
}

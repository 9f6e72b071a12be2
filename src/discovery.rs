//! Finding the device among the HID devices connected to the host.
//!
//! Unrelated HID devices are silently skipped. The same physical device may
//! show up several times (macOS lists one entry per usage page), so entries
//! are de-duplicated by vendor ID, product ID and path before counting. Only
//! one such device is supported at a time: finding more is an error rather
//! than a guess.

use log::{debug, info, trace, warn};

use crate::communicator::ModeCommunicator;
use crate::device::DeviceMode;
use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::transport::{DeviceEntry, HidTransport};

/// Scans the bus once and opens the device, if exactly one is connected.
pub fn discover<T: HidTransport>(
    transport: &mut T,
    settings: &Settings,
) -> Result<Option<ModeCommunicator>> {
    let mut matching: Vec<(DeviceMode, DeviceEntry)> = Vec::new();
    for entry in transport.enumerate()? {
        let mode = match settings.recognize(entry.vendor_id, entry.product_id) {
            Some(mode) => mode,
            None => continue,
        };
        if matching.iter().any(|(_, known)| *known == entry) {
            trace!("Skipping duplicate entry {:?}", entry.path);
            continue;
        }
        debug!("Found {} at {:?}", mode, entry.path);
        matching.push((mode, entry));
    }

    if matching.len() > 1 {
        // this is not supported since only one such physical device exists in
        // the first place
        return Err(Error::AmbiguousDevice {
            paths: matching
                .iter()
                .map(|(_, entry)| entry.path.to_string_lossy().into_owned())
                .collect(),
        });
    }

    match matching.pop() {
        Some((mode, entry)) => {
            let dev = transport.open(&entry.path)?;
            Ok(Some(ModeCommunicator::new(mode, dev, settings.wire_format)))
        }
        None => Ok(None),
    }
}

/// [`discover`], scanning again up to [`Settings::rediscover_attempts`] times
/// while nothing is found.
///
/// Used after a mode change, when the device may still be re-enumerating.
/// Errors other than "not found" end the search immediately.
pub fn discover_with_retry<T: HidTransport>(
    transport: &mut T,
    settings: &Settings,
) -> Result<Option<ModeCommunicator>> {
    use retry::{delay, retry_with_index, OperationResult};

    if settings.rediscover_attempts == 0 {
        return discover(transport, settings);
    }

    let interval = settings.rediscover_interval.as_millis() as u64;
    let result = retry_with_index(
        delay::Fixed::from_millis(interval).take(settings.rediscover_attempts),
        |index| {
            debug!("Looking for the device ({})", index);
            match discover(transport, settings) {
                Ok(Some(communicator)) => OperationResult::Ok(communicator),
                Ok(None) => OperationResult::Retry(None),
                Err(err) => OperationResult::Err(Some(err)),
            }
        },
    );

    retry_outcome(result)
}

// =============================================================================
// Private stuff
// =============================================================================

/// Maps the result of the retry loop back: running out of attempts is "not
/// found", any other failure is an error.
fn retry_outcome(
    result: std::result::Result<ModeCommunicator, retry::Error<Option<Error>>>,
) -> Result<Option<ModeCommunicator>> {
    match result {
        Ok(communicator) => Ok(Some(communicator)),
        Err(retry::Error::Operation {
            error: Some(err), ..
        }) => Err(err),
        Err(retry::Error::Operation {
            error: None,
            total_delay,
            tries,
        }) => {
            info!(
                "Device not found after {:?} and {} tries",
                total_delay, tries
            );
            Ok(None)
        }
        Err(retry::Error::Internal(reason)) => {
            warn!("Internal retry error while looking for the device: {}", reason);
            Err(Error::Retry(reason))
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
use crate::transport::mock::{self, MockBus};

#[test]
fn unrelated_devices_are_ignored() {
    let bus = MockBus::new(vec![vec![
        mock::entry(0x046D, 0xC52B, "receiver"),
        mock::entry(0x03EB, 0x2FF4, "other-atmel"),
    ]]);

    let found = discover(&mut bus.transport(), &Settings::default()).unwrap();

    assert!(found.is_none());
    assert!(bus.opened().is_empty());
}

#[test]
fn single_application() {
    let bus = MockBus::new(vec![vec![
        mock::entry(0x046D, 0xC52B, "receiver"),
        mock::app("app-path"),
    ]]);

    let found = discover(&mut bus.transport(), &Settings::default()).unwrap();

    assert_eq!(found.unwrap().mode(), DeviceMode::Application);
    assert_eq!(bus.opened(), vec!["app-path"]);
}

#[test]
fn single_bootloader() {
    let bus = MockBus::new(vec![vec![mock::bootloader("boot-path")]]);

    let found = discover(&mut bus.transport(), &Settings::default()).unwrap();

    assert_eq!(found.unwrap().mode(), DeviceMode::Bootloader);
}

#[test]
fn duplicate_entries_are_one_device() {
    let bus = MockBus::new(vec![vec![
        mock::app("app-path"),
        mock::entry(0x046D, 0xC52B, "receiver"),
        mock::app("app-path"),
    ]]);

    let found = discover(&mut bus.transport(), &Settings::default()).unwrap();

    assert_eq!(found.unwrap().mode(), DeviceMode::Application);
    assert_eq!(bus.opened(), vec!["app-path"]);
}

#[test]
fn two_devices_are_ambiguous() {
    let bus = MockBus::new(vec![vec![mock::app("app-1"), mock::app("app-2")]]);

    let result = discover(&mut bus.transport(), &Settings::default());

    match result {
        Err(Error::AmbiguousDevice { paths }) => assert_eq!(paths, vec!["app-1", "app-2"]),
        other => panic!("unexpected {:?}", other),
    }
    assert!(bus.opened().is_empty());
}

#[test]
fn devices_in_both_modes_are_ambiguous() {
    let bus = MockBus::new(vec![vec![
        mock::app("app-path"),
        mock::bootloader("boot-path"),
    ]]);

    assert!(matches!(
        discover(&mut bus.transport(), &Settings::default()),
        Err(Error::AmbiguousDevice { .. })
    ));
}

#[test]
fn retry_disabled_scans_once() {
    let bus = MockBus::new(vec![vec![], vec![mock::app("app-path")]]);

    let found = discover_with_retry(&mut bus.transport(), &Settings::default()).unwrap();

    assert!(found.is_none());
    assert_eq!(bus.scan_count(), 1);
}

#[test]
fn retry_does_not_hide_ambiguity() {
    let bus = MockBus::new(vec![vec![mock::app("app-1"), mock::app("app-2")]]);
    let settings = crate::settings::SettingsBuilder::new()
        .rediscover_attempts(5)
        .rediscover_interval(std::time::Duration::from_millis(0))
        .finalize();

    let result = discover_with_retry(&mut bus.transport(), &settings);

    assert!(matches!(result, Err(Error::AmbiguousDevice { .. })));
    assert_eq!(bus.scan_count(), 1);
}

#[test]
fn internal_retry_error_is_not_a_missing_device() {
    let result = retry_outcome(Err(retry::Error::Internal("delay overflow".into())));

    match result {
        Err(Error::Retry(reason)) => assert_eq!(reason, "delay overflow"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn exhausted_retries_are_a_missing_device() {
    let result = retry_outcome(Err(retry::Error::Operation {
        error: None,
        total_delay: std::time::Duration::from_millis(0),
        tries: 3,
    }));

    assert!(matches!(result, Ok(None)));
}

//! The HID transport consumed by discovery and the communicators.
//!
//! The traits keep the protocol code independent from the platform HID
//! library: [`HidApiTransport`] is the production implementation on top of
//! `hidapi`, tests use an in-memory bus instead.
//!
//! A [`HidHandle`] is closed when it is dropped. There is no explicit `close`,
//! so a superseded handle can not be written to by construction.

use std::ffi::{CStr, CString};

use crate::error::Result;

mod hid;
#[cfg(test)]
pub(crate) mod mock;

pub use hid::HidApiTransport;

/// One enumerated HID endpoint.
///
/// Some operating systems list several endpoints (one per usage page) for a
/// single physical device; they share the same `path`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct DeviceEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub path: CString,
}

/// Blocking access to the HID devices connected to the host.
pub trait HidTransport {
    /// Scans the bus and returns every HID endpoint currently connected. Each
    /// call reflects the bus at the time of the call, so it picks up devices
    /// that re-enumerated since the previous call.
    fn enumerate(&mut self) -> Result<Vec<DeviceEntry>>;

    /// Opens the device at `path`.
    fn open(&mut self, path: &CStr) -> Result<Box<dyn HidHandle>>;
}

/// An open HID device. Dropping the handle closes it.
pub trait HidHandle {
    /// Writes one output report (first byte is the report ID) and returns the
    /// number of bytes the transport accepted.
    fn write(&mut self, report: &[u8]) -> Result<usize>;
}

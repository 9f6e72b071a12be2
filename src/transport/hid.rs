//! [`HidTransport`] on top of `hidapi`.

use std::ffi::CStr;

use hidapi::{HidApi, HidDevice};
use log::{debug, trace};

use super::{DeviceEntry, HidHandle, HidTransport};
use crate::error::Result;

/// The platform HID library.
pub struct HidApiTransport {
    api: HidApi,
    // The device list is fresh right after `HidApi::new()`; every later scan
    // has to refresh it first.
    stale: bool,
}

impl HidApiTransport {
    pub fn new() -> Result<Self> {
        Ok(HidApiTransport {
            api: HidApi::new()?,
            stale: false,
        })
    }
}

impl HidTransport for HidApiTransport {
    fn enumerate(&mut self) -> Result<Vec<DeviceEntry>> {
        if self.stale {
            trace!("Refreshing HID device list");
            self.api.refresh_devices()?;
        }
        self.stale = true;

        Ok(self
            .api
            .device_list()
            .map(|info| DeviceEntry {
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                path: info.path().to_owned(),
            })
            .collect())
    }

    fn open(&mut self, path: &CStr) -> Result<Box<dyn HidHandle>> {
        debug!("Opening {:?}", path);
        let device = self.api.open_path(path)?;
        Ok(Box::new(HidApiHandle { device }))
    }
}

struct HidApiHandle {
    device: HidDevice,
}

impl HidHandle for HidApiHandle {
    fn write(&mut self, report: &[u8]) -> Result<usize> {
        Ok(self.device.write(report)?)
    }
}

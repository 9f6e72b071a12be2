//! In-memory HID bus for unit tests.
//!
//! The bus replays scripted enumeration results, one per scan, repeating the
//! last one once the script is exhausted. This is how re-enumeration after a
//! mode change is simulated. Every write and every open/close is recorded.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::{CStr, CString};
use std::rc::Rc;

use super::{DeviceEntry, HidHandle, HidTransport};
use crate::error::{Error, Result};
use crate::settings::{PRODUCT_ID_APP, PRODUCT_ID_BOOTLOADER, VENDOR_ID};

#[derive(Default)]
struct BusState {
    scans: VecDeque<Vec<DeviceEntry>>,
    scan_count: usize,
    writes: Vec<(CString, Vec<u8>)>,
    open_handles: usize,
    max_open_handles: usize,
    opened: Vec<CString>,
    fail_writes: bool,
    accept_bytes: Option<usize>,
}

#[derive(Clone, Default)]
pub(crate) struct MockBus(Rc<RefCell<BusState>>);

impl MockBus {
    pub fn new(scans: Vec<Vec<DeviceEntry>>) -> Self {
        let bus = MockBus::default();
        bus.0.borrow_mut().scans = scans.into();
        bus
    }

    pub fn transport(&self) -> MockTransport {
        MockTransport { bus: self.clone() }
    }

    /// Opens a handle directly, as discovery would have.
    pub fn handle(&self, path: &str) -> Box<dyn HidHandle> {
        let path = CString::new(path).unwrap();
        self.transport().open(&path).unwrap()
    }

    pub fn fail_writes(&self) {
        self.0.borrow_mut().fail_writes = true;
    }

    /// Makes every write report only `n` accepted bytes.
    pub fn accept_only(&self, n: usize) {
        self.0.borrow_mut().accept_bytes = Some(n);
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.0.borrow().writes.iter().map(|(_, w)| w.clone()).collect()
    }

    pub fn writes_to(&self, path: &str) -> Vec<Vec<u8>> {
        self.0
            .borrow()
            .writes
            .iter()
            .filter(|(p, _)| p.to_str() == Ok(path))
            .map(|(_, w)| w.clone())
            .collect()
    }

    pub fn open_handles(&self) -> usize {
        self.0.borrow().open_handles
    }

    pub fn max_open_handles(&self) -> usize {
        self.0.borrow().max_open_handles
    }

    pub fn opened(&self) -> Vec<String> {
        self.0
            .borrow()
            .opened
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    pub fn scan_count(&self) -> usize {
        self.0.borrow().scan_count
    }
}

pub(crate) struct MockTransport {
    bus: MockBus,
}

impl HidTransport for MockTransport {
    fn enumerate(&mut self) -> Result<Vec<DeviceEntry>> {
        let mut state = self.bus.0.borrow_mut();
        state.scan_count += 1;
        let scan = if state.scans.len() > 1 {
            state.scans.pop_front().unwrap_or_default()
        } else {
            state.scans.front().cloned().unwrap_or_default()
        };
        Ok(scan)
    }

    fn open(&mut self, path: &CStr) -> Result<Box<dyn HidHandle>> {
        let mut state = self.bus.0.borrow_mut();
        state.open_handles += 1;
        state.max_open_handles = state.max_open_handles.max(state.open_handles);
        state.opened.push(path.to_owned());
        Ok(Box::new(MockHandle {
            path: path.to_owned(),
            bus: self.bus.clone(),
        }))
    }
}

struct MockHandle {
    path: CString,
    bus: MockBus,
}

impl HidHandle for MockHandle {
    fn write(&mut self, report: &[u8]) -> Result<usize> {
        let mut state = self.bus.0.borrow_mut();
        if state.fail_writes {
            return Err(Error::Transport(hidapi::HidError::HidApiError {
                message: "device disconnected".into(),
            }));
        }
        state.writes.push((self.path.clone(), report.to_vec()));
        Ok(state.accept_bytes.unwrap_or(report.len()))
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.bus.0.borrow_mut().open_handles -= 1;
    }
}

pub(crate) fn entry(vendor_id: u16, product_id: u16, path: &str) -> DeviceEntry {
    DeviceEntry {
        vendor_id,
        product_id,
        path: CString::new(path).unwrap(),
    }
}

pub(crate) fn app(path: &str) -> DeviceEntry {
    entry(VENDOR_ID, PRODUCT_ID_APP, path)
}

pub(crate) fn bootloader(path: &str) -> DeviceEntry {
    entry(VENDOR_ID, PRODUCT_ID_BOOTLOADER, path)
}

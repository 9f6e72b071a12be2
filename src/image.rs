//! Firmware images and their split into flash pages.
//!
//! A [`FlashImage`] is one contiguous run of bytes starting at a flash byte
//! address. Images are usually loaded from Intel HEX files produced by the
//! firmware build; anything with gaps between records is rejected, as the
//! bootloader protocol only knows how to stream a single region.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use ihex::Record;
use log::{debug, trace};

use crate::error::{Error, Result};
use crate::report::PAGE_SIZE;

/// A contiguous binary region to be written to flash.
#[derive(Clone, Eq, PartialEq)]
pub struct FlashImage {
    start_address: u32,
    bytes: Vec<u8>,
}

/// A flash page: the unit written by a single page-write report.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Page {
    /// Byte address of the first byte of the page.
    pub address: u32,
    /// Page content, zero padded if the image ends inside the page.
    pub data: [u8; PAGE_SIZE],
}

/// End of the 24-bit flash address space, exclusive. No image may extend
/// past it.
pub const ADDRESS_SPACE_END: u32 = 0x0100_0000;

impl FlashImage {
    /// An image of `bytes` starting at `start_address`.
    ///
    /// Fails with `AddressOutOfRange` if the image does not fit in the flash
    /// address space.
    pub fn new(start_address: u32, bytes: Vec<u8>) -> Result<Self> {
        end_of(start_address, bytes.len())?;
        Ok(FlashImage {
            start_address,
            bytes,
        })
    }

    /// Reads an Intel HEX file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        debug!("Read {} bytes from {}", text.len(), path.as_ref().display());
        Self::from_ihex(&text)
    }

    /// Parses Intel HEX text into a single contiguous image.
    ///
    /// Extended segment and extended linear address records move the base of
    /// the following data records. Reading stops at the end-of-file record.
    pub fn from_ihex(text: &str) -> Result<Self> {
        let mut base: u32 = 0;
        let mut chunks: BTreeMap<u32, Vec<u8>> = BTreeMap::new();

        for record in ihex::Reader::new(text) {
            let record = record.map_err(|e| Error::InvalidHex(e.to_string()))?;
            trace!("{:?}", record);
            match record {
                Record::Data { offset, value } => {
                    if value.is_empty() {
                        continue;
                    }
                    let address = base + u32::from(offset);
                    end_of(address, value.len())?;
                    if chunks.insert(address, value).is_some() {
                        // the same address written twice
                        return Err(Error::NonContiguousImage {
                            expected: address,
                            found: address,
                        });
                    }
                }
                Record::ExtendedSegmentAddress(segment) => base = u32::from(segment) << 4,
                Record::ExtendedLinearAddress(upper) => base = u32::from(upper) << 16,
                Record::EndOfFile => break,
                Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => {}
            }
        }

        let mut chunks = chunks.into_iter();
        let (start_address, mut bytes) = chunks.next().ok_or(Error::EmptyImage)?;
        for (address, value) in chunks {
            let expected = start_address + bytes.len() as u32;
            if address != expected {
                return Err(Error::NonContiguousImage {
                    expected,
                    found: address,
                });
            }
            bytes.extend(value);
        }

        Self::new(start_address, bytes)
    }

    pub fn start_address(&self) -> u32 {
        self.start_address
    }

    /// Address one past the last byte of the image. Never beyond
    /// [`ADDRESS_SPACE_END`].
    pub fn end_address(&self) -> u32 {
        self.start_address + self.bytes.len() as u32
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of pages the image occupies, counting a trailing partial page.
    pub fn page_count(&self) -> usize {
        (self.bytes.len() + PAGE_SIZE - 1) / PAGE_SIZE
    }

    /// The image split into pages, in ascending address order.
    pub fn pages(&self) -> impl Iterator<Item = Page> + '_ {
        let start_address = self.start_address;
        self.bytes
            .chunks(PAGE_SIZE)
            .enumerate()
            .map(move |(index, chunk)| {
                let mut data = [0u8; PAGE_SIZE];
                data[..chunk.len()].copy_from_slice(chunk);
                Page {
                    address: start_address + (index * PAGE_SIZE) as u32,
                    data,
                }
            })
    }
}

/// Address one past a block of `len` bytes at `address`, if the block fits
/// in the flash address space.
fn end_of(address: u32, len: usize) -> Result<u32> {
    let end = u64::from(address) + len as u64;
    if end > u64::from(ADDRESS_SPACE_END) {
        return Err(Error::AddressOutOfRange { address });
    }
    Ok(end as u32)
}

impl fmt::Display for FlashImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes at 0x{:04X} ({} pages)",
            self.bytes.len(),
            self.start_address,
            self.page_count()
        )
    }
}

impl fmt::Debug for FlashImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashImage")
            .field("start_address", &format_args!("0x{:04X}", self.start_address))
            .field("len", &self.bytes.len())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
fn hex(records: &[Record]) -> String {
    ihex::create_object_file_representation(records).unwrap()
}

#[test]
fn pages_are_padded() {
    let image = FlashImage::new(0x0100, (1..=200).collect()).unwrap();
    let pages: Vec<Page> = image.pages().collect();

    assert_eq!(image.page_count(), 2);
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].address, 0x0100);
    assert_eq!(pages[1].address, 0x0180);
    assert_eq!(pages[0].data[0], 1);
    assert_eq!(pages[1].data[0], 129);
    assert_eq!(pages[1].data[71], 200);
    assert!(pages[1].data[72..].iter().all(|b| *b == 0));
}

#[test]
fn empty_image_has_no_pages() {
    let image = FlashImage::new(0, Vec::new()).unwrap();
    assert!(image.is_empty());
    assert_eq!(image.pages().count(), 0);
}

#[test]
fn contiguous_hex() {
    let text = hex(&[
        Record::Data {
            offset: 0x1800,
            value: vec![1, 2, 3, 4],
        },
        Record::Data {
            offset: 0x1804,
            value: vec![5, 6],
        },
        Record::EndOfFile,
    ]);

    let image = FlashImage::from_ihex(&text).unwrap();
    assert_eq!(image.start_address(), 0x1800);
    assert_eq!(image.bytes(), &[1, 2, 3, 4, 5, 6]);
    assert_eq!(image.end_address(), 0x1806);
}

#[test]
fn records_out_of_order() {
    let text = hex(&[
        Record::Data {
            offset: 0x0010,
            value: vec![3, 4],
        },
        Record::Data {
            offset: 0x000E,
            value: vec![1, 2],
        },
        Record::EndOfFile,
    ]);

    let image = FlashImage::from_ihex(&text).unwrap();
    assert_eq!(image.start_address(), 0x000E);
    assert_eq!(image.bytes(), &[1, 2, 3, 4]);
}

#[test]
fn gap_is_rejected() {
    let text = hex(&[
        Record::Data {
            offset: 0x0000,
            value: vec![1, 2],
        },
        Record::Data {
            offset: 0x0010,
            value: vec![3],
        },
        Record::EndOfFile,
    ]);

    assert!(matches!(
        FlashImage::from_ihex(&text),
        Err(Error::NonContiguousImage {
            expected: 0x0002,
            found: 0x0010
        })
    ));
}

#[test]
fn overlap_is_rejected() {
    let text = hex(&[
        Record::Data {
            offset: 0x0000,
            value: vec![1, 2, 3, 4],
        },
        Record::Data {
            offset: 0x0002,
            value: vec![9],
        },
        Record::EndOfFile,
    ]);

    assert!(matches!(
        FlashImage::from_ihex(&text),
        Err(Error::NonContiguousImage { .. })
    ));
}

#[test]
fn extended_addresses() {
    let segment = hex(&[
        Record::ExtendedSegmentAddress(0x0100),
        Record::Data {
            offset: 0x0000,
            value: vec![0xAB],
        },
        Record::EndOfFile,
    ]);
    assert_eq!(FlashImage::from_ihex(&segment).unwrap().start_address(), 0x1000);

    let linear = hex(&[
        Record::ExtendedLinearAddress(0x0001),
        Record::Data {
            offset: 0x0080,
            value: vec![0xAB],
        },
        Record::EndOfFile,
    ]);
    assert_eq!(FlashImage::from_ihex(&linear).unwrap().start_address(), 0x1_0080);
}

#[test]
fn no_data() {
    let text = hex(&[Record::EndOfFile]);
    assert!(matches!(FlashImage::from_ihex(&text), Err(Error::EmptyImage)));
}

#[test]
fn hex_past_address_space_is_rejected() {
    let text = hex(&[
        Record::ExtendedLinearAddress(0xFFFF),
        Record::Data {
            offset: 0xFF00,
            value: vec![1; 0x80],
        },
        Record::Data {
            offset: 0xFF80,
            value: vec![2; 0x80],
        },
        Record::EndOfFile,
    ]);

    assert!(matches!(
        FlashImage::from_ihex(&text),
        Err(Error::AddressOutOfRange {
            address: 0xFFFF_FF00
        })
    ));
}

#[test]
fn hex_ending_at_address_space_end() {
    let text = hex(&[
        Record::ExtendedLinearAddress(0x00FF),
        Record::Data {
            offset: 0xFF80,
            value: vec![1; 0x80],
        },
        Record::EndOfFile,
    ]);

    let image = FlashImage::from_ihex(&text).unwrap();
    assert_eq!(image.end_address(), ADDRESS_SPACE_END);
    assert_eq!(image.pages().last().unwrap().address, 0x00FF_FF80);
}

#[test]
fn new_rejects_image_wrapping_around() {
    assert!(matches!(
        FlashImage::new(0xFFFF_FF80, vec![0; 256]),
        Err(Error::AddressOutOfRange {
            address: 0xFFFF_FF80
        })
    ));
    assert!(matches!(
        FlashImage::new(0x00FF_FF80, vec![0; 129]),
        Err(Error::AddressOutOfRange { .. })
    ));
}

#[test]
fn not_hex() {
    assert!(matches!(
        FlashImage::from_ihex("this is not a hex file"),
        Err(Error::InvalidHex(_))
    ));
}

#[test]
fn display() {
    let image = FlashImage::new(0x1800, vec![0; 300]).unwrap();
    assert_eq!(image.to_string(), "300 bytes at 0x1800 (3 pages)");
}

//! IPTC-IIM text fields from encoded JPEG and TIFF bytes.
//!
//! Only Record 2 is read, and from it only:
//!
//! | Dataset | Field | Maps to |
//! |---|---|---|
//! | 2:05 | ObjectName | `title` |
//! | 2:25 | Keywords (repeatable) | `keywords` |
//! | 2:120 | Caption-Abstract | `description` |
//!
//! JPEG keeps IIM inside APP13 as Photoshop resource `0x0404`; TIFF keeps it
//! either raw in tag 33723 or as Photoshop resources in tag 34377. Every read
//! is bounds-checked; malformed data yields an empty [`IptcData`].

use super::codec::SourceFormat;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IptcData {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
}

impl IptcData {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.keywords.is_empty()
    }
}

/// IPTC fields from encoded bytes of the given container format.
pub fn read_iptc(bytes: &[u8], format: SourceFormat) -> IptcData {
    let found = match format {
        SourceFormat::Jpeg => jpeg_iim(bytes).map(parse_iim),
        SourceFormat::Tiff => tiff_iptc(bytes),
        _ => None,
    };
    found.unwrap_or_default()
}

const IIM_TAG_MARKER: u8 = 0x1C;
const APPLICATION_RECORD: u8 = 2;

/// Walk IIM datasets: `0x1C, record, dataset, len:u16be, bytes[len]`.
fn parse_iim(data: &[u8]) -> IptcData {
    let mut out = IptcData::default();
    let mut pos = 0;
    while let Some(header) = data.get(pos..pos + 5) {
        if header[0] != IIM_TAG_MARKER {
            pos += 1;
            continue;
        }
        let len = u16::from_be_bytes([header[3], header[4]]) as usize;
        let Some(raw) = data.get(pos + 5..pos + 5 + len) else {
            break;
        };
        pos += 5 + len;
        if header[1] != APPLICATION_RECORD {
            continue;
        }
        let text = String::from_utf8_lossy(raw).trim().to_string();
        if text.is_empty() {
            continue;
        }
        match header[2] {
            5 => out.title = Some(text),
            25 => out.keywords.push(text),
            120 => out.description = Some(text),
            _ => {}
        }
    }
    out
}

const PHOTOSHOP_SIGNATURE: &[u8] = b"Photoshop 3.0\0";
const RESOURCE_SIGNATURE: &[u8] = b"8BIM";
const IIM_RESOURCE: u16 = 0x0404;

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// IIM payload from the first APP13 segment that carries one.
fn jpeg_iim(data: &[u8]) -> Option<&[u8]> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        match marker {
            // fill bytes
            0xFF => {
                pos += 1;
                continue;
            }
            // start of scan: no more metadata segments
            0xDA | 0xD9 => return None,
            0xD0..=0xD7 | 0x01 => {
                pos += 2;
                continue;
            }
            _ => {}
        }
        let len = be_u16(data, pos + 2)? as usize;
        if len < 2 {
            return None;
        }
        let segment = data.get(pos + 4..pos + 2 + len)?;
        if marker == 0xED {
            if let Some(iim) = photoshop_iim(segment) {
                return Some(iim);
            }
        }
        pos += 2 + len;
    }
    None
}

/// IIM bytes from a block of Photoshop image resources.
///
/// Each resource is `8BIM, id:u16, pascal name (padded even), len:u32,
/// data (padded even)`.
fn photoshop_iim(block: &[u8]) -> Option<&[u8]> {
    let data = block.strip_prefix(PHOTOSHOP_SIGNATURE).unwrap_or(block);
    let mut pos = 0;
    while data.get(pos..pos + 4)? == RESOURCE_SIGNATURE {
        let id = be_u16(data, pos + 4)?;
        let name_len = *data.get(pos + 6)? as usize;
        let name_total = (1 + name_len + 1) & !1;
        let len_at = pos + 6 + name_total;
        let len = be_u32(data, len_at)? as usize;
        let body_start = len_at + 4;
        let body = data.get(body_start..body_start.checked_add(len)?)?;
        if id == IIM_RESOURCE {
            return Some(body);
        }
        pos = body_start + len + (len & 1);
    }
    None
}

/// Byte-order aware reader over a TIFF file.
struct Tiff<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> Tiff<'a> {
    fn open(data: &'a [u8]) -> Option<Self> {
        let big_endian = match data.get(0..2)? {
            b"MM" => true,
            b"II" => false,
            _ => return None,
        };
        let tiff = Self { data, big_endian };
        (tiff.u16(2)? == 42).then_some(tiff)
    }

    fn u16(&self, at: usize) -> Option<u16> {
        let b = self.data.get(at..at + 2)?;
        Some(if self.big_endian {
            u16::from_be_bytes([b[0], b[1]])
        } else {
            u16::from_le_bytes([b[0], b[1]])
        })
    }

    fn u32(&self, at: usize) -> Option<u32> {
        let b = self.data.get(at..at + 4)?;
        let b = [b[0], b[1], b[2], b[3]];
        Some(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    /// Bytes of one IFD entry's value. Values of four bytes or fewer live
    /// inline in the entry.
    fn entry_value(&self, entry: usize) -> Option<&'a [u8]> {
        let unit = match self.u16(entry + 2)? {
            3 | 8 => 2,
            4 | 9 | 11 => 4,
            5 | 10 | 12 => 8,
            _ => 1,
        };
        let len = (self.u32(entry + 4)? as usize).checked_mul(unit)?;
        let start = if len <= 4 {
            entry + 8
        } else {
            self.u32(entry + 8)? as usize
        };
        self.data.get(start..start.checked_add(len)?)
    }
}

const TAG_IPTC_NAA: u16 = 33723;
const TAG_PHOTOSHOP: u16 = 34377;
/// Guards against IFD chains that loop back on themselves.
const MAX_IFDS: usize = 16;

fn tiff_iptc(data: &[u8]) -> Option<IptcData> {
    let tiff = Tiff::open(data)?;
    let mut ifd = tiff.u32(4)? as usize;
    for _ in 0..MAX_IFDS {
        if ifd == 0 {
            break;
        }
        let count = tiff.u16(ifd)? as usize;
        for i in 0..count {
            let entry = ifd + 2 + i * 12;
            let iim = match tiff.u16(entry)? {
                TAG_IPTC_NAA => tiff.entry_value(entry),
                TAG_PHOTOSHOP => tiff.entry_value(entry).and_then(photoshop_iim),
                _ => None,
            };
            if let Some(found) = iim.map(parse_iim).filter(|d| !d.is_empty()) {
                return Some(found);
            }
        }
        ifd = tiff.u32(ifd + 2 + count * 12)? as usize;
    }
    None
}

//! Summary Information stream reader
//!
//! The `\x05SummaryInformation` stream is an OLE property set. The fixed
//! property indices of the installer summary are decoded into named
//! fields: Title=2, Subject=3, Author=4, Keywords=5, Comments=6,
//! Template=7, LastSavedBy=8, RevisionNumber=9, LastPrinted=11,
//! CreateTimeDate=12, LastSaveTimeDate=13, PageCount=14, WordCount=15,
//! CharacterCount=16, CreatingApplication=18, Security=19, CodePage=1.

use crate::error::{Result, ToolkitError};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// Stream name inside the compound file
const SUMMARY_STREAM: &str = "\u{5}SummaryInformation";

/// Property-set type tags
const VT_I2: u32 = 2;
const VT_I4: u32 = 3;
const VT_LPSTR: u32 = 30;
const VT_FILETIME: u32 = 64;

/// 100ns intervals between 1601-01-01 and the Unix epoch
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;

/// Decoded summary information
#[derive(Debug, Clone, Default, Serialize)]
pub struct MsiSummary {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub author: Option<String>,
    pub keywords: Option<String>,
    pub comments: Option<String>,
    pub template: Option<String>,
    pub last_saved_by: Option<String>,
    pub revision_number: Option<String>,
    pub last_printed: Option<String>,
    pub create_time_date: Option<String>,
    pub last_save_time_date: Option<String>,
    pub page_count: Option<i32>,
    pub word_count: Option<i32>,
    pub character_count: Option<i32>,
    pub creating_application: Option<String>,
    pub security: Option<i32>,
    pub code_page: Option<i32>,
}

/// One decoded property value
#[derive(Debug, Clone)]
enum PropertyValue {
    Int(i32),
    Text(String),
    Time(String),
}

impl PropertyValue {
    fn into_text(self) -> Option<String> {
        match self {
            PropertyValue::Text(s) => Some(s),
            PropertyValue::Time(s) => Some(s),
            PropertyValue::Int(i) => Some(i.to_string()),
        }
    }

    fn into_int(self) -> Option<i32> {
        match self {
            PropertyValue::Int(i) => Some(i),
            _ => None,
        }
    }
}

/// Read and decode the summary stream of an MSI file
pub fn read_summary(path: &Path) -> Result<MsiSummary> {
    let mut compound = cfb::open(path)?;
    let mut stream = compound.open_stream(SUMMARY_STREAM)?;
    let mut data = Vec::new();
    stream.read_to_end(&mut data)?;
    parse_property_set(&data)
}

/// Decode the property-set bytes into the named summary fields
fn parse_property_set(data: &[u8]) -> Result<MsiSummary> {
    let byte_order = read_u16(data, 0)?;
    if byte_order != 0xFFFE {
        return Err(ToolkitError::Decode(format!(
            "unexpected property set byte order marker {byte_order:#06x}"
        )));
    }
    let set_count = read_u32(data, 24)?;
    if set_count == 0 {
        return Err(ToolkitError::Decode("property set has no sections".to_string()));
    }
    // Header (28 bytes) + first FMTID (16 bytes), then the section offset.
    let section_offset = read_u32(data, 44)? as usize;

    let section_property_count = read_u32(data, section_offset + 4)? as usize;
    let mut offsets = HashMap::new();
    for index in 0..section_property_count {
        let entry = section_offset + 8 + index * 8;
        let property_id = read_u32(data, entry)?;
        let property_offset = read_u32(data, entry + 4)? as usize;
        offsets.insert(property_id, section_offset + property_offset);
    }

    let mut properties: HashMap<u32, PropertyValue> = HashMap::new();
    for (&id, &offset) in &offsets {
        if let Some(value) = parse_property(data, offset)? {
            properties.insert(id, value);
        }
    }

    let mut take_text = |id: u32| properties.remove(&id).and_then(PropertyValue::into_text);
    let title = take_text(2);
    let subject = take_text(3);
    let author = take_text(4);
    let keywords = take_text(5);
    let comments = take_text(6);
    let template = take_text(7);
    let last_saved_by = take_text(8);
    let revision_number = take_text(9);
    let last_printed = take_text(11);
    let create_time_date = take_text(12);
    let last_save_time_date = take_text(13);
    let creating_application = take_text(18);

    let mut take_int = |id: u32| properties.remove(&id).and_then(PropertyValue::into_int);
    Ok(MsiSummary {
        title,
        subject,
        author,
        keywords,
        comments,
        template,
        last_saved_by,
        revision_number,
        last_printed,
        create_time_date,
        last_save_time_date,
        page_count: take_int(14),
        word_count: take_int(15),
        character_count: take_int(16),
        creating_application,
        security: take_int(19),
        code_page: take_int(1),
    })
}

/// Decode one typed property value
fn parse_property(data: &[u8], offset: usize) -> Result<Option<PropertyValue>> {
    let type_tag = read_u32(data, offset)?;
    let value = match type_tag {
        VT_I2 => Some(PropertyValue::Int(i32::from(
            read_u16(data, offset + 4)? as i16
        ))),
        VT_I4 => Some(PropertyValue::Int(read_u32(data, offset + 4)? as i32)),
        VT_LPSTR => {
            let length = read_u32(data, offset + 4)? as usize;
            let start = offset + 8;
            let end = start
                .checked_add(length)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| {
                    ToolkitError::Decode("string property overruns the stream".to_string())
                })?;
            let text: String = data[start..end]
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as char)
                .collect();
            Some(PropertyValue::Text(text))
        }
        VT_FILETIME => {
            let low = read_u32(data, offset + 4)? as u64;
            let high = read_u32(data, offset + 8)? as u64;
            let filetime = (high << 32) | low;
            Some(PropertyValue::Time(format_filetime(filetime)))
        }
        _ => None,
    };
    Ok(value)
}

/// Render a FILETIME as `yyyy-mm-ddThh:mm:ssZ`
fn format_filetime(filetime: u64) -> String {
    let unix_secs = (filetime / 10_000_000) as i64 - FILETIME_UNIX_OFFSET;
    let days = unix_secs.div_euclid(86_400);
    let seconds_of_day = unix_secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}Z",
        seconds_of_day / 3600,
        (seconds_of_day % 3600) / 60,
        seconds_of_day % 60
    )
}

/// Gregorian date from days since the Unix epoch
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if month <= 2 { year + 1 } else { year };
    (year, month, day)
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| ToolkitError::Decode("property set truncated".to_string()))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ToolkitError::Decode("property set truncated".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal property set: codepage, title, author, word count
    fn build_property_set() -> Vec<u8> {
        let properties: Vec<(u32, Vec<u8>)> = vec![
            (1, encode_i2(1252)),
            (2, encode_lpstr("Installation Database")),
            (4, encode_lpstr("Contoso")),
            (15, encode_i4(10)),
        ];

        let mut section = Vec::new();
        // Placeholder for size + count, then the id/offset table.
        let header_len = 8 + properties.len() * 8;
        let mut body = Vec::new();
        let mut entries = Vec::new();
        for (id, encoded) in &properties {
            entries.push((*id, (header_len + body.len()) as u32));
            body.extend_from_slice(encoded);
        }
        section.extend_from_slice(&((header_len + body.len()) as u32).to_le_bytes());
        section.extend_from_slice(&(properties.len() as u32).to_le_bytes());
        for (id, offset) in entries {
            section.extend_from_slice(&id.to_le_bytes());
            section.extend_from_slice(&offset.to_le_bytes());
        }
        section.extend_from_slice(&body);

        let mut data = Vec::new();
        data.extend_from_slice(&0xFFFEu16.to_le_bytes()); // byte order
        data.extend_from_slice(&0u16.to_le_bytes()); // version
        data.extend_from_slice(&0u32.to_le_bytes()); // system id
        data.extend_from_slice(&[0u8; 16]); // clsid
        data.extend_from_slice(&1u32.to_le_bytes()); // one section
        data.extend_from_slice(&[0u8; 16]); // fmtid
        data.extend_from_slice(&48u32.to_le_bytes()); // section offset
        assert_eq!(data.len(), 48);
        data.extend_from_slice(&section);
        data
    }

    fn encode_i2(value: i16) -> Vec<u8> {
        let mut out = VT_I2.to_le_bytes().to_vec();
        out.extend_from_slice(&(value as i32).to_le_bytes());
        out
    }

    fn encode_i4(value: i32) -> Vec<u8> {
        let mut out = VT_I4.to_le_bytes().to_vec();
        out.extend_from_slice(&value.to_le_bytes());
        out
    }

    fn encode_lpstr(value: &str) -> Vec<u8> {
        let mut out = VT_LPSTR.to_le_bytes().to_vec();
        out.extend_from_slice(&((value.len() + 1) as u32).to_le_bytes());
        out.extend_from_slice(value.as_bytes());
        out.push(0);
        out
    }

    #[test]
    fn test_parse_property_set() {
        let summary = parse_property_set(&build_property_set()).unwrap();
        assert_eq!(summary.title.as_deref(), Some("Installation Database"));
        assert_eq!(summary.author.as_deref(), Some("Contoso"));
        assert_eq!(summary.word_count, Some(10));
        assert_eq!(summary.code_page, Some(1252));
        assert!(summary.keywords.is_none());
    }

    #[test]
    fn test_bad_byte_order_rejected() {
        let mut data = build_property_set();
        data[0] = 0;
        assert!(matches!(
            parse_property_set(&data).unwrap_err(),
            ToolkitError::Decode(_)
        ));
    }

    #[test]
    fn test_truncated_set_rejected() {
        let data = build_property_set();
        assert!(parse_property_set(&data[..20]).is_err());
    }

    #[test]
    fn test_format_filetime() {
        // 2020-01-01T00:00:00Z in FILETIME units.
        let filetime = ((1_577_836_800i64 + FILETIME_UNIX_OFFSET) * 10_000_000) as u64;
        assert_eq!(format_filetime(filetime), "2020-01-01T00:00:00Z");
    }

    #[test]
    fn test_round_trip_with_package_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.msi");
        {
            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .unwrap();
            let mut package = msi::Package::create(msi::PackageType::Installer, file).unwrap();
            package.summary_info_mut().set_title("Title Here".to_string());
            package.summary_info_mut().set_author("Author Here".to_string());
            package
                .summary_info_mut()
                .set_subject("Subject Here".to_string());
            package.flush().unwrap();
        }
        let summary = read_summary(&path).unwrap();
        assert_eq!(summary.title.as_deref(), Some("Title Here"));
        assert_eq!(summary.author.as_deref(), Some("Author Here"));
        assert_eq!(summary.subject.as_deref(), Some("Subject Here"));
    }
}

//! Report attachment decoder
//!
//! Aggregate reports arrive as ZIP archives, gzip streams, or bare XML.
//! Decoding failures fall back to the original bytes: the parser is the
//! authority on validity, so a broken archive surfaces as a parse error
//! with the raw payload preserved for diagnostics.

use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use tracing::debug;

/// ZIP local file header signature
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Gzip stream magic number
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

/// Extract report document bytes from a raw attachment payload.
///
/// The filename hint and leading magic bytes are both consulted; either is
/// enough to select a format. Anything unrecognized is assumed to already
/// be the report document.
pub fn decode_attachment(payload: &[u8], filename: Option<&str>) -> Vec<u8> {
    let name = filename.map(str::to_ascii_lowercase).unwrap_or_default();

    if payload.starts_with(ZIP_MAGIC) || name.ends_with(".zip") {
        match unzip_first_xml(payload) {
            Some(xml) => return xml,
            None => {
                debug!("ZIP extraction failed, falling back to raw payload");
                return payload.to_vec();
            }
        }
    }

    if payload.starts_with(GZIP_MAGIC) || name.ends_with(".gz") || name.ends_with(".gzip") {
        match gunzip(payload) {
            Some(xml) => return xml,
            None => {
                debug!("Gzip inflation failed, falling back to raw payload");
                return payload.to_vec();
            }
        }
    }

    payload.to_vec()
}

/// Read the first `.xml` entry from a ZIP archive
fn unzip_first_xml(payload: &[u8]) -> Option<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(payload)).ok()?;

    let name = (0..archive.len()).find_map(|i| {
        let entry = archive.by_index(i).ok()?;
        entry
            .name()
            .to_ascii_lowercase()
            .ends_with(".xml")
            .then(|| entry.name().to_string())
    })?;

    let mut entry = archive.by_name(&name).ok()?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf).ok()?;
    Some(buf)
}

fn gunzip(payload: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = GzDecoder::new(Cursor::new(payload));
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf).ok()?;
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use zip::write::FileOptions;

    const XML: &[u8] = b"<?xml version=\"1.0\"?><feedback></feedback>";

    fn make_zip(entry_name: &str) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            writer
                .start_file(entry_name, FileOptions::default())
                .unwrap();
            writer.write_all(XML).unwrap();
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    fn make_gzip() -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(XML).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_zip_by_magic() {
        let zipped = make_zip("report.xml");
        assert_eq!(decode_attachment(&zipped, None), XML);
    }

    #[test]
    fn test_zip_by_filename() {
        let zipped = make_zip("report.xml");
        assert_eq!(decode_attachment(&zipped, Some("report.xml.zip")), XML);
    }

    #[test]
    fn test_zip_skips_non_xml_entries() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            writer
                .start_file("readme.txt", FileOptions::default())
                .unwrap();
            writer.write_all(b"not a report").unwrap();
            writer
                .start_file("report.xml", FileOptions::default())
                .unwrap();
            writer.write_all(XML).unwrap();
            writer.finish().unwrap();
        }
        assert_eq!(decode_attachment(&buf.into_inner(), None), XML);
    }

    #[test]
    fn test_gzip_by_magic() {
        assert_eq!(decode_attachment(&make_gzip(), None), XML);
    }

    #[test]
    fn test_gzip_by_filename() {
        assert_eq!(decode_attachment(&make_gzip(), Some("report.xml.gz")), XML);
    }

    #[test]
    fn test_raw_passthrough() {
        assert_eq!(decode_attachment(XML, Some("report.xml")), XML);
    }

    #[test]
    fn test_corrupt_archive_falls_back_to_original() {
        // Claims to be a ZIP but is not one
        let garbage = b"PK\x03\x04 definitely not an archive";
        assert_eq!(decode_attachment(garbage, None), garbage.to_vec());

        let truncated_gz = &make_gzip()[..4];
        assert_eq!(
            decode_attachment(truncated_gz, Some("r.gz")),
            truncated_gz.to_vec()
        );
    }
}

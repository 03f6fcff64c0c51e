use anyhow::{anyhow, Result};
use std::io::{Cursor, Read};
use zip::read::ZipArchive;

use crate::utils::has_extension;

#[derive(Debug, Clone)]
pub struct PdfEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Pulls every PDF out of a ZIP upload, skipping folders and macOS metadata.
/// An archive without a single PDF is an error, so is one whose PDFs unpack to more
/// than `limit` bytes in total.
pub fn extract_pdfs(bytes: &[u8], limit: u64) -> Result<Vec<PdfEntry>> {
    if bytes.is_empty() {
        return Err(anyhow!("Die ZIP-Datei ist leer"));
    }
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| anyhow!("Ungültige ZIP-Datei: {}", e))?;

    let mut pdfs = Vec::new();
    let mut remaining = limit;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| anyhow!("ZIP-Eintrag {}: {}", i, e))?;
        let name = entry.name().replace('\\', "/");
        if entry.is_dir() || is_hidden(&name) || !has_extension(&name, "pdf") {
            continue;
        }
        // Declared sizes come from the archive itself, so only the bytes actually read count.
        let mut data = Vec::new();
        entry
            .by_ref()
            .take(remaining.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(|e| anyhow!("{} konnte nicht gelesen werden: {}", name, e))?;
        let size = data.len() as u64;
        if size > remaining {
            return Err(anyhow!(
                "Die ZIP-Datei ist entpackt größer als {} Bytes ({})",
                limit,
                name
            ));
        }
        remaining -= size;
        pdfs.push(PdfEntry { name, bytes: data });
    }

    if pdfs.is_empty() {
        return Err(anyhow!("Die ZIP-Datei enthält keine PDF-Dateien"));
    }
    Ok(pdfs)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with("__MACOSX/")
        || name
            .rsplit('/')
            .next()
            .map(|file| file.starts_with('.'))
            .unwrap_or(false)
}

#[cfg(test)]
pub(crate) fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, SimpleFileOptions::default()).unwrap();
        } else {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data.as_bytes()).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: u64 = 1024 * 1024;

    #[test]
    fn keeps_only_pdf_entries() {
        let zip = build_zip(&[
            ("rechnungen/", ""),
            ("rechnungen/a.pdf", "%PDF-1.4 a"),
            ("rechnungen/B.PDF", "%PDF-1.4 b"),
            ("notizen.txt", "hallo"),
            ("__MACOSX/rechnungen/._a.pdf", "meta"),
            ("rechnungen/.hidden.pdf", "x"),
        ]);
        let pdfs = extract_pdfs(&zip, LIMIT).unwrap();
        let names: Vec<_> = pdfs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["rechnungen/a.pdf", "rechnungen/B.PDF"]);
        assert_eq!(pdfs[0].bytes, b"%PDF-1.4 a");
    }

    #[test]
    fn rejects_archives_without_pdfs() {
        let zip = build_zip(&[("liste.csv", "a;b")]);
        assert!(extract_pdfs(&zip, LIMIT).is_err());
        assert!(extract_pdfs(&build_zip(&[]), LIMIT).is_err());
        assert!(extract_pdfs(b"", LIMIT).is_err());
        assert!(extract_pdfs(b"kein zip", LIMIT).is_err());
    }

    #[test]
    fn rejects_entries_that_unpack_beyond_the_limit() {
        let big = "%PDF".to_string() + &"0".repeat(10_000);
        let zip = build_zip(&[("gross.pdf", big.as_str())]);
        assert!(zip.len() < 1_000);
        let err = extract_pdfs(&zip, 1_000).unwrap_err();
        assert!(err.to_string().contains("gross.pdf"));
        assert_eq!(extract_pdfs(&zip, 20_000).unwrap()[0].bytes.len(), big.len());
    }

    #[test]
    fn limit_applies_to_the_sum_of_entries() {
        let part = "0".repeat(600);
        let zip = build_zip(&[("a.pdf", part.as_str()), ("b.pdf", part.as_str())]);
        assert!(extract_pdfs(&zip, 1_000).is_err());
        assert_eq!(extract_pdfs(&zip, 1_200).unwrap().len(), 2);
    }
}

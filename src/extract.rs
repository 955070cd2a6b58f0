//! Per-format text extraction.
//!
//! Each [`DocumentFormat`] is served by one [`Extractor`]; the
//! [`ExtractorRegistry`] selects it from the document's format tag. All
//! extractors are blocking and are run on the worker via `spawn_blocking`.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{Document, DocumentFormat};

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Reads the plain text of one document format.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> std::result::Result<String, String>;
}

/// Format tag → extractor lookup.
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<DocumentFormat, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// An empty registry; every document fails extraction until registered.
    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    pub fn register(&mut self, format: DocumentFormat, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(format, extractor);
    }

    /// Extract a document's text.
    ///
    /// Fails with [`Error::Extraction`] when the format has no extractor, the
    /// file cannot be parsed, or the text is empty.
    pub fn extract(&self, doc: &Document) -> Result<String> {
        let extractor = self.extractors.get(&doc.format).ok_or_else(|| {
            Error::extraction(
                &doc.name,
                format!("no extractor for .{} files", doc.format.extension()),
            )
        })?;
        let text = extractor
            .extract(&doc.path)
            .map_err(|e| Error::extraction(&doc.name, e))?;
        if text.trim().is_empty() {
            return Err(Error::extraction(&doc.name, "no content"));
        }
        Ok(text)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(DocumentFormat::Text, Arc::new(TextExtractor));
        registry.register(DocumentFormat::Pdf, Arc::new(PdfExtractor));
        registry.register(DocumentFormat::Docx, Arc::new(DocxExtractor));
        registry.register(DocumentFormat::Xlsx, Arc::new(XlsxExtractor));
        registry.register(DocumentFormat::Xls, Arc::new(LegacyXlsExtractor));
        registry
    }
}

fn read_file(path: &Path) -> std::result::Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
}

/// Plain text, decoded as UTF-8 with invalid sequences replaced.
pub struct TextExtractor;

impl Extractor for TextExtractor {
    fn extract(&self, path: &Path) -> std::result::Result<String, String> {
        let bytes = read_file(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn extract(&self, path: &Path) -> std::result::Result<String, String> {
        let bytes = read_file(path)?;
        pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| format!("PDF extraction failed: {}", e))
    }
}

/// Word documents: the `w:t` runs of `word/document.xml`.
pub struct DocxExtractor;

impl Extractor for DocxExtractor {
    fn extract(&self, path: &Path) -> std::result::Result<String, String> {
        let bytes = read_file(path)?;
        let mut archive = open_zip(&bytes)?;
        let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
        extract_paragraph_text(&doc_xml)
    }
}

/// Spreadsheets: shared-string cell values of every worksheet.
pub struct XlsxExtractor;

impl Extractor for XlsxExtractor {
    fn extract(&self, path: &Path) -> std::result::Result<String, String> {
        let bytes = read_file(path)?;
        let mut archive = open_zip(&bytes)?;
        let shared_strings = read_shared_strings(&mut archive)?;
        let sheet_names = list_worksheet_names(&archive);
        let mut out = String::new();
        for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
            let sheet_xml = read_zip_entry_bounded(&mut archive, &name)?;
            let cell_texts = extract_sheet_cells(&sheet_xml, &shared_strings)?;
            if !out.is_empty() && !cell_texts.is_empty() {
                out.push('\n');
            }
            out.push_str(&cell_texts);
        }
        Ok(out)
    }
}

/// Legacy workbooks. The container is sniffed rather than trusted, since
/// `.xls` files are often renamed xlsx workbooks.
pub struct LegacyXlsExtractor;

impl Extractor for LegacyXlsExtractor {
    fn extract(&self, path: &Path) -> std::result::Result<String, String> {
        use calamine::{open_workbook_auto_from_rs, Data, Reader};

        let bytes = read_file(path)?;
        let mut workbook = open_workbook_auto_from_rs(std::io::Cursor::new(bytes))
            .map_err(|e| format!("cannot open workbook: {}", e))?;
        let mut out = String::new();
        for name in workbook.sheet_names().into_iter().take(XLSX_MAX_SHEETS) {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| format!("sheet {}: {}", name, e))?;
            let cells: Vec<String> = range
                .used_cells()
                .take(XLSX_MAX_CELLS_PER_SHEET)
                .filter(|(_, _, cell)| !matches!(cell, Data::Empty))
                .map(|(_, _, cell)| cell.to_string())
                .filter(|s| !s.trim().is_empty())
                .collect();
            if cells.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&cells.join(" "));
        }
        Ok(out)
    }
}

type ZipReader<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_zip(bytes: &[u8]) -> std::result::Result<ZipReader<'_>, String> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())
}

fn read_zip_entry_bounded(
    archive: &mut ZipReader<'_>,
    name: &str,
) -> std::result::Result<Vec<u8>, String> {
    let entry = archive
        .by_name(name)
        .map_err(|e| format!("{}: {}", name, e))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        ));
    }
    Ok(out)
}

/// Collect `<w:t>` text, one line per `<w:p>` paragraph.
fn extract_paragraph_text(xml: &[u8]) -> std::result::Result<String, String> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn read_shared_strings(archive: &mut ZipReader<'_>) -> std::result::Result<Vec<String>, String> {
    use quick_xml::events::Event;

    // Workbooks with only numeric cells have no shared strings part.
    if archive.by_name("xl/sharedStrings.xml").is_err() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheet_names(archive: &ZipReader<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Cell values of one sheet: shared strings resolved, inline numbers kept.
fn extract_sheet_cells(
    xml: &[u8],
    shared_strings: &[String],
) -> std::result::Result<String, String> {
    use quick_xml::events::Event;

    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared_str = false;
    loop {
        if cells.len() >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                } else if e.local_name().as_ref() == b"v" {
                    in_v = true;
                }
            }
            Ok(Event::Text(te)) if in_v => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if cell_is_shared_str {
                    if let Some(text) = s.parse::<usize>().ok().and_then(|i| shared_strings.get(i))
                    {
                        cells.push(text.clone());
                    }
                } else if !s.is_empty() {
                    cells.push(s.to_string());
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"v" {
                    in_v = false;
                } else if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

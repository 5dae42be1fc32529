//! Text extraction for binary office formats (PDF, OOXML, legacy Excel).
//!
//! Each extractor returns one string per natural unit of the format: a page
//! for PDF, a slide for PPTX, a worksheet for XLSX and XLS, and the whole
//! body for DOCX. Extraction never panics on malformed input; it returns an
//! [`ExtractError`] and the caller skips the file.

use std::io::Read;

use calamine::Reader;
use quick_xml::events::Event;
use thiserror::Error;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("XLS extraction failed: {0}")]
    Xls(String),
}

type ZipReader<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Extract one text unit per PDF page.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    // pdf-extract panics on some malformed inputs; contain that to this file.
    let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes));
    match result {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked on malformed input".to_string())),
    }
}

/// Extract the body text of a DOCX, one line per paragraph.
pub fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    collect_text_runs(&xml, b"p")
}

/// Extract one text unit per slide, ordered by slide number.
pub fn extract_pptx_slides(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let names = numbered_entries(&archive, "ppt/slides/slide", ".xml");
    let mut slides = Vec::with_capacity(names.len());
    for name in names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        slides.push(collect_text_runs(&xml, b"p")?);
    }
    Ok(slides)
}

/// Extract one text unit per worksheet, ordered by sheet number.
///
/// Rows are separated by newlines and cells by tabs.
pub fn extract_xlsx_sheets(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let shared_strings = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let names = numbered_entries(&archive, "xl/worksheets/sheet", ".xml");
    let mut sheets = Vec::new();
    for name in names.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        sheets.push(extract_sheet_rows(&xml, &shared_strings)?);
    }
    Ok(sheets)
}

/// Extract one text unit per worksheet of a BIFF `.xls` workbook, in
/// workbook order. Same row and cell separators as [`extract_xlsx_sheets`].
pub fn extract_xls_sheets(bytes: Vec<u8>) -> Result<Vec<String>, ExtractError> {
    let mut workbook: calamine::Xls<_> = calamine::open_workbook_from_rs(std::io::Cursor::new(bytes))
        .map_err(|e: calamine::XlsError| ExtractError::Xls(e.to_string()))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names().into_iter().take(XLSX_MAX_SHEETS) {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| ExtractError::Xls(format!("{}: {}", name, e)))?;
        let mut cell_count = 0usize;
        let mut rows = Vec::new();
        for row in range.rows() {
            if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
                break;
            }
            let cells: Vec<String> = row
                .iter()
                .map(|cell| cell.to_string().trim().to_string())
                .filter(|text| !text.is_empty())
                .collect();
            cell_count += cells.len();
            if !cells.is_empty() {
                rows.push(cells.join("\t"));
            }
        }
        sheets.push(rows.join("\n"));
    }
    Ok(sheets)
}

fn open_zip(bytes: &[u8]) -> Result<ZipReader<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut ZipReader<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Entries named `{prefix}{n}{suffix}`, sorted by `n`.
fn numbered_entries(archive: &ZipReader<'_>, prefix: &str, suffix: &str) -> Vec<String> {
    let mut names: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let num = n.strip_prefix(prefix)?.strip_suffix(suffix)?.parse::<u32>().ok()?;
            Some((num, n.to_string()))
        })
        .collect();
    names.sort();
    names.into_iter().map(|(_, n)| n).collect()
}

/// Concatenate every `<*:t>` text run, ending a line at each closing
/// `paragraph` element. Works for both WordprocessingML and DrawingML.
fn collect_text_runs(xml: &[u8], paragraph: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut line = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                line.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_t = false;
                } else if name.as_ref() == paragraph {
                    push_line(&mut out, &mut line);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    push_line(&mut out, &mut line);
    Ok(out)
}

fn push_line(out: &mut String, line: &mut String) {
    let trimmed = line.trim();
    if !trimmed.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(trimmed);
    }
    line.clear();
}

fn read_shared_strings(archive: &mut ZipReader<'_>) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
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
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(current.take().unwrap_or_default()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell type as given by the `t` attribute of `<c>`.
#[derive(Clone, Copy, PartialEq, Eq)]
enum CellType {
    Shared,
    Inline,
    Other,
}

fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut cell_type = CellType::Other;
    let mut in_value = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_type = CellType::Other;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            cell_type = match attr.value.as_ref() {
                                b"s" => CellType::Shared,
                                b"inlineStr" => CellType::Inline,
                                _ => CellType::Other,
                            };
                        }
                    }
                }
                b"v" => in_value = true,
                b"t" if cell_type == CellType::Inline => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                let resolved = match cell_type {
                    CellType::Shared => value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i))
                        .cloned(),
                    _ => Some(value.to_string()),
                };
                if let Some(text) = resolved.filter(|t| !t.is_empty()) {
                    row.push(text);
                    cell_count += 1;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => cell_type = CellType::Other,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join("\t"));
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join("\t"));
    }
    Ok(rows.join("\n"))
}

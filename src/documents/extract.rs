//! Plain-text extraction for uploaded documents.

use std::io::Read;

use quick_xml::events::Event;

use crate::core::errors::ApiError;
use crate::models::FileType;

/// Decompressed size cap for `word/document.xml`.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extracts trimmed UTF-8 text. Fails with `Processing` on unreadable input.
pub fn extract_text(bytes: &[u8], file_type: FileType) -> Result<String, ApiError> {
    let text = match file_type {
        FileType::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ApiError::Processing(format!("PDF extraction failed: {}", e)))?,
        FileType::Docx => extract_docx(bytes)?,
        FileType::Txt | FileType::Md => String::from_utf8_lossy(bytes).into_owned(),
    };
    Ok(text.trim().to_string())
}

fn extract_docx(bytes: &[u8]) -> Result<String, ApiError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ApiError::Processing(format!("DOCX is not a valid archive: {}", e)))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ApiError::Processing("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(ApiError::processing)?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ApiError::Processing(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    extract_paragraphs(&xml)
}

/// Collects `w:t` runs, one line per `w:p` paragraph.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ApiError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                in_text = e.local_name().as_ref() == b"t";
            }
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(ApiError::processing)?;
                out.push_str(&text);
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => {
                in_text = false;
                if e.local_name().as_ref() == b"p" {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ApiError::Processing(format!("DOCX XML error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

use crate::document::{Diagnostic, ExtractedText, UploadedDocument};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use std::panic;
use std::path::Path;
use thiserror::Error;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "md", "txt"];

const DOCX_BODY_PART: &str = "word/document.xml";

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("DOCX XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Text is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns an uploaded document into text. Implementations must never fail:
/// problems are reported through `ExtractedText::diagnostic`.
pub trait Extractor: Send + Sync {
    fn extract(&self, document: &UploadedDocument) -> ExtractedText;
}

/// Picks a parser from the file-name extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormatExtractor;

impl Extractor for FormatExtractor {
    fn extract(&self, document: &UploadedDocument) -> ExtractedText {
        extract(document)
    }
}

/// Lower-cased extension of a file name, if it has one.
pub fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase)
}

pub fn try_extract(document: &UploadedDocument) -> Result<String, ExtractionError> {
    let extension = file_extension(&document.name);
    match extension.as_deref() {
        Some("pdf") => extract_pdf(&document.bytes),
        Some("docx") => extract_docx(&document.bytes),
        Some("md") | Some("txt") => Ok(String::from_utf8(document.bytes.clone())?),
        other => Err(ExtractionError::UnsupportedType(
            other.unwrap_or_default().to_string(),
        )),
    }
}

/// Extraction never fails past this point; an unsupported type yields a
/// warning, anything else that goes wrong yields an error.
pub fn extract(document: &UploadedDocument) -> ExtractedText {
    match try_extract(document) {
        Ok(text) => {
            tracing::debug!("Extracted {} chars from {}", text.len(), document.name);
            ExtractedText {
                text,
                diagnostic: None,
            }
        }
        Err(ExtractionError::UnsupportedType(ext)) => {
            tracing::warn!("Unsupported file type '{}' for {}", ext, document.name);
            ExtractedText {
                text: String::new(),
                diagnostic: Some(Diagnostic::warning(format!(
                    "Unsupported file type: {}",
                    document.name
                ))),
            }
        }
        Err(e) => {
            tracing::error!("Error extracting text from {}: {}", document.name, e);
            ExtractedText {
                text: String::new(),
                diagnostic: Some(Diagnostic::error(format!(
                    "Error extracting text from {}: {}",
                    document.name, e
                ))),
            }
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    // pdf-extract panics on some malformed files instead of returning an error.
    // The panic is contained here, but the process panic hook still reports it on stderr.
    let pages = panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ExtractionError::Pdf("parser aborted on malformed input".to_string()))?
        .map_err(|e| ExtractionError::Pdf(e.to_string()))?;

    let mut text = String::new();
    for page in pages {
        text.push_str(&page);
        text.push('\n');
    }
    Ok(text)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut xml = String::new();
    archive.by_name(DOCX_BODY_PART)?.read_to_string(&mut xml)?;
    paragraphs_from_document_xml(&xml)
}

/// Paragraph texts of a WordprocessingML body, joined with newlines. A paragraph
/// nested in another one (text boxes) is emitted right after its outer paragraph.
fn paragraphs_from_document_xml(xml: &str) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    // Open paragraphs, innermost last.
    let mut open: Vec<String> = Vec::new();
    // Finished nested paragraphs waiting for their outermost paragraph to close.
    let mut nested: Vec<String> = Vec::new();
    let mut run_depth = 0usize;
    // Paragraph properties hold tab-stop definitions (`w:tabs/w:tab`), not text.
    let mut properties_depth = 0usize;
    let mut in_text_run = false;

    let mut finish_paragraph = |text: String, open: &[String], nested: &mut Vec<String>| {
        if open.is_empty() {
            paragraphs.push(text);
            paragraphs.append(nested);
        } else {
            nested.push(text);
        }
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:p" => open.push(String::new()),
                b"w:r" => run_depth += 1,
                b"w:pPr" => properties_depth += 1,
                b"w:t" => in_text_run = true,
                _ => {}
            },
            Event::Empty(e) => {
                let in_run_content = run_depth > 0 && properties_depth == 0;
                match e.name().as_ref() {
                    b"w:tab" if in_run_content => push_text(&mut open, "\t"),
                    b"w:br" | b"w:cr" if in_run_content => push_text(&mut open, "\n"),
                    b"w:p" => finish_paragraph(String::new(), &open, &mut nested),
                    _ => {}
                }
            }
            Event::Text(t) if in_text_run => push_text(&mut open, &t.unescape()?),
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:r" => run_depth = run_depth.saturating_sub(1),
                b"w:pPr" => properties_depth = properties_depth.saturating_sub(1),
                b"w:p" => {
                    if let Some(text) = open.pop() {
                        finish_paragraph(text, &open, &mut nested);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs.join("\n"))
}

fn push_text(open: &mut [String], text: &str) {
    if let Some(paragraph) = open.last_mut() {
        paragraph.push_str(text);
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// One single-run paragraph per entry.
    pub fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p))
            .collect();
        docx_with_body(&body)
    }

    /// Minimal OOXML package whose `w:body` holds `body` verbatim.
    pub fn docx_with_body(body: &str) -> Vec<u8> {
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
             <w:body>{}</w:body></w:document>",
            body
        );

        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    /// Single-page PDF drawing `line` in Helvetica, with a correct xref table.
    pub fn pdf_with_text(line: &str) -> Vec<u8> {
        let content = format!("BT /F1 24 Tf 72 720 Td ({}) Tj ET", line);
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>"
                .to_string(),
            format!(
                "<< /Length {} >>\nstream\n{}\nendstream",
                content.len(),
                content
            ),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_string(),
        ];

        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, object) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, object).as_bytes());
        }
        let xref_at = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
        pdf.extend_from_slice(b"0000000000 65535 f \n");
        for offset in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_at
            )
            .as_bytes(),
        );
        pdf
    }
}

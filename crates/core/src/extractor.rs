use crate::error::ExtractionError;
use lopdf::Document;

const PDF_MAGIC: &[u8] = b"%PDF";

pub trait PdfExtractor: Send + Sync {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractionError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractionError> {
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(ExtractionError::NotPdf);
        }

        let document =
            Document::load_mem(bytes).map_err(|error| ExtractionError::PdfParse(error.to_string()))?;

        let pages = document.get_pages();
        if pages.is_empty() {
            return Err(ExtractionError::NoPages);
        }

        let mut text = String::new();
        for page_no in pages.keys() {
            let page_text = document
                .extract_text(&[*page_no])
                .map_err(|error| ExtractionError::PdfParse(error.to_string()))?;
            text.push_str(&page_text);
            text.push('\n');
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(ExtractionError::NoText);
        }

        Ok(text.to_string())
    }
}

/// Whether an upload declares itself as a PDF. The content type wins when it
/// is specific; generic or missing types fall back to the file extension.
pub fn is_pdf_upload(filename: &str, content_type: Option<&str>) -> bool {
    let declared = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match declared.as_deref() {
        Some("application/pdf") | Some("application/x-pdf") => true,
        None | Some("application/octet-stream") => has_pdf_extension(filename),
        Some(_) => false,
    }
}

pub fn has_pdf_extension(filename: &str) -> bool {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

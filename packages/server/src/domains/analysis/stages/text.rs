//! Text extraction: OCR for scanned PDFs, direct extraction otherwise.

use tracing::{debug, warn};

use crate::domains::analysis::types::{TextExtraction, TextProvider};
use crate::kernel::traits::BaseOcrEngine;

fn is_pdf(mime_type: &str) -> bool {
    mime_type
        .split(';')
        .next()
        .unwrap_or(mime_type)
        .trim()
        .eq_ignore_ascii_case("application/pdf")
}

fn empty_extraction() -> TextExtraction {
    TextExtraction {
        text: String::new(),
        page_count: 0,
        ocr_confidence: None,
        provider: TextProvider::None,
        is_scanned: false,
    }
}

/// Extract text from document bytes.
///
/// PDFs prefer the configured OCR engine; OCR failure or empty OCR output
/// falls back to direct PDF text extraction. Non-PDF content is read as
/// UTF-8 text.
pub async fn extract_text(
    bytes: &[u8],
    mime_type: &str,
    ocr: Option<&dyn BaseOcrEngine>,
) -> TextExtraction {
    if is_pdf(mime_type) {
        if let Some(engine) = ocr {
            match engine.process(bytes).await {
                Ok(output) if !output.text.trim().is_empty() => {
                    let provider = match output.provider.as_str() {
                        "hunyuan" => TextProvider::Hunyuan,
                        _ => TextProvider::Tesseract,
                    };
                    return TextExtraction {
                        page_count: output.pages.len().max(1) as i32,
                        text: output.text,
                        ocr_confidence: Some(output.confidence),
                        provider,
                        is_scanned: true,
                    };
                }
                Ok(_) => {
                    debug!("OCR returned empty text, falling back to direct extraction");
                }
                Err(e) => {
                    warn!(error = %e, "OCR failed, falling back to direct extraction");
                }
            }
        }
        return direct_pdf_text(bytes).await;
    }

    // Non-PDF portal payloads are text-shaped (plain text, XML, JSON).
    let text = String::from_utf8_lossy(bytes).into_owned();
    if text.trim().is_empty() {
        return empty_extraction();
    }

    TextExtraction {
        text,
        page_count: 1,
        ocr_confidence: None,
        provider: TextProvider::Direct,
        is_scanned: false,
    }
}

async fn direct_pdf_text(bytes: &[u8]) -> TextExtraction {
    let owned = bytes.to_vec();

    // pdf-extract is synchronous and CPU-bound.
    let result = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&owned))
        .await;

    match result {
        Ok(Ok(text)) if !text.trim().is_empty() => {
            // pdf-extract separates pages with form feeds.
            let page_count = text.matches('\u{c}').count().max(1) as i32;
            TextExtraction {
                text,
                page_count,
                ocr_confidence: None,
                provider: TextProvider::Direct,
                is_scanned: false,
            }
        }
        Ok(Ok(_)) => empty_extraction(),
        Ok(Err(e)) => {
            warn!(error = %e, "direct PDF text extraction failed");
            empty_extraction()
        }
        Err(e) => {
            warn!(error = %e, "PDF extraction task panicked");
            empty_extraction()
        }
    }
}

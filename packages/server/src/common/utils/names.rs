//! Filename derivation for stored blobs.
//!
//! Blob names are built from the portal's external id plus a MIME-derived
//! extension. External ids come from third-party systems and must never be
//! able to influence the storage path beyond the final component.

/// Replace every character outside `[A-Za-z0-9._-]` with an underscore.
///
/// Idempotent: sanitising an already-sanitised name is a no-op.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File extension for a MIME type, leading dot included.
///
/// Falls back to `.bin` for unknown types so stored names always carry an
/// extension.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    // Strip parameters like "; charset=utf-8" before matching.
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or(mime_type)
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "application/pdf" => ".pdf",
        "text/plain" => ".txt",
        "text/xml" | "application/xml" => ".xml",
        "text/html" => ".html",
        "application/json" => ".json",
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/tiff" => ".tif",
        "application/zip" => ".zip",
        _ => match mime_guess::get_mime_extensions_str(&essence).and_then(|e| e.first()) {
            Some(ext) => match *ext {
                // mime_guess returns bare extensions; only pass through
                // the handful we expect from portal payloads.
                "pdf" => ".pdf",
                "txt" => ".txt",
                "xml" => ".xml",
                "csv" => ".csv",
                _ => ".bin",
            },
            None => ".bin",
        },
    }
}

/// Build the stored filename for an external document id.
pub fn blob_filename(external_id: &str, mime_type: &str) -> String {
    let stem = sanitize_filename(external_id);
    let ext = extension_for_mime(mime_type);
    if stem.to_ascii_lowercase().ends_with(ext) {
        stem
    } else {
        format!("{stem}{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_filename("2025-BVE_0042.v1"), "2025-BVE_0042.v1");
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("a/b\\c d:e"), "a_b_c_d_e");
        assert_eq!(sanitize_filename("über größe"), "_ber_gr__e");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = ["../../etc/passwd", "Bescheid (2025)!", "ok-name.pdf"];
        for input in inputs {
            let once = sanitize_filename(input);
            assert_eq!(sanitize_filename(&once), once);
        }
    }

    #[test]
    fn extension_from_mime() {
        assert_eq!(extension_for_mime("application/pdf"), ".pdf");
        assert_eq!(extension_for_mime("text/plain; charset=utf-8"), ".txt");
        assert_eq!(extension_for_mime("application/x-unknown"), ".bin");
    }

    #[test]
    fn filename_does_not_duplicate_extension() {
        assert_eq!(blob_filename("doc.pdf", "application/pdf"), "doc.pdf");
        assert_eq!(blob_filename("FN-1", "application/pdf"), "FN-1.pdf");
    }
}

//! Invoice-candidate filename filter.

/// Extensions accepted for ingestion, compared case-insensitively.
pub const CANDIDATE_EXTENSIONS: [&str; 5] = ["pdf", "jpg", "jpeg", "png", "xml"];

/// Whether a file name looks like an invoice document.
pub fn is_invoice_candidate(name: &str) -> bool {
    let lower = name.to_lowercase();
    CANDIDATE_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{}", ext)))
}

/// MIME type guessed from the file name.
pub fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_extensions() {
        assert!(is_invoice_candidate("faktura.pdf"));
        assert!(is_invoice_candidate("scan.jpg"));
        assert!(is_invoice_candidate("scan.jpeg"));
        assert!(is_invoice_candidate("scan.png"));
        assert!(is_invoice_candidate("ksef_123.xml"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(is_invoice_candidate("FAKTURA.PDF"));
        assert!(is_invoice_candidate("Scan.Jpeg"));
        assert!(is_invoice_candidate("plik.XML"));
    }

    #[test]
    fn test_rejected_names() {
        assert!(!is_invoice_candidate("notes.txt"));
        assert!(!is_invoice_candidate("archive.zip"));
        assert!(!is_invoice_candidate("pdf"));
        assert!(!is_invoice_candidate("fakturapdf"));
    }

    #[test]
    fn test_mime_guess() {
        assert_eq!(guess_mime("a.pdf"), "application/pdf");
        assert_eq!(guess_mime("a.png"), "image/png");
        assert_eq!(guess_mime("a.unknownext"), "application/octet-stream");
    }
}

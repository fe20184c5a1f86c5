//! Structured-data extraction from KSeF invoice XML.
//!
//! The KSeF schema is versioned and namespaced, and documents in the wild
//! carry arbitrary namespace prefixes (`ns2:P_2`). Extraction is therefore
//! tag-name based: each logical field is looked up inside its preferred
//! enclosing section (`Fa`, `Podmiot1`, `Podmiot2`) first, then document-wide.

use faktur_core::types::ParsedInvoice;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Whether content is detectably XML.
pub fn looks_like_xml(bytes: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return false;
    };
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    trimmed.starts_with("<?xml") || (trimmed.starts_with('<') && trimmed.contains("</"))
}

/// Extract the normalized record from invoice XML. Always succeeds; fields
/// that cannot be located stay `None`.
pub fn extract(xml: &str) -> ParsedInvoice {
    let fa = section(xml, "Fa");
    let seller = section(xml, "Podmiot1");
    let buyer = section(xml, "Podmiot2");

    let in_fa = |tags: &[&str]| find_first(fa.as_deref(), xml, tags);
    let in_seller = |tags: &[&str]| find_first(seller.as_deref(), xml, tags);
    let in_buyer = |tags: &[&str]| find_first(buyer.as_deref(), xml, tags);

    ParsedInvoice {
        confidence: 100,
        invoice_number: in_fa(&["P_2", "NrFaktury", "InvoiceNumber"]),
        issue_date: in_fa(&["P_1", "DataWystawienia", "IssueDate"]),
        due_date: in_fa(&["TerminPlatnosci", "DueDate"]),
        seller_nip: in_seller(&["NIP", "SellerNIP"]),
        seller_name: in_seller(&["Nazwa", "SellerName"]),
        buyer_nip: in_buyer(&["NIP", "BuyerNIP", "NIPNabywcy"]),
        buyer_name: in_buyer(&["Nazwa", "BuyerName", "NazwaNabywcy"]),
        net_amount: in_fa(&["P_13_1", "WartoscNetto"]).and_then(|v| parse_amount(&v)),
        vat_amount: in_fa(&["P_14_1", "KwotaVAT"]).and_then(|v| parse_amount(&v)),
        gross_amount: in_fa(&["P_15", "WartoscBrutto"]).and_then(|v| parse_amount(&v)),
        currency: Some(
            in_fa(&["KodWaluty"]).unwrap_or_else(|| "PLN".to_string()),
        ),
        note: None,
    }
}

/// Parse a decimal amount: strip whitespace, `,` -> `.`.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    Decimal::from_str(&cleaned).ok()
}

/// Look a field up in `section` first, then document-wide.
fn find_first(section: Option<&str>, whole: &str, tags: &[&str]) -> Option<String> {
    if let Some(scope) = section {
        for tag in tags {
            if let Some(value) = find_tag(scope, tag) {
                return Some(value);
            }
        }
    }
    for tag in tags {
        if let Some(value) = find_tag(whole, tag) {
            return Some(value);
        }
    }
    None
}

/// Inner text of the first `<tag>` element, tolerating namespace prefixes
/// and attributes.
fn find_tag(xml: &str, tag: &str) -> Option<String> {
    let re = tag_regex(tag);
    re.captures(xml).map(|caps| unescape(caps[1].trim()))
}

/// Inner text of the first `<name>` section element.
fn section(xml: &str, name: &str) -> Option<String> {
    let re = tag_regex(name);
    re.captures(xml).map(|caps| caps[1].to_string())
}

fn tag_regex(tag: &str) -> Regex {
    let escaped = regex::escape(tag);
    Regex::new(&format!(
        r"(?s)<(?:[A-Za-z0-9_.-]+:)?{escaped}(?:\s[^>]*)?>(.*?)</(?:[A-Za-z0-9_.-]+:)?{escaped}\s*>"
    ))
    .expect("tag regex")
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const KSEF_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Faktura xmlns="http://crd.gov.pl/wzor/2023/06/29/12648/">
  <Fa>
    <P_2>FV/2026/01/001</P_2>
    <P_1>2026-01-15</P_1>
    <P_13_1>1000,00</P_13_1>
    <P_14_1>230,00</P_14_1>
    <P_15>1230,00</P_15>
  </Fa>
  <Podmiot1><NIP>1234567890</NIP><Nazwa>ACME</Nazwa></Podmiot1>
</Faktura>"#;

    #[test]
    fn test_ksef_xml_intake() {
        let parsed = extract(KSEF_SAMPLE);
        assert_eq!(parsed.confidence, 100);
        assert_eq!(parsed.invoice_number.as_deref(), Some("FV/2026/01/001"));
        assert_eq!(parsed.issue_date.as_deref(), Some("2026-01-15"));
        assert_eq!(parsed.seller_nip.as_deref(), Some("1234567890"));
        assert_eq!(parsed.seller_name.as_deref(), Some("ACME"));
        assert_eq!(parsed.net_amount, Some(Decimal::new(100000, 2)));
        assert_eq!(parsed.vat_amount, Some(Decimal::new(23000, 2)));
        assert_eq!(parsed.gross_amount, Some(Decimal::new(123000, 2)));
        assert_eq!(parsed.currency.as_deref(), Some("PLN"));
    }

    #[test]
    fn test_namespace_prefixes_tolerated() {
        let xml = r#"<ns2:Faktura xmlns:ns2="urn:x">
            <ns2:Fa><ns2:P_2>FV/7</ns2:P_2><ns2:KodWaluty>EUR</ns2:KodWaluty></ns2:Fa>
            <ns2:Podmiot2><ns2:NIPNabywcy>9999999999</ns2:NIPNabywcy></ns2:Podmiot2>
        </ns2:Faktura>"#;
        let parsed = extract(xml);
        assert_eq!(parsed.invoice_number.as_deref(), Some("FV/7"));
        assert_eq!(parsed.currency.as_deref(), Some("EUR"));
        assert_eq!(parsed.buyer_nip.as_deref(), Some("9999999999"));
    }

    #[test]
    fn test_section_priority_over_document() {
        // a NIP outside Podmiot1 must not shadow the seller NIP inside it
        let xml = r#"<Faktura>
            <Podmiot2><NIP>1111111111</NIP></Podmiot2>
            <Podmiot1><NIP>2222222222</NIP></Podmiot1>
        </Faktura>"#;
        let parsed = extract(xml);
        assert_eq!(parsed.seller_nip.as_deref(), Some("2222222222"));
        assert_eq!(parsed.buyer_nip.as_deref(), Some("1111111111"));
    }

    #[test]
    fn test_fallback_tag_names() {
        let xml = "<Faktura><Fa><NrFaktury>A/1</NrFaktury><WartoscBrutto>10,50</WartoscBrutto></Fa></Faktura>";
        let parsed = extract(xml);
        assert_eq!(parsed.invoice_number.as_deref(), Some("A/1"));
        assert_eq!(parsed.gross_amount, Some(Decimal::new(1050, 2)));
    }

    #[test]
    fn test_unparseable_amount_is_none() {
        let xml = "<Faktura><Fa><P_15>n/a</P_15></Fa></Faktura>";
        assert_eq!(extract(xml).gross_amount, None);
    }

    #[test]
    fn test_amount_with_spaces() {
        assert_eq!(parse_amount("1 234,56"), Some(Decimal::new(123456, 2)));
        assert_eq!(parse_amount(" 99.90 "), Some(Decimal::new(9990, 2)));
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_looks_like_xml() {
        assert!(looks_like_xml(b"<?xml version=\"1.0\"?><a/>"));
        assert!(looks_like_xml(b"  <Faktura><Fa></Fa></Faktura>"));
        assert!(!looks_like_xml(b"%PDF-1.7"));
        assert!(!looks_like_xml(&[0xff, 0xd8]));
    }

    #[test]
    fn test_entity_unescape() {
        let xml = "<Faktura><Podmiot1><Nazwa>Kowalski &amp; Syn</Nazwa></Podmiot1></Faktura>";
        assert_eq!(
            extract(xml).seller_name.as_deref(),
            Some("Kowalski & Syn")
        );
    }
}

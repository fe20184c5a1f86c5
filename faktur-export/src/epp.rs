//! Subiekt GT EPP export: INI-like sections, CRLF line endings,
//! Windows-1250 encoding.

use crate::entry::KpirEntry;
use crate::render::{amount_pl, encode_windows_1250};
use faktur_core::error::Result;

/// Render the `[NAGLOWEK]` + `[DOKUMENT_n]` document set.
pub fn subiekt_epp(entries: &[KpirEntry]) -> Result<Vec<u8>> {
    let mut lines: Vec<String> = Vec::new();

    lines.push("[NAGLOWEK]".to_string());
    lines.push("wersja=1.05".to_string());
    lines.push("kodowanie=Windows-1250".to_string());
    lines.push(format!("liczba_dokumentow={}", entries.len()));
    lines.push(String::new());

    for (index, entry) in entries.iter().enumerate() {
        lines.push(format!("[DOKUMENT_{}]", index + 1));
        lines.push("typ=FZ".to_string());
        lines.push(format!("numer={}", entry.nr_dowodu));
        lines.push(format!("data={}", entry.data_zdarzenia));
        lines.push(format!("kontrahent={}", entry.nazwa_kontrahenta));
        lines.push(format!("nip={}", entry.nip_kontrahenta));
        lines.push(format!(
            "netto={}",
            entry.meta.net_amount.map(amount_pl).unwrap_or_default()
        ));
        lines.push(format!(
            "vat={}",
            entry.meta.vat_amount.map(amount_pl).unwrap_or_default()
        ));
        lines.push(format!(
            "brutto={}",
            entry.meta.gross_amount.map(amount_pl).unwrap_or_default()
        ));
        lines.push(format!("opis={}", entry.opis));
        lines.push(String::new());
    }

    let text = lines.join("\r\n");
    encode_windows_1250(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use faktur_core::types::{Invoice, InvoiceSource};
    use rust_decimal::Decimal;

    fn entries() -> Vec<KpirEntry> {
        let mut invoice = Invoice::new(InvoiceSource::Storage);
        invoice.invoice_number = Some("FV/1".to_string());
        invoice.contractor_name = Some("Spółka Jaźń".to_string());
        invoice.net_amount = Some(Decimal::new(10000, 2));
        invoice.vat_amount = Some(Decimal::new(2300, 2));
        invoice.gross_amount = Some(Decimal::new(12300, 2));
        vec![KpirEntry::from_invoice(1, &invoice)]
    }

    #[test]
    fn test_sections_and_crlf() {
        let bytes = subiekt_epp(&entries()).unwrap();
        let (text, _, _) = encoding_rs::WINDOWS_1250.decode(&bytes);
        assert!(text.starts_with("[NAGLOWEK]\r\n"));
        assert!(text.contains("[DOKUMENT_1]\r\n"));
        assert!(text.contains("liczba_dokumentow=1"));
        assert!(text.contains("brutto=123,00"));
        assert!(text.contains("kontrahent=Spółka Jaźń"));
        // every line break is CRLF
        assert_eq!(text.matches('\n').count(), text.matches("\r\n").count());
    }
}

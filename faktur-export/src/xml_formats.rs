//! XML export targets: Comarch Optima, enova and the JPK_PKPIR audit file.

use crate::entry::KpirEntry;
use crate::render::{amount_dot, xml_escape};
use chrono::{SecondsFormat, Utc};
use rust_decimal::Decimal;

/// Comarch Optima purchase register (`<REJESTRY_VAT>` root).
pub fn optima_xml(entries: &[KpirEntry]) -> Vec<u8> {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<REJESTRY_VAT>\n");
    for entry in entries {
        xml.push_str("  <REJESTR_ZAKUPU>\n");
        xml.push_str(&format!("    <LP>{}</LP>\n", entry.lp));
        xml.push_str(&tag("DATA_WYSTAWIENIA", &entry.data_zdarzenia));
        xml.push_str(&tag("NUMER", &entry.nr_dowodu));
        xml.push_str(&tag("NIP", &entry.nip_kontrahenta));
        xml.push_str(&tag("KONTRAHENT", &entry.nazwa_kontrahenta));
        xml.push_str(&amount_tag("NETTO", entry.meta.net_amount));
        xml.push_str(&amount_tag("VAT", entry.meta.vat_amount));
        xml.push_str(&amount_tag("BRUTTO", entry.meta.gross_amount));
        xml.push_str(&tag(
            "KATEGORIA",
            entry.meta.category.as_deref().unwrap_or(""),
        ));
        xml.push_str("  </REJESTR_ZAKUPU>\n");
    }
    xml.push_str("</REJESTRY_VAT>\n");
    xml.into_bytes()
}

/// enova365 document import.
pub fn enova_xml(entries: &[KpirEntry]) -> Vec<u8> {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Dokumenty>\n");
    for entry in entries {
        xml.push_str("  <Dokument>\n");
        xml.push_str(&tag("Numer", &entry.nr_dowodu));
        xml.push_str(&tag("Data", &entry.data_zdarzenia));
        xml.push_str(&tag("KontrahentNazwa", &entry.nazwa_kontrahenta));
        xml.push_str(&tag("KontrahentNIP", &entry.nip_kontrahenta));
        xml.push_str(&tag("Opis", &entry.opis));
        xml.push_str(&amount_tag("Netto", entry.meta.net_amount));
        xml.push_str(&amount_tag("VAT", entry.meta.vat_amount));
        xml.push_str(&amount_tag("Brutto", entry.meta.gross_amount));
        xml.push_str(&tag("MPK", entry.meta.mpk.as_deref().unwrap_or("")));
        xml.push_str("  </Dokument>\n");
    }
    xml.push_str("</Dokumenty>\n");
    xml.into_bytes()
}

/// JPK_PKPIR audit file. `DataWytworzeniaJPK` is the only varying output.
pub fn jpk_pkpir(entries: &[KpirEntry]) -> Vec<u8> {
    let created = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let income_total: Decimal = entries.iter().map(|e| e.razem_przychod).sum();
    let cost_total: Decimal = entries.iter().map(|e| e.razem_wydatki).sum();

    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<JPK xmlns=\"http://jpk.mf.gov.pl/wzor/2022/02/17/02171/\">\n",
    );
    xml.push_str("  <Naglowek>\n");
    xml.push_str(
        "    <KodFormularza kodSystemowy=\"JPK_PKPIR (2)\" wersjaSchemy=\"1-0\">JPK_PKPIR</KodFormularza>\n",
    );
    xml.push_str("    <WariantFormularza>2</WariantFormularza>\n");
    xml.push_str("    <CelZlozenia>1</CelZlozenia>\n");
    xml.push_str(&format!(
        "    <DataWytworzeniaJPK>{}</DataWytworzeniaJPK>\n",
        created
    ));
    xml.push_str("  </Naglowek>\n");

    for entry in entries {
        xml.push_str("  <PKPIRWiersz>\n");
        let cells = entry.cells(amount_dot);
        for (index, value) in cells.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            xml.push_str(&format!(
                "    <K_{}>{}</K_{}>\n",
                index + 1,
                xml_escape(value),
                index + 1
            ));
        }
        xml.push_str("  </PKPIRWiersz>\n");
    }

    xml.push_str("  <PKPIRCtrl>\n");
    xml.push_str(&format!(
        "    <LiczbaWierszy>{}</LiczbaWierszy>\n",
        entries.len()
    ));
    xml.push_str(&format!(
        "    <SumaPrzychodow>{}</SumaPrzychodow>\n",
        amount_dot(income_total)
    ));
    xml.push_str(&format!(
        "    <SumaKosztow>{}</SumaKosztow>\n",
        amount_dot(cost_total)
    ));
    xml.push_str("  </PKPIRCtrl>\n</JPK>\n");
    xml.into_bytes()
}

fn tag(name: &str, value: &str) -> String {
    format!("    <{name}>{}</{name}>\n", xml_escape(value))
}

fn amount_tag(name: &str, value: Option<Decimal>) -> String {
    format!(
        "    <{name}>{}</{name}>\n",
        value.map(amount_dot).unwrap_or_else(|| "0.00".to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use faktur_core::types::{Invoice, InvoiceSource};

    fn entry_with_gross(lp: usize, cents: i64) -> KpirEntry {
        let mut invoice = Invoice::new(InvoiceSource::Storage);
        invoice.invoice_number = Some(format!("FV/{}", lp));
        invoice.net_amount = Some(Decimal::new(cents, 2));
        KpirEntry::from_invoice(lp, &invoice)
    }

    #[test]
    fn test_jpk_totals() {
        let entries = vec![entry_with_gross(1, 10000), entry_with_gross(2, 25050)];
        let xml = String::from_utf8(jpk_pkpir(&entries)).unwrap();
        assert!(xml.contains("<LiczbaWierszy>2</LiczbaWierszy>"));
        assert!(xml.contains("<SumaKosztow>350.50</SumaKosztow>"));
        assert!(xml.contains("<SumaPrzychodow>0.00</SumaPrzychodow>"));
    }

    #[test]
    fn test_jpk_stable_modulo_timestamp() {
        let entries = vec![entry_with_gross(1, 10000)];
        let strip = |xml: Vec<u8>| {
            String::from_utf8(xml)
                .unwrap()
                .lines()
                .filter(|line| !line.contains("DataWytworzeniaJPK"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_eq!(strip(jpk_pkpir(&entries)), strip(jpk_pkpir(&entries)));
    }

    #[test]
    fn test_jpk_uses_dot_decimals() {
        let xml = String::from_utf8(jpk_pkpir(&[entry_with_gross(1, 123456)])).unwrap();
        assert!(xml.contains("<K_15>1234.56</K_15>"));
        assert!(!xml.contains("1234,56"));
    }

    #[test]
    fn test_optima_root_element() {
        let xml = String::from_utf8(optima_xml(&[entry_with_gross(1, 100)])).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<REJESTRY_VAT>"));
        assert!(xml.contains("</REJESTRY_VAT>"));
        assert!(xml.contains("<NETTO>1.00</NETTO>"));
    }

    #[test]
    fn test_xml_escaping_in_names() {
        let mut invoice = Invoice::new(InvoiceSource::Storage);
        invoice.contractor_name = Some("A & B".to_string());
        invoice.gross_amount = Some(Decimal::ONE);
        let entry = KpirEntry::from_invoice(1, &invoice);
        let xml = String::from_utf8(enova_xml(&[entry])).unwrap();
        assert!(xml.contains("<KontrahentNazwa>A &amp; B</KontrahentNazwa>"));
    }
}

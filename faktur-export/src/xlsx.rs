//! Minimal OOXML workbook writer for the KPiR ledger.
//!
//! Emits exactly the parts a valid workbook needs: `[Content_Types].xml`,
//! `_rels/.rels`, `xl/workbook.xml`, `xl/_rels/workbook.xml.rels` and
//! `xl/worksheets/sheet1.xml`. Strings are inline (no shared string table);
//! the total columns 11 and 16 carry real formulas so the sheet recomputes
//! after manual corrections.

use crate::entry::{KPIR_COLUMNS, KpirEntry};
use crate::render::{amount_dot, column_letter, xml_escape};
use faktur_core::error::{FakturError, Result};
use rust_decimal::Decimal;
use std::io::{Cursor, Write};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="KPiR" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

/// Render the workbook as ZIP bytes (deflate level 9).
pub fn kpir_xlsx(entries: &[KpirEntry]) -> Result<Vec<u8>> {
    let sheet = sheet_xml(entries);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    let parts: [(&str, &str); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", ROOT_RELS),
        ("xl/workbook.xml", WORKBOOK),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
        ("xl/worksheets/sheet1.xml", &sheet),
    ];
    for (name, content) in parts {
        zip.start_file(name, options)
            .map_err(|e| FakturError::storage(format!("xlsx {}: {}", name, e)))?;
        zip.write_all(content.as_bytes())
            .map_err(|e| FakturError::storage(format!("xlsx {}: {}", name, e)))?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| FakturError::storage(format!("xlsx finish: {}", e)))?;
    Ok(cursor.into_inner())
}

fn sheet_xml(entries: &[KpirEntry]) -> String {
    let mut rows = String::new();

    // header row: inline strings
    rows.push_str("<row r=\"1\">");
    for (index, name) in KPIR_COLUMNS.iter().enumerate() {
        rows.push_str(&inline_string_cell(index + 1, 1, name));
    }
    rows.push_str("</row>");

    for entry in entries {
        let row = entry.lp + 1;
        rows.push_str(&format!("<row r=\"{}\">", row));
        rows.push_str(&number_cell(1, row, Decimal::from(entry.lp as i64)));
        rows.push_str(&inline_string_cell(2, row, &entry.data_zdarzenia));
        rows.push_str(&inline_string_cell(3, row, &entry.nr_ksef));
        rows.push_str(&inline_string_cell(4, row, &entry.nr_dowodu));
        rows.push_str(&inline_string_cell(5, row, &entry.nip_kontrahenta));
        rows.push_str(&inline_string_cell(6, row, &entry.nazwa_kontrahenta));
        rows.push_str(&inline_string_cell(7, row, &entry.adres_kontrahenta));
        rows.push_str(&inline_string_cell(8, row, &entry.opis));
        rows.push_str(&opt_number_cell(9, row, entry.przychod_sprzedaz));
        rows.push_str(&opt_number_cell(10, row, entry.przychod_pozostaly));
        // column 11: total income formula
        rows.push_str(&formula_cell(11, row, &format!("I{row}+J{row}")));
        rows.push_str(&opt_number_cell(12, row, entry.zakup_towarow));
        rows.push_str(&opt_number_cell(13, row, entry.koszty_uboczne));
        rows.push_str(&opt_number_cell(14, row, entry.wynagrodzenia));
        rows.push_str(&opt_number_cell(15, row, entry.pozostale_wydatki));
        // column 16: total expense formula
        rows.push_str(&formula_cell(16, row, &format!("L{row}+M{row}+N{row}+O{row}")));
        rows.push_str(&opt_number_cell(17, row, entry.wydatki_przyszle));
        rows.push_str(&opt_number_cell(18, row, entry.koszty_br));
        rows.push_str(&inline_string_cell(19, row, &entry.uwagi));
        rows.push_str("</row>");
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">\
         <sheetData>{}</sheetData></worksheet>",
        rows
    )
}

fn cell_ref(column: usize, row: usize) -> String {
    format!("{}{}", column_letter(column), row)
}

fn inline_string_cell(column: usize, row: usize, value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    format!(
        "<c r=\"{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
        cell_ref(column, row),
        xml_escape(value)
    )
}

fn number_cell(column: usize, row: usize, value: Decimal) -> String {
    format!("<c r=\"{}\"><v>{}</v></c>", cell_ref(column, row), value)
}

fn opt_number_cell(column: usize, row: usize, value: Option<Decimal>) -> String {
    match value {
        Some(value) => format!(
            "<c r=\"{}\"><v>{}</v></c>",
            cell_ref(column, row),
            amount_dot(value)
        ),
        None => String::new(),
    }
}

fn formula_cell(column: usize, row: usize, formula: &str) -> String {
    format!("<c r=\"{}\"><f>{}</f></c>", cell_ref(column, row), formula)
}

#[cfg(test)]
mod tests {
    use super::*;
    use faktur_core::types::{Invoice, InvoiceSource};
    use std::io::Read;

    fn entries() -> Vec<KpirEntry> {
        let mut invoice = Invoice::new(InvoiceSource::Storage);
        invoice.invoice_number = Some("FV/1".to_string());
        invoice.net_amount = Some(Decimal::new(10000, 2));
        invoice.gross_amount = Some(Decimal::new(12300, 2));
        vec![KpirEntry::from_invoice(1, &invoice)]
    }

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn test_archive_has_all_parts() {
        let bytes = kpir_xlsx(&entries()).unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        for expected in [
            "[Content_Types].xml",
            "_rels/.rels",
            "xl/workbook.xml",
            "xl/_rels/workbook.xml.rels",
            "xl/worksheets/sheet1.xml",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_sheet_carries_total_formulas() {
        let bytes = kpir_xlsx(&entries()).unwrap();
        let sheet = read_part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains("<c r=\"K2\"><f>I2+J2</f></c>"));
        assert!(sheet.contains("<c r=\"P2\"><f>L2+M2+N2+O2</f></c>"));
    }

    #[test]
    fn test_header_is_inline_strings() {
        let bytes = kpir_xlsx(&entries()).unwrap();
        let sheet = read_part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains("<c r=\"A1\" t=\"inlineStr\"><is><t>lp</t></is></c>"));
        assert!(sheet.contains("<is><t>razem_wydatki</t></is>"));
    }

    #[test]
    fn test_formula_matches_row_arithmetic() {
        // the cost lands in column O (pozostale_wydatki); L+M+N+O must
        // equal the entry's razem_wydatki
        let entries = entries();
        let entry = &entries[0];
        let sum = entry.zakup_towarow.unwrap_or_default()
            + entry.koszty_uboczne.unwrap_or_default()
            + entry.wynagrodzenia.unwrap_or_default()
            + entry.pozostale_wydatki.unwrap_or_default();
        assert_eq!(sum, entry.razem_wydatki);

        let bytes = kpir_xlsx(&entries).unwrap();
        let sheet = read_part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains("<c r=\"O2\"><v>100.00</v></c>"));
    }
}

//! Shared rendering helpers for the format writers.

use crate::entry::round2;
use faktur_core::error::{FakturError, Result};
use rust_decimal::Decimal;

/// Amount with a dot decimal separator (XML/JSON targets).
pub fn amount_dot(amount: Decimal) -> String {
    format!("{:.2}", round2(amount))
}

/// Amount with a comma decimal separator (Polish CSV targets).
pub fn amount_pl(amount: Decimal) -> String {
    amount_dot(amount).replace('.', ",")
}

/// Escape XML special characters.
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Transcode to Windows-1250. Characters outside the code page are an
/// error, never silently replaced - Subiekt and Symfonia would corrupt
/// Polish text on import otherwise.
pub fn encode_windows_1250(text: &str) -> Result<Vec<u8>> {
    let (bytes, _, had_errors) = encoding_rs::WINDOWS_1250.encode(text);
    if had_errors {
        return Err(FakturError::encoding(
            "content contains characters not representable in Windows-1250".to_string(),
        ));
    }
    Ok(bytes.into_owned())
}

/// Spreadsheet column letter for a 1-based index: A..Z, AA..AZ, ...
pub fn column_letter(mut index: usize) -> String {
    debug_assert!(index >= 1);
    let mut letters = Vec::new();
    while index > 0 {
        index -= 1;
        letters.push(b'A' + (index % 26) as u8);
        index /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).expect("ascii letters")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_separators() {
        let amount = Decimal::new(123456, 2); // 1234.56
        assert_eq!(amount_dot(amount), "1234.56");
        assert_eq!(amount_pl(amount), "1234,56");
        assert_eq!(amount_pl(Decimal::ZERO), "0,00");
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(
            xml_escape(r#"Kowalski & Syn <"sp. z o.o.">"#),
            "Kowalski &amp; Syn &lt;&quot;sp. z o.o.&quot;&gt;"
        );
        assert_eq!(xml_escape("it's"), "it&apos;s");
    }

    #[test]
    fn test_windows_1250_roundtrip() {
        let bytes = encode_windows_1250("zażółć gęślą jaźń ZAŻÓŁĆ").unwrap();
        let (decoded, _, _) = encoding_rs::WINDOWS_1250.decode(&bytes);
        assert_eq!(decoded, "zażółć gęślą jaźń ZAŻÓŁĆ");
    }

    #[test]
    fn test_windows_1250_rejects_unmappable() {
        let err = encode_windows_1250("維基百科").unwrap_err();
        assert!(matches!(err, FakturError::Encoding(_)));
    }

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(11), "K");
        assert_eq!(column_letter(16), "P");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(52), "AZ");
        assert_eq!(column_letter(53), "BA");
    }
}

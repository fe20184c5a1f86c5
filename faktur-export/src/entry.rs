//! KPiR 2026 ledger entry: the flattened, locale-neutral projection every
//! format writer renders from.

use faktur_core::types::Invoice;
use rust_decimal::{Decimal, RoundingStrategy};

/// The 19 KPiR 2026 column names, in ledger order.
pub const KPIR_COLUMNS: [&str; 19] = [
    "lp",
    "data_zdarzenia",
    "nr_ksef",
    "nr_dowodu",
    "nip_kontrahenta",
    "nazwa_kontrahenta",
    "adres_kontrahenta",
    "opis",
    "przychod_sprzedaz",
    "przychod_pozostaly",
    "razem_przychod",
    "zakup_towarow",
    "koszty_uboczne",
    "wynagrodzenia",
    "pozostale_wydatki",
    "razem_wydatki",
    "wydatki_przyszle",
    "koszty_br",
    "uwagi",
];

/// Target expense column (1-based KPiR index) for an expense category.
pub fn expense_column(category: Option<&str>) -> usize {
    match category {
        Some("zakup_towarow") | Some("towary") => 12,
        Some("koszty_uboczne") => 13,
        Some("wynagrodzenia") => 14,
        Some("rmk") => 17,
        Some(c) if c.starts_with("br_") => 18,
        _ => 15,
    }
}

/// Side-channel metadata consumed by format-specific writers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryMeta {
    pub category: Option<String>,
    pub mpk: Option<String>,
    pub vat_amount: Option<Decimal>,
    pub gross_amount: Option<Decimal>,
    pub net_amount: Option<Decimal>,
    pub currency: String,
}

/// One KPiR row. Amount columns hold `None` when the column does not apply
/// to this entry; totals are always present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KpirEntry {
    pub lp: usize,
    pub data_zdarzenia: String,
    pub nr_ksef: String,
    pub nr_dowodu: String,
    pub nip_kontrahenta: String,
    pub nazwa_kontrahenta: String,
    pub adres_kontrahenta: String,
    pub opis: String,
    pub przychod_sprzedaz: Option<Decimal>,
    pub przychod_pozostaly: Option<Decimal>,
    pub razem_przychod: Decimal,
    pub zakup_towarow: Option<Decimal>,
    pub koszty_uboczne: Option<Decimal>,
    pub wynagrodzenia: Option<Decimal>,
    pub pozostale_wydatki: Option<Decimal>,
    pub razem_wydatki: Decimal,
    pub wydatki_przyszle: Option<Decimal>,
    pub koszty_br: Option<Decimal>,
    pub uwagi: String,
    pub meta: EntryMeta,
}

/// Round half away from zero to two decimals.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

impl KpirEntry {
    /// Build the ledger row for one approved invoice. `lp` is 1-based.
    pub fn from_invoice(lp: usize, invoice: &Invoice) -> Self {
        let parsed = invoice.parsed_data.as_ref();

        let nip = invoice
            .effective_nip()
            .map(|n| n.to_string())
            .unwrap_or_default();
        let name = invoice
            .contractor_name
            .clone()
            .or_else(|| parsed.and_then(|p| p.seller_name.clone()))
            .unwrap_or_default();
        let number = invoice
            .invoice_number
            .clone()
            .or_else(|| parsed.and_then(|p| p.invoice_number.clone()))
            .unwrap_or_default();
        let date = invoice
            .issue_date
            .clone()
            .or_else(|| parsed.and_then(|p| p.issue_date.clone()))
            .unwrap_or_default();
        let opis = invoice
            .description
            .clone()
            .or_else(|| invoice.category.clone())
            .unwrap_or_default();

        // KSeF reference is the provider id segment of the source key
        let nr_ksef = invoice
            .source_key
            .as_deref()
            .and_then(|key| key.strip_prefix("ksef:"))
            .unwrap_or_default()
            .to_string();

        let net = invoice
            .net_amount
            .or_else(|| parsed.and_then(|p| p.net_amount))
            .map(round2);
        let vat = invoice
            .vat_amount
            .or_else(|| parsed.and_then(|p| p.vat_amount))
            .map(round2);
        let gross = invoice
            .gross_amount
            .or_else(|| parsed.and_then(|p| p.gross_amount))
            .map(round2);

        // the KPiR books the net cost; fall back to gross when no net known
        let cost = net.or(gross).unwrap_or_default();
        let column = expense_column(invoice.category.as_deref());

        let mut entry = Self {
            lp,
            data_zdarzenia: date,
            nr_ksef,
            nr_dowodu: number,
            nip_kontrahenta: nip,
            nazwa_kontrahenta: name,
            adres_kontrahenta: String::new(),
            opis,
            razem_przychod: Decimal::ZERO,
            uwagi: String::new(),
            meta: EntryMeta {
                category: invoice.category.clone(),
                mpk: invoice.mpk.clone(),
                vat_amount: vat,
                gross_amount: gross,
                net_amount: net,
                currency: invoice.currency.clone(),
            },
            ..Default::default()
        };

        match column {
            12 => entry.zakup_towarow = Some(cost),
            13 => entry.koszty_uboczne = Some(cost),
            14 => entry.wynagrodzenia = Some(cost),
            17 => entry.wydatki_przyszle = Some(cost),
            18 => entry.koszty_br = Some(cost),
            _ => entry.pozostale_wydatki = Some(cost),
        }

        entry.razem_przychod = round2(
            entry.przychod_sprzedaz.unwrap_or_default()
                + entry.przychod_pozostaly.unwrap_or_default(),
        );
        entry.razem_wydatki = round2(
            entry.zakup_towarow.unwrap_or_default()
                + entry.koszty_uboczne.unwrap_or_default()
                + entry.wynagrodzenia.unwrap_or_default()
                + entry.pozostale_wydatki.unwrap_or_default(),
        );

        entry
    }

    /// All 19 cells rendered with the given amount formatter. Absent amount
    /// columns render empty; totals always render.
    pub fn cells(&self, fmt: impl Fn(Decimal) -> String) -> [String; 19] {
        let opt = |amount: Option<Decimal>| amount.map(&fmt).unwrap_or_default();
        [
            self.lp.to_string(),
            self.data_zdarzenia.clone(),
            self.nr_ksef.clone(),
            self.nr_dowodu.clone(),
            self.nip_kontrahenta.clone(),
            self.nazwa_kontrahenta.clone(),
            self.adres_kontrahenta.clone(),
            self.opis.clone(),
            opt(self.przychod_sprzedaz),
            opt(self.przychod_pozostaly),
            fmt(self.razem_przychod),
            opt(self.zakup_towarow),
            opt(self.koszty_uboczne),
            opt(self.wynagrodzenia),
            opt(self.pozostale_wydatki),
            fmt(self.razem_wydatki),
            opt(self.wydatki_przyszle),
            opt(self.koszty_br),
            self.uwagi.clone(),
        ]
    }
}

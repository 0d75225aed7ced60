//! Anlage SO tax report — spec §6. Emits per-disposal rows as CSV,
//! JSON, and a plain-text yearly summary with Freigrenze evaluation.

use crate::ledger::{Disposal, FifoLedger, TaxLot};
use crate::money::Eur;
use crate::tax_agent::TaxAgentConfig;
use chrono::Datelike;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, Serialize)]
pub struct AnlageSoRow {
    pub asset_type: String,
    pub acquisition_date: String,
    pub disposal_date: String,
    pub proceeds_eur: String,
    pub cost_basis_eur: String,
    pub fees_eur: String,
    pub gain_loss_eur: String,
    pub holding_exceeded_bool: bool,
    pub lot_id: String,
    pub disposal_id: String,
}

fn row_for(disposal: &Disposal, lot: &TaxLot) -> AnlageSoRow {
    // `sale_fee_usd_portion` is USD; the Anlage SO row's `fees_eur` field
    // is EUR, converted at the same rate the disposal itself used.
    let fees_eur = Eur::new(disposal.sale_fee_usd_portion.raw() / disposal.eur_usd_rate_at_sale);
    AnlageSoRow {
        asset_type: "Bitcoin".to_string(),
        acquisition_date: lot.purchased_at.date_naive().to_string(),
        disposal_date: disposal.disposed_at.date_naive().to_string(),
        proceeds_eur: disposal.proceeds_eur.to_string(),
        cost_basis_eur: disposal.cost_basis_eur.to_string(),
        fees_eur: fees_eur.to_string(),
        gain_loss_eur: disposal.gain_loss_eur.to_string(),
        holding_exceeded_bool: !disposal.is_taxable,
        lot_id: disposal.lot_id.clone(),
        disposal_id: disposal.disposal_id.clone(),
    }
}

pub fn rows_for_year(ledger: &FifoLedger, year: i32) -> Vec<AnlageSoRow> {
    ledger
        .disposals()
        .iter()
        .filter(|d| d.disposed_at.year() == year)
        .filter_map(|d| {
            ledger
                .lots()
                .iter()
                .find(|l| l.lot_id == d.lot_id)
                .map(|lot| row_for(d, lot))
        })
        .collect()
}

pub fn to_csv(rows: &[AnlageSoRow]) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes).expect("csv writer only emits UTF-8"))
}

pub fn to_json(rows: &[AnlageSoRow]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(rows)
}

/// Plain-text yearly summary including the Freigrenze evaluation.
pub fn to_text_summary(ledger: &FifoLedger, year: i32, config: &TaxAgentConfig) -> String {
    let rows = rows_for_year(ledger, year);
    let realized = ledger.ytd_realized_gain_eur(year);
    let exemption = config.annual_exemption_eur;
    let mut out = Vec::new();

    writeln!(out, "Anlage SO summary — tax year {year}").unwrap();
    writeln!(out, "disposals: {}", rows.len()).unwrap();
    writeln!(out, "realized taxable gain: {realized} EUR").unwrap();
    writeln!(out, "Freigrenze (annual exemption): {exemption} EUR").unwrap();
    if realized.raw() <= exemption.raw() {
        writeln!(out, "within Freigrenze: entire year's gain is tax-free ({realized} <= {exemption})").unwrap();
    } else {
        writeln!(
            out,
            "Freigrenze exceeded: entire year's gain is taxable ({realized} > {exemption})"
        )
        .unwrap();
    }
    String::from_utf8(out).unwrap()
}

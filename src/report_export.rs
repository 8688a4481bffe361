use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::rankings::categorize;
use crate::valuation::ScoredPlayer;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub players: usize,
    pub undervalued: usize,
    pub top_performers: usize,
    pub rising_stars: usize,
    pub hidden_gems: usize,
    pub bargains: usize,
}

const HEADER: [&str; 20] = [
    "ID",
    "Player",
    "Team",
    "League",
    "Country",
    "Tier",
    "Position",
    "Age",
    "Nationality",
    "Market Value (€M)",
    "Fair Value (€M)",
    "Fee Paid (€M)",
    "Rumored (€M)",
    "Undervaluation %",
    "Value Source",
    "xGI/90",
    "Goals",
    "Assists",
    "xG",
    "xA",
];

/// Write every scored player to an `.xlsx` workbook: an "All" sheet plus one
/// sheet per bucket, each in full.
pub fn export_players(path: &Path, players: &[ScoredPlayer]) -> Result<ExportSummary> {
    let (mut workbook, summary) = build_workbook(players)?;
    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;
    Ok(summary)
}

/// Same workbook, returned as bytes.
pub fn export_players_to_buffer(players: &[ScoredPlayer]) -> Result<Vec<u8>> {
    let (mut workbook, _) = build_workbook(players)?;
    workbook.save_to_buffer().context("failed encoding workbook")
}

fn build_workbook(players: &[ScoredPlayer]) -> Result<(Workbook, ExportSummary)> {
    let buckets = categorize(players);
    let sheets: [(&str, &[ScoredPlayer]); 6] = [
        ("All", players),
        ("Undervalued", &buckets.undervalued),
        ("TopPerformers", &buckets.top_performers),
        ("RisingStars", &buckets.rising_stars),
        ("HiddenGems", &buckets.hidden_gems),
        ("Bargains", &buckets.bargains),
    ];

    let mut workbook = Workbook::new();
    for (name, rows) in sheets {
        let sheet = workbook.add_worksheet();
        sheet.set_name(name)?;
        write_rows(sheet, &player_rows(rows))?;
    }

    let summary = ExportSummary {
        players: players.len(),
        undervalued: buckets.undervalued.len(),
        top_performers: buckets.top_performers.len(),
        rising_stars: buckets.rising_stars.len(),
        hidden_gems: buckets.hidden_gems.len(),
        bargains: buckets.bargains.len(),
    };
    Ok((workbook, summary))
}

fn player_rows(players: &[ScoredPlayer]) -> Vec<Vec<Cell>> {
    let mut rows = Vec::with_capacity(players.len() + 1);
    rows.push(HEADER.iter().map(|h| Cell::Text(h.to_string())).collect());
    rows.extend(players.iter().map(player_row));
    rows
}

pub fn player_row(p: &ScoredPlayer) -> Vec<Cell> {
    vec![
        Cell::Number(f64::from(p.id)),
        Cell::Text(p.name.clone()),
        Cell::Text(p.team.clone()),
        Cell::Text(p.league.clone()),
        Cell::Text(p.country.clone()),
        Cell::Number(f64::from(p.tier)),
        Cell::Text(p.position.clone()),
        Cell::Number(f64::from(p.age)),
        Cell::Text(p.nationality.clone()),
        Cell::Number(p.market_value_eur_m),
        Cell::Number(p.fair_value_eur_m),
        opt_number(p.transfer_fee_paid_eur_m),
        opt_number(p.rumored_value_eur_m),
        Cell::Number(p.undervaluation_pct),
        Cell::Text(format!("{:?}", p.value_source).to_lowercase()),
        Cell::Number(p.xgi_per_90),
        Cell::Number(f64::from(p.goals)),
        Cell::Number(f64::from(p.assists)),
        Cell::Number(p.xg),
        Cell::Number(p.xa),
    ]
}

fn opt_number(value: Option<f64>) -> Cell {
    value.map(Cell::Number).unwrap_or(Cell::Empty)
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<Cell>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, cell) in row.iter().enumerate() {
            let (r, c) = (row_idx as u32, col_idx as u16);
            match cell {
                Cell::Text(value) => worksheet.write_string(r, c, value).map(|_| ()),
                Cell::Number(value) => worksheet.write_number(r, c, *value).map(|_| ()),
                Cell::Empty => Ok(()),
            }
            .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}

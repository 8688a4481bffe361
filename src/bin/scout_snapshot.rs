use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use scoutlens::config::{ServerConfig, app_cache_dir};
use scoutlens::leagues::leagues_from_codes;
use scoutlens::market_values::MarketValueTable;
use scoutlens::pipeline::collect_players;
use scoutlens::rankings::build_players_report;
use scoutlens::report_export;
use scoutlens::scorers_fetch::FootballDataClient;

/// Fetch every configured league once and write the players report as JSON
/// plus a workbook of the scored players.
fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scoutlens=info")),
        )
        .init();

    let config = ServerConfig::from_env();
    let key = config
        .football_data_key
        .clone()
        .ok_or_else(|| anyhow!("FOOTBALL_DATA_KEY is required"))?;
    let leagues = parse_arg("--leagues")
        .map(|raw| leagues_from_codes(&raw))
        .unwrap_or_else(|| config.leagues.clone());
    let out_dir = parse_arg("--out")
        .map(PathBuf::from)
        .or_else(|| app_cache_dir().map(|dir| dir.join("snapshots")))
        .context("unable to resolve output directory")?;
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("create output dir {}", out_dir.display()))?;

    let table = MarketValueTable::load(config.market_values_path.as_deref())?;
    let client = FootballDataClient::new(key).with_limit(config.scorers_limit);
    let now = Utc::now();
    let output = collect_players(&client, &leagues, config.league_delay, &table, now);
    let report = build_players_report(&output.players, &leagues, &config.report_meta(), now);

    let stamp = now.format("%Y%m%d-%H%M%S");
    let json_path = out_dir.join(format!("players-{stamp}.json"));
    let json = serde_json::to_string_pretty(&report).context("serialize players report")?;
    fs::write(&json_path, json)
        .with_context(|| format!("write {}", json_path.display()))?;

    let xlsx_path = out_dir.join(format!("players-{stamp}.xlsx"));
    let summary = report_export::export_players(&xlsx_path, &output.players)?;

    println!("Snapshot complete");
    println!("Market values: {} ({})", table.version(), table.len());
    println!("Players: {}", summary.players);
    println!(
        "Undervalued: {}  Rising: {}  Hidden gems: {}  Bargains: {}",
        summary.undervalued, summary.rising_stars, summary.hidden_gems, summary.bargains
    );
    if !output.failed_leagues.is_empty() {
        println!("Failed leagues: {}", output.failed_leagues.join(", "));
    }
    println!("JSON: {}", json_path.display());
    println!("XLSX: {}", xlsx_path.display());
    Ok(())
}

fn parse_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

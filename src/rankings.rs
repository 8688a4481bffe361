use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::leagues::{League, countries_covered};
use crate::valuation::ScoredPlayer;

const UNDERVALUED_MIN_PCT: f64 = 10.0;
const RISING_STAR_MAX_AGE: u32 = 23;
const HIDDEN_GEM_MIN_XGI: f64 = 0.4;
const BARGAIN_MARGIN: f64 = 1.2;
const BARGAIN_LIMIT: usize = 10;

/// How many entries of a bucket are free and where the Pro preview stops.
#[derive(Debug, Clone, Copy)]
struct Split {
    free: usize,
    pro_end: usize,
}

const UNDERVALUED_SPLIT: Split = Split { free: 5, pro_end: 30 };
const PERFORMERS_SPLIT: Split = Split { free: 5, pro_end: 25 };
const RISING_SPLIT: Split = Split { free: 5, pro_end: 20 };
const HIDDEN_GEMS_SPLIT: Split = Split { free: 3, pro_end: 15 };

/// Full, unpaginated buckets.
#[derive(Debug, Clone, Default)]
pub struct Buckets {
    pub undervalued: Vec<ScoredPlayer>,
    pub top_performers: Vec<ScoredPlayer>,
    pub rising_stars: Vec<ScoredPlayer>,
    pub hidden_gems: Vec<ScoredPlayer>,
    pub bargains: Vec<ScoredPlayer>,
}

pub fn categorize(players: &[ScoredPlayer]) -> Buckets {
    let mut undervalued: Vec<ScoredPlayer> = players
        .iter()
        .filter(|p| p.undervaluation_pct > UNDERVALUED_MIN_PCT)
        .cloned()
        .collect();
    undervalued.sort_by(|a, b| desc(a.undervaluation_pct, b.undervaluation_pct));

    let mut top_performers: Vec<ScoredPlayer> = players.to_vec();
    top_performers.sort_by(|a, b| desc(a.xgi_per_90, b.xgi_per_90));

    let mut rising_stars: Vec<ScoredPlayer> = players
        .iter()
        .filter(|p| p.age <= RISING_STAR_MAX_AGE)
        .cloned()
        .collect();
    rising_stars.sort_by(|a, b| desc(a.xgi_per_90, b.xgi_per_90));

    let mut hidden_gems: Vec<ScoredPlayer> = players
        .iter()
        .filter(|p| p.tier >= 2 && p.xgi_per_90 > HIDDEN_GEM_MIN_XGI)
        .cloned()
        .collect();
    hidden_gems.sort_by(|a, b| desc(a.undervaluation_pct, b.undervaluation_pct));

    let mut bargains: Vec<ScoredPlayer> = players
        .iter()
        .filter(|p| {
            p.transfer_fee_paid_eur_m
                .is_some_and(|fee| fee > 0.0 && p.fair_value_eur_m > fee * BARGAIN_MARGIN)
        })
        .cloned()
        .collect();
    bargains.sort_by(|a, b| desc(bargain_gain(a), bargain_gain(b)));
    bargains.truncate(BARGAIN_LIMIT);

    Buckets {
        undervalued,
        top_performers,
        rising_stars,
        hidden_gems,
        bargains,
    }
}

fn bargain_gain(p: &ScoredPlayer) -> f64 {
    p.fair_value_eur_m - p.transfer_fee_paid_eur_m.unwrap_or(0.0)
}

// Stable descending order; NaN sorts last.
fn desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => b.total_cmp(&a),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    }
}

/// Pro entries only reveal who, never the numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockedPreview {
    pub name: String,
    pub team: String,
    pub league: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub locked: bool,
}

impl LockedPreview {
    fn of(p: &ScoredPlayer) -> Self {
        Self {
            name: p.name.clone(),
            team: p.team.clone(),
            league: p.league.clone(),
            country: None,
            locked: true,
        }
    }

    fn with_country(p: &ScoredPlayer) -> Self {
        Self {
            country: Some(p.country.clone()),
            ..Self::of(p)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeTier {
    pub undervalued: Vec<ScoredPlayer>,
    pub top_performers: Vec<ScoredPlayer>,
    pub rising_stars: Vec<ScoredPlayer>,
    pub hidden_gems: Vec<ScoredPlayer>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProTier {
    pub undervalued: Vec<LockedPreview>,
    pub top_performers: Vec<LockedPreview>,
    pub rising_stars: Vec<LockedPreview>,
    pub hidden_gems: Vec<LockedPreview>,
    pub bargains: Vec<LockedPreview>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    pub total_undervalued: usize,
    pub total_rising_stars: usize,
    pub total_hidden_gems: usize,
    pub leagues_covered: usize,
    pub countries_covered: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayersReport {
    pub last_updated: String,
    pub data_source: String,
    pub season: String,
    pub update_frequency: String,
    pub total_players: usize,
    pub free: FreeTier,
    pub pro: ProTier,
    pub stats: ReportStats,
}

#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub data_source: String,
    pub season: String,
    pub update_frequency: String,
}

impl Default for ReportMeta {
    fn default() -> Self {
        Self {
            data_source: "football-data.org + transfermarkt".to_string(),
            season: "2024-25".to_string(),
            update_frequency: "live".to_string(),
        }
    }
}

pub fn build_players_report(
    players: &[ScoredPlayer],
    leagues: &[League],
    meta: &ReportMeta,
    now: DateTime<Utc>,
) -> PlayersReport {
    let buckets = categorize(players);
    let free = FreeTier {
        undervalued: free_part(&buckets.undervalued, UNDERVALUED_SPLIT),
        top_performers: free_part(&buckets.top_performers, PERFORMERS_SPLIT),
        rising_stars: free_part(&buckets.rising_stars, RISING_SPLIT),
        hidden_gems: free_part(&buckets.hidden_gems, HIDDEN_GEMS_SPLIT),
    };
    let pro = ProTier {
        undervalued: pro_part(&buckets.undervalued, UNDERVALUED_SPLIT, LockedPreview::of),
        top_performers: pro_part(&buckets.top_performers, PERFORMERS_SPLIT, LockedPreview::of),
        rising_stars: pro_part(&buckets.rising_stars, RISING_SPLIT, LockedPreview::of),
        hidden_gems: pro_part(
            &buckets.hidden_gems,
            HIDDEN_GEMS_SPLIT,
            LockedPreview::with_country,
        ),
        bargains: buckets.bargains.iter().map(LockedPreview::of).collect(),
    };
    let stats = ReportStats {
        total_undervalued: buckets.undervalued.len(),
        total_rising_stars: buckets.rising_stars.len(),
        total_hidden_gems: buckets.hidden_gems.len(),
        leagues_covered: leagues.len(),
        countries_covered: countries_covered(leagues),
    };

    PlayersReport {
        last_updated: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        data_source: meta.data_source.clone(),
        season: meta.season.clone(),
        update_frequency: meta.update_frequency.clone(),
        total_players: players.len(),
        free,
        pro,
        stats,
    }
}

fn free_part(bucket: &[ScoredPlayer], split: Split) -> Vec<ScoredPlayer> {
    bucket.iter().take(split.free).cloned().collect()
}

fn pro_part(
    bucket: &[ScoredPlayer],
    split: Split,
    preview: fn(&ScoredPlayer) -> LockedPreview,
) -> Vec<LockedPreview> {
    bucket
        .iter()
        .take(split.pro_end)
        .skip(split.free)
        .map(preview)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{ReportMeta, build_players_report, categorize};
    use crate::leagues::all_leagues;
    use crate::valuation::{ScoredPlayer, ValueSource};

    fn player(id: u32, undervaluation: f64, xgi: f64, age: u32, tier: u8) -> ScoredPlayer {
        ScoredPlayer {
            id,
            name: format!("Player {id}"),
            team: "Club".to_string(),
            league: if tier == 2 { "Eredivisie" } else { "Premier League" }.to_string(),
            country: if tier == 2 { "Netherlands" } else { "England" }.to_string(),
            tier,
            position: "O".to_string(),
            age,
            nationality: String::new(),
            market_value_eur_m: 10.0,
            fair_value_eur_m: 10.0 * (1.0 + undervaluation / 100.0),
            transfer_fee_paid_eur_m: None,
            rumored_value_eur_m: None,
            undervaluation_pct: undervaluation,
            value_source: ValueSource::Calculated,
            is_hidden_gem: tier == 2,
            xgi_per_90: xgi,
            goals: 0,
            assists: 0,
            xg: 0.0,
            xa: 0.0,
            minutes_played: 900,
            games: 12,
        }
    }

    #[test]
    fn undervalued_needs_more_than_ten_percent() {
        let players = vec![
            player(1, 10.0, 0.1, 26, 1),
            player(2, 35.0, 0.1, 26, 1),
            player(3, 12.5, 0.1, 26, 1),
        ];
        let buckets = categorize(&players);
        let ids: Vec<u32> = buckets.undervalued.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn rising_stars_and_hidden_gems_filter() {
        let players = vec![
            player(1, 0.0, 0.9, 23, 1),
            player(2, 0.0, 0.5, 24, 2),
            player(3, 20.0, 0.3, 20, 2),
            player(4, 5.0, 0.6, 30, 2),
        ];
        let buckets = categorize(&players);
        let rising: Vec<u32> = buckets.rising_stars.iter().map(|p| p.id).collect();
        assert_eq!(rising, vec![1, 3]);
        let gems: Vec<u32> = buckets.hidden_gems.iter().map(|p| p.id).collect();
        assert_eq!(gems, vec![4, 2]);
    }

    #[test]
    fn ties_keep_fetch_order() {
        let players = vec![player(1, 0.0, 0.5, 26, 1), player(2, 0.0, 0.5, 26, 1)];
        let buckets = categorize(&players);
        assert_eq!(buckets.top_performers[0].id, 1);
        assert_eq!(buckets.top_performers[1].id, 2);
    }

    #[test]
    fn bargains_need_fee_margin() {
        let mut cheap = player(1, 0.0, 0.5, 26, 1);
        cheap.transfer_fee_paid_eur_m = Some(5.0);
        cheap.fair_value_eur_m = 30.0;
        let mut fair = player(2, 0.0, 0.5, 26, 1);
        fair.transfer_fee_paid_eur_m = Some(25.0);
        fair.fair_value_eur_m = 29.0;
        let mut small = player(3, 0.0, 0.5, 26, 1);
        small.transfer_fee_paid_eur_m = Some(2.0);
        small.fair_value_eur_m = 6.0;
        let buckets = categorize(&[fair, small, cheap]);
        let ids: Vec<u32> = buckets.bargains.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn report_splits_free_and_locked_pro() {
        let players: Vec<ScoredPlayer> = (1..=40)
            .map(|id| player(id, 10.0 + id as f64, id as f64 / 50.0, 22, if id % 4 == 0 { 2 } else { 1 }))
            .collect();
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let report = build_players_report(&players, &all_leagues(), &ReportMeta::default(), now);

        assert_eq!(report.total_players, 40);
        assert_eq!(report.last_updated, "2025-01-02T03:04:05.000Z");
        assert_eq!(report.free.undervalued.len(), 5);
        assert_eq!(report.free.undervalued[0].id, 40);
        assert_eq!(report.pro.undervalued.len(), 25);
        assert_eq!(report.free.top_performers.len(), 5);
        assert_eq!(report.pro.top_performers.len(), 20);
        assert_eq!(report.pro.rising_stars.len(), 15);
        assert_eq!(report.free.hidden_gems.len(), 3);
        assert!(report.pro.undervalued.iter().all(|p| p.locked && p.country.is_none()));
        assert!(report.pro.hidden_gems.iter().all(|p| p.country.as_deref() == Some("Netherlands")));
        assert_eq!(report.stats.total_undervalued, 40);
        assert_eq!(report.stats.leagues_covered, 9);
        assert_eq!(report.stats.countries_covered, 7);

        // Free entries never repeat in the locked part.
        let free_names: Vec<&str> = report.free.undervalued.iter().map(|p| p.name.as_str()).collect();
        assert!(report.pro.undervalued.iter().all(|p| !free_names.contains(&p.name.as_str())));
    }

    #[test]
    fn locked_preview_json_hides_stats() {
        let players = (1..=8).map(|id| player(id, 50.0, 0.5, 26, 1)).collect::<Vec<_>>();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let report = build_players_report(&players, &all_leagues(), &ReportMeta::default(), now);
        let json = serde_json::to_value(&report).expect("serializes");
        let locked = &json["pro"]["undervalued"][0];
        assert_eq!(locked["locked"], true);
        assert!(locked.get("fair_value_eur_m").is_none());
        assert!(locked.get("country").is_none());
        assert!(json["free"]["topPerformers"][0].get("xG").is_some());
        assert_eq!(json["dataSource"], "football-data.org + transfermarkt");
    }
}

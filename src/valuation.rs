use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::leagues::League;
use crate::market_values::{MarketValueRecord, MarketValueTable};
use crate::scorers_fetch::Scorer;

const DEFAULT_AGE: u32 = 25;
const MINUTES_PER_GAME: u32 = 75;
const ASSIST_WEIGHT: f64 = 0.7;
const OUTPERFORM_DAMPING: f64 = 0.5;
const FAIR_VALUE_CAP: f64 = 2.5;
const LOWER_LEAGUE_BOOST: f64 = 0.3;

const NON_PENALTY_XG: f64 = 0.92;
const PENALTY_XG: f64 = 0.76;
const ASSIST_XA: f64 = 0.88;

/// Season numbers for one scorer after boundary defaults have been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStat {
    pub name: String,
    pub team: String,
    pub league: League,
    pub position: String,
    pub age: u32,
    pub nationality: String,
    pub goals: u32,
    pub assists: u32,
    pub penalties: u32,
    pub games: u32,
    pub minutes: u32,
}

impl PlayerStat {
    /// Every upstream field is optional; missing ones fall back to neutral defaults.
    pub fn from_scorer(scorer: &Scorer, league: League, today: NaiveDate) -> Self {
        let goals = scorer.goals.unwrap_or(0);
        let games = scorer.played_matches.filter(|g| *g > 0).unwrap_or(1);
        let position = scorer
            .position
            .as_deref()
            .and_then(|p| p.trim().chars().next())
            .unwrap_or('F')
            .to_string();
        Self {
            name: non_empty(scorer.name.as_deref()).unwrap_or("Unknown").to_string(),
            team: non_empty(scorer.team.as_deref()).unwrap_or("Unknown").to_string(),
            league,
            position,
            age: scorer
                .date_of_birth
                .as_deref()
                .and_then(|dob| age_on(dob, today))
                .unwrap_or(DEFAULT_AGE),
            nationality: scorer.nationality.clone().unwrap_or_default(),
            goals,
            assists: scorer.assists.unwrap_or(0),
            penalties: scorer.penalties.unwrap_or(0).min(goals),
            games,
            minutes: games.saturating_mul(MINUTES_PER_GAME),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Transfermarkt,
    Calculated,
}

/// One row of the players report, in the shape the front-end consumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPlayer {
    pub id: u32,
    pub name: String,
    pub team: String,
    pub league: String,
    pub country: String,
    pub tier: u8,
    pub position: String,
    pub age: u32,
    pub nationality: String,
    pub market_value_eur_m: f64,
    pub fair_value_eur_m: f64,
    pub transfer_fee_paid_eur_m: Option<f64>,
    pub rumored_value_eur_m: Option<f64>,
    pub undervaluation_pct: f64,
    pub value_source: ValueSource,
    pub is_hidden_gem: bool,
    pub xgi_per_90: f64,
    pub goals: u32,
    pub assists: u32,
    #[serde(rename = "xG")]
    pub xg: f64,
    #[serde(rename = "xA")]
    pub xa: f64,
    pub minutes_played: u32,
    pub games: u32,
}

/// Peaks for players up to 24 and only steps down after that.
pub fn age_multiplier(age: u32) -> f64 {
    match age {
        0..=21 => 1.3,
        22..=24 => 1.15,
        25..=27 => 1.0,
        28..=29 => 0.85,
        30..=31 => 0.65,
        32..=33 => 0.45,
        _ => 0.3,
    }
}

/// Goal involvements per game a player in this price bracket is expected to produce.
pub fn expected_output(market_value: f64) -> f64 {
    if market_value >= 50.0 {
        0.65
    } else if market_value >= 30.0 {
        0.5
    } else if market_value >= 15.0 {
        0.35
    } else if market_value >= 8.0 {
        0.25
    } else {
        0.15
    }
}

pub fn output_per_game(goals: u32, assists: u32, games: u32) -> f64 {
    let games = games.max(1) as f64;
    goals as f64 / games + ASSIST_WEIGHT * (assists as f64 / games)
}

/// Fair value for a given performance ratio. Outperformance pays off at half rate.
pub fn fair_value_for_ratio(
    ratio: f64,
    market_value: f64,
    age: u32,
    league_multiplier: f64,
) -> f64 {
    let mut fair = if ratio > 1.0 {
        market_value * (1.0 + (ratio - 1.0) * OUTPERFORM_DAMPING)
    } else {
        market_value * ratio
    };

    fair *= age_multiplier(age);

    if league_multiplier < 1.0 {
        fair *= 1.0 + (1.0 - league_multiplier) * LOWER_LEAGUE_BOOST;
    }

    // Lower bound wins when 2.5x market value is below 1.
    let capped = fair.min(market_value * FAIR_VALUE_CAP).max(1.0);
    round_to(capped, 1)
}

pub fn fair_value(
    goals: u32,
    assists: u32,
    games: u32,
    age: u32,
    league_multiplier: f64,
    market_value: f64,
) -> f64 {
    let ratio = output_per_game(goals, assists, games) / expected_output(market_value);
    fair_value_for_ratio(ratio, market_value, age, league_multiplier)
}

/// Cruder estimate for players missing from the market value table.
pub fn fallback_market_value(
    goals: u32,
    assists: u32,
    games: u32,
    age: u32,
    league_multiplier: f64,
) -> f64 {
    let games = games.max(1) as f64;
    let perf = (goals as f64 / games) * 1.2 + (assists as f64 / games) * 0.8;
    let estimate = perf * 35.0 * league_multiplier * age_multiplier(age);
    round_to(estimate.clamp(2.0, 80.0), 1)
}

pub fn undervaluation_pct(fair: f64, market_value: f64) -> f64 {
    if market_value > 0.0 {
        round_to((fair - market_value) / market_value * 100.0, 1)
    } else {
        0.0
    }
}

/// Linear stand-ins for expected goals / assists. Returns (xg, xa).
pub fn expected_contributions(goals: u32, assists: u32, penalties: u32) -> (f64, f64) {
    let penalties = penalties.min(goals);
    let non_penalty = (goals - penalties) as f64;
    let xg = non_penalty * NON_PENALTY_XG + penalties as f64 * PENALTY_XG;
    let xa = assists as f64 * ASSIST_XA;
    (xg, xa)
}

pub fn per_90(value: f64, minutes: u32) -> f64 {
    if minutes == 0 {
        return 0.0;
    }
    value / (minutes as f64 / 90.0)
}

pub fn score_player(stat: PlayerStat, table: &MarketValueTable) -> ScoredPlayer {
    let record = table.resolve(&stat.name);
    score_with_record(stat, record)
}

pub fn score_with_record(stat: PlayerStat, record: Option<&MarketValueRecord>) -> ScoredPlayer {
    let multiplier = stat.league.multiplier;
    let (market_value, fee_paid, rumored, source) = match record {
        Some(r) => (
            r.value,
            Some(r.paid).filter(|v| *v > 0.0),
            r.rumored.filter(|v| *v > 0.0),
            ValueSource::Transfermarkt,
        ),
        None => (
            fallback_market_value(stat.goals, stat.assists, stat.games, stat.age, multiplier),
            None,
            None,
            ValueSource::Calculated,
        ),
    };

    let (xg, xa) = expected_contributions(stat.goals, stat.assists, stat.penalties);
    let xgi_per_90 = per_90(xg + xa, stat.minutes);
    let fair = fair_value(
        stat.goals,
        stat.assists,
        stat.games,
        stat.age,
        multiplier,
        market_value,
    );

    ScoredPlayer {
        id: 0,
        name: stat.name,
        team: stat.team,
        league: stat.league.name.to_string(),
        country: stat.league.country.to_string(),
        tier: stat.league.tier,
        position: stat.position,
        age: stat.age,
        nationality: stat.nationality,
        market_value_eur_m: market_value,
        fair_value_eur_m: fair,
        transfer_fee_paid_eur_m: fee_paid,
        rumored_value_eur_m: rumored,
        undervaluation_pct: undervaluation_pct(fair, market_value),
        value_source: source,
        is_hidden_gem: stat.league.is_lower_tier(),
        xgi_per_90: round_to(xgi_per_90, 2),
        goals: stat.goals,
        assists: stat.assists,
        xg: round_to(xg, 1),
        xa: round_to(xa, 1),
        minutes_played: stat.minutes,
        games: stat.games,
    }
}

/// Whole years between a `YYYY-MM-DD` birth date (time suffix ignored) and `today`.
pub fn age_on(date_of_birth: &str, today: NaiveDate) -> Option<u32> {
    let day_part = date_of_birth.trim().get(..10)?;
    let birth = NaiveDate::parse_from_str(day_part, "%Y-%m-%d").ok()?;
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    u32::try_from(age).ok()
}

/// Halves round up, toward positive infinity, so -18.75 becomes -18.7.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor + 0.5).floor() / factor
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        PlayerStat, ValueSource, age_multiplier, age_on, expected_contributions, fair_value,
        fair_value_for_ratio, fallback_market_value, round_to, score_with_record,
        undervaluation_pct,
    };
    use crate::leagues::league_by_code;
    use crate::market_values::MarketValueRecord;
    use crate::scorers_fetch::Scorer;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date")
    }

    #[test]
    fn worked_example_matches_reference_value() {
        // 20 goals, 5 assists in 30 games, age 23, neutral league, valued at 50.
        let fair = fair_value(20, 5, 30, 23, 1.0, 50.0);
        assert!((fair - 63.4).abs() < 1e-9, "got {fair}");
    }

    #[test]
    fn fair_value_is_monotone_in_ratio() {
        for market in [0.5, 5.0, 12.0, 40.0, 120.0] {
            let mut prev = f64::NEG_INFINITY;
            for step in 0..=60 {
                let ratio = step as f64 * 0.1;
                let fair = fair_value_for_ratio(ratio, market, 26, 1.0);
                assert!(fair >= prev, "market {market} ratio {ratio}: {fair} < {prev}");
                prev = fair;
            }
        }
    }

    #[test]
    fn fair_value_stays_inside_clamp() {
        for market in [1.0, 8.0, 30.0, 180.0] {
            for goals in [0, 3, 15, 40] {
                for age in [18, 23, 28, 35] {
                    for mult in [0.5, 1.0, 2.0] {
                        let fair = fair_value(goals, goals / 2, 20, age, mult, market);
                        assert!(fair >= 1.0);
                        assert!(fair <= market * 2.5 + 1e-9);
                    }
                }
            }
        }
    }

    #[test]
    fn lower_leagues_get_a_boost() {
        let neutral = fair_value(8, 2, 20, 26, 1.0, 10.0);
        let weaker = fair_value(8, 2, 20, 26, 0.5, 10.0);
        assert!(weaker > neutral);
    }

    #[test]
    fn age_curve_never_rises_after_peak() {
        let mut prev = age_multiplier(22);
        for age in 23..=45 {
            let m = age_multiplier(age);
            assert!(m <= prev, "age {age}");
            prev = m;
        }
        assert!(age_multiplier(30) < 1.0);
        assert_eq!(age_multiplier(23), 1.15);
    }

    #[test]
    fn undervaluation_is_zero_without_market_value() {
        assert_eq!(undervaluation_pct(12.0, 0.0), 0.0);
        assert_eq!(undervaluation_pct(15.0, 10.0), 50.0);
        assert_eq!(undervaluation_pct(5.0, 10.0), -50.0);
    }

    #[test]
    fn negative_halves_round_up() {
        assert_eq!(round_to(-18.75, 1), -18.7);
        assert_eq!(round_to(18.75, 1), 18.8);
        assert_eq!(round_to(-0.125, 2), -0.12);
        assert_eq!(undervaluation_pct(6.5, 8.0), -18.7);
    }

    #[test]
    fn fallback_value_is_bounded() {
        assert_eq!(fallback_market_value(0, 0, 10, 25, 1.0), 2.0);
        assert_eq!(fallback_market_value(40, 20, 10, 20, 2.0), 80.0);
        // 10 goals in 20 games, 1.0 league, age 26: 0.6 * 35 = 21.
        assert_eq!(fallback_market_value(10, 0, 20, 26, 1.0), 21.0);
    }

    #[test]
    fn xg_discounts_penalties() {
        let (xg, xa) = expected_contributions(10, 4, 2);
        assert!((xg - (8.0 * 0.92 + 2.0 * 0.76)).abs() < 1e-9);
        assert!((xa - 3.52).abs() < 1e-9);
        // Penalties never exceed goals.
        let (xg, _) = expected_contributions(1, 0, 5);
        assert!((xg - 0.76).abs() < 1e-9);
    }

    #[test]
    fn age_counts_birthdays_not_yet_reached() {
        assert_eq!(age_on("2001-03-01", today()), Some(24));
        assert_eq!(age_on("2001-03-02", today()), Some(23));
        assert_eq!(age_on("2001-03-02T00:00:00Z", today()), Some(23));
        assert_eq!(age_on("garbage", today()), None);
        assert_eq!(age_on("", today()), None);
    }

    #[test]
    fn scorer_defaults_fill_missing_fields() {
        let league = league_by_code("PL").expect("pl");
        let stat = PlayerStat::from_scorer(&Scorer::default(), league, today());
        assert_eq!(stat.name, "Unknown");
        assert_eq!(stat.team, "Unknown");
        assert_eq!(stat.age, 25);
        assert_eq!(stat.position, "F");
        assert_eq!(stat.games, 1);
        assert_eq!(stat.minutes, 75);
        assert_eq!(stat.goals, 0);
    }

    #[test]
    fn resolved_player_carries_fee_and_source() {
        let league = league_by_code("BL1").expect("bundesliga");
        let scorer = Scorer {
            name: Some("Harry Kane".to_string()),
            team: Some("FC Bayern München".to_string()),
            date_of_birth: Some("1993-07-28".to_string()),
            position: Some("Offence".to_string()),
            goals: Some(21),
            assists: Some(6),
            penalties: Some(5),
            played_matches: Some(22),
            ..Scorer::default()
        };
        let stat = PlayerStat::from_scorer(&scorer, league, today());
        let record = MarketValueRecord {
            name: "Harry Kane".to_string(),
            value: 100.0,
            paid: 95.0,
            year: 2023,
            rumored: None,
        };
        let p = score_with_record(stat, Some(&record));
        assert_eq!(p.value_source, ValueSource::Transfermarkt);
        assert_eq!(p.transfer_fee_paid_eur_m, Some(95.0));
        assert_eq!(p.position, "O");
        assert_eq!(p.age, 31);
        assert_eq!(p.minutes_played, 22 * 75);
        assert!(p.fair_value_eur_m <= 250.0);
        assert!(!p.is_hidden_gem);
    }

    #[test]
    fn unresolved_player_uses_calculated_value() {
        let league = league_by_code("DED").expect("eredivisie");
        let scorer = Scorer {
            name: Some("Someone New".to_string()),
            goals: Some(12),
            assists: Some(3),
            played_matches: Some(18),
            ..Scorer::default()
        };
        let stat = PlayerStat::from_scorer(&scorer, league, today());
        let p = score_with_record(stat, None);
        assert_eq!(p.value_source, ValueSource::Calculated);
        assert_eq!(p.transfer_fee_paid_eur_m, None);
        assert!(p.market_value_eur_m >= 2.0 && p.market_value_eur_m <= 80.0);
        assert!(p.is_hidden_gem);
        assert_eq!(p.tier, 2);
    }
}

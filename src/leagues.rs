use std::collections::HashSet;

use serde::Serialize;

/// A football-data.org competition together with the valuation weight we give it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct League {
    pub code: &'static str,
    pub name: &'static str,
    pub country: &'static str,
    // Strength multiplier; below 1.0 marks a weaker league that earns a small boost.
    pub multiplier: f64,
    pub tier: u8,
}

impl League {
    pub fn is_lower_tier(&self) -> bool {
        self.tier >= 2
    }
}

// Big five.
const TIER1_LEAGUES: &[League] = &[
    League {
        code: "PL",
        name: "Premier League",
        country: "England",
        multiplier: 2.0,
        tier: 1,
    },
    League {
        code: "PD",
        name: "La Liga",
        country: "Spain",
        multiplier: 1.4,
        tier: 1,
    },
    League {
        code: "BL1",
        name: "Bundesliga",
        country: "Germany",
        multiplier: 1.3,
        tier: 1,
    },
    League {
        code: "SA",
        name: "Serie A",
        country: "Italy",
        multiplier: 1.2,
        tier: 1,
    },
    League {
        code: "FL1",
        name: "Ligue 1",
        country: "France",
        multiplier: 1.1,
        tier: 1,
    },
];

// Hidden gem leagues.
const TIER2_LEAGUES: &[League] = &[
    League {
        code: "ELC",
        name: "Championship",
        country: "England",
        multiplier: 0.6,
        tier: 2,
    },
    League {
        code: "DED",
        name: "Eredivisie",
        country: "Netherlands",
        multiplier: 0.7,
        tier: 2,
    },
    League {
        code: "PPL",
        name: "Primeira Liga",
        country: "Portugal",
        multiplier: 0.65,
        tier: 2,
    },
    League {
        code: "BSA",
        name: "Série A",
        country: "Brazil",
        multiplier: 0.5,
        tier: 2,
    },
];

/// All covered leagues in fetch order (tier 1 first).
pub fn all_leagues() -> Vec<League> {
    TIER1_LEAGUES
        .iter()
        .chain(TIER2_LEAGUES.iter())
        .copied()
        .collect()
}

pub fn league_by_code(code: &str) -> Option<League> {
    let code = code.trim();
    TIER1_LEAGUES
        .iter()
        .chain(TIER2_LEAGUES.iter())
        .find(|l| l.code.eq_ignore_ascii_case(code))
        .copied()
}

/// Resolve a comma separated list of competition codes, skipping unknown ones.
/// An empty or fully unknown list falls back to every league.
pub fn leagues_from_codes(raw: &str) -> Vec<League> {
    let mut seen = HashSet::new();
    let picked: Vec<League> = raw
        .split(',')
        .filter_map(league_by_code)
        .filter(|l| seen.insert(l.code))
        .collect();
    if picked.is_empty() {
        all_leagues()
    } else {
        picked
    }
}

pub fn countries_covered(leagues: &[League]) -> usize {
    leagues
        .iter()
        .map(|l| l.country)
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::{all_leagues, countries_covered, league_by_code, leagues_from_codes};

    #[test]
    fn default_table_covers_nine_leagues_in_seven_countries() {
        let leagues = all_leagues();
        assert_eq!(leagues.len(), 9);
        assert_eq!(countries_covered(&leagues), 7);
        assert_eq!(leagues[0].code, "PL");
        assert!(leagues.iter().filter(|l| l.is_lower_tier()).all(|l| l.multiplier < 1.0));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let league = league_by_code(" ded ").expect("eredivisie");
        assert_eq!(league.name, "Eredivisie");
        assert_eq!(league.tier, 2);
        assert!(league_by_code("MLS").is_none());
    }

    #[test]
    fn code_list_dedups_and_falls_back() {
        let picked = leagues_from_codes("PL,pl,XX,BSA");
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[1].code, "BSA");
        assert_eq!(leagues_from_codes("").len(), 9);
        assert_eq!(leagues_from_codes("nope").len(), 9);
    }
}

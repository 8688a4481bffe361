use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::leagues::League;
use crate::market_values::MarketValueTable;
use crate::rankings::{PlayersReport, ReportMeta, build_players_report};
use crate::scorers_fetch::{LeagueBatch, ScorerSource, fetch_all_leagues};
use crate::valuation::{PlayerStat, ScoredPlayer, score_player};

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub players: Vec<ScoredPlayer>,
    pub failed_leagues: Vec<String>,
}

/// Score every fetched scorer. Ids follow fetch order and start at 1.
pub fn score_batches(
    batches: &[LeagueBatch],
    table: &MarketValueTable,
    now: DateTime<Utc>,
) -> Vec<ScoredPlayer> {
    let today = now.date_naive();
    let mut players = Vec::new();
    for batch in batches {
        for scorer in &batch.scorers {
            let stat = PlayerStat::from_scorer(scorer, batch.league, today);
            let mut scored = score_player(stat, table);
            scored.id = players.len() as u32 + 1;
            players.push(scored);
        }
    }
    players
}

/// Fetch, join and score every league.
pub fn collect_players(
    source: &dyn ScorerSource,
    leagues: &[League],
    delay: Duration,
    table: &MarketValueTable,
    now: DateTime<Utc>,
) -> PipelineOutput {
    let batches = fetch_all_leagues(source, leagues, delay);
    let failed_leagues = batches
        .iter()
        .filter(|b| b.error.is_some())
        .map(|b| b.league.code.to_string())
        .collect();
    PipelineOutput {
        players: score_batches(&batches, table, now),
        failed_leagues,
    }
}

/// A built report plus the leagues whose fetch failed while building it.
#[derive(Debug, Clone)]
pub struct ReportRun {
    pub report: PlayersReport,
    pub failed_leagues: Vec<String>,
}

impl ReportRun {
    /// Nothing came back from any configured league.
    pub fn all_failed(&self, leagues: &[League]) -> bool {
        !leagues.is_empty() && self.failed_leagues.len() >= leagues.len()
    }
}

pub fn run_report(
    source: &dyn ScorerSource,
    leagues: &[League],
    delay: Duration,
    table: &MarketValueTable,
    meta: &ReportMeta,
) -> ReportRun {
    let now = Utc::now();
    let output = collect_players(source, leagues, delay, table, now);
    ReportRun {
        report: build_players_report(&output.players, leagues, meta, now),
        failed_leagues: output.failed_leagues,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::{Result, anyhow};

    use super::run_report;
    use crate::leagues::{League, leagues_from_codes};
    use crate::market_values::MarketValueTable;
    use crate::rankings::ReportMeta;
    use crate::scorers_fetch::{Scorer, ScorerSource};

    /// Fails for the first `failures` calls, then answers with no scorers.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl ScorerSource for Flaky {
        fn fetch_scorers(&self, league: &League) -> Result<Vec<Scorer>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(anyhow!("{} http 503", league.code))
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[test]
    fn total_failure_is_flagged() {
        let table = MarketValueTable::bundled().unwrap();
        let leagues = leagues_from_codes("PL,SA");
        let source = Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let run = run_report(&source, &leagues, Duration::ZERO, &table, &ReportMeta::default());
        assert_eq!(run.failed_leagues, vec!["PL".to_string(), "SA".to_string()]);
        assert!(run.all_failed(&leagues));
        assert_eq!(run.report.total_players, 0);
    }

    #[test]
    fn partial_failure_is_not_total() {
        let table = MarketValueTable::bundled().unwrap();
        let leagues = leagues_from_codes("PL,SA");
        let source = Flaky {
            failures: 1,
            calls: AtomicUsize::new(0),
        };
        let run = run_report(&source, &leagues, Duration::ZERO, &table, &ReportMeta::default());
        assert_eq!(run.failed_leagues, vec!["PL".to_string()]);
        assert!(!run.all_failed(&leagues));
    }
}

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::header::USER_AGENT;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::http_client::http_client;
use crate::leagues::League;

const FOOTBALL_DATA_BASE_URL: &str = "https://api.football-data.org/v4";
const DEFAULT_SCORERS_LIMIT: u32 = 30;

/// One entry of the football-data.org `scorers` list. Every field is optional
/// upstream, so nothing here is required.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scorer {
    pub name: Option<String>,
    pub date_of_birth: Option<String>,
    pub nationality: Option<String>,
    pub position: Option<String>,
    pub team: Option<String>,
    pub goals: Option<u32>,
    pub assists: Option<u32>,
    pub penalties: Option<u32>,
    pub played_matches: Option<u32>,
}

/// Anything that can hand back the scorers of a league.
pub trait ScorerSource: Send + Sync {
    fn fetch_scorers(&self, league: &League) -> Result<Vec<Scorer>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// 2s, 4s, ... for the default base.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }
}

pub enum Attempt<T> {
    Done(T),
    Retry(anyhow::Error),
    Fatal(anyhow::Error),
}

/// Run `op` until it succeeds, fails fatally or runs out of retries.
pub fn retry_with_backoff<T>(
    policy: RetryPolicy,
    mut op: impl FnMut(u32) -> Attempt<T>,
) -> Result<T> {
    let mut retry = 0u32;
    loop {
        match op(retry) {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retry(err) => {
                if retry >= policy.max_retries {
                    return Err(err.context(format!("gave up after {} retries", retry)));
                }
                retry += 1;
                let delay = policy.backoff(retry);
                warn!(retry, delay_ms = delay.as_millis() as u64, error = %err, "retrying request");
                thread::sleep(delay);
            }
        }
    }
}

/// Only server errors are worth another try; 4xx means the request itself is wrong.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

#[derive(Debug, Clone)]
pub struct FootballDataClient {
    api_key: String,
    base_url: String,
    limit: u32,
    retry: RetryPolicy,
}

impl FootballDataClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: FOOTBALL_DATA_BASE_URL.to_string(),
            limit: DEFAULT_SCORERS_LIMIT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn scorers_url(&self, league: &League) -> String {
        format!(
            "{}/competitions/{}/scorers?limit={}",
            self.base_url, league.code, self.limit
        )
    }
}

impl ScorerSource for FootballDataClient {
    fn fetch_scorers(&self, league: &League) -> Result<Vec<Scorer>> {
        let client = http_client()?;
        let url = self.scorers_url(league);

        let body = retry_with_backoff(self.retry, |_| {
            let resp = match client
                .get(&url)
                .header("X-Auth-Token", self.api_key.as_str())
                .header(USER_AGENT, "scoutlens/0.1")
                .send()
            {
                Ok(resp) => resp,
                // Timeouts and connection failures.
                Err(err) => return Attempt::Retry(anyhow!(err).context("scorers request failed")),
            };
            let status = resp.status();
            let body = match resp.text() {
                Ok(body) => body,
                Err(err) => return Attempt::Retry(anyhow!(err).context("failed reading body")),
            };
            if status.is_success() {
                return Attempt::Done(body);
            }
            let err = anyhow!("http {}: {}", status, snippet(&body));
            if is_retryable_status(status) {
                Attempt::Retry(err)
            } else {
                Attempt::Fatal(err)
            }
        })
        .with_context(|| format!("fetch scorers for {}", league.code))?;

        parse_scorers_json(&body)
    }
}

pub fn parse_scorers_json(raw: &str) -> Result<Vec<Scorer>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let root: Value = serde_json::from_str(trimmed).context("invalid scorers json")?;
    let Some(items) = root.get("scorers").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    Ok(items.iter().map(parse_scorer).collect())
}

fn parse_scorer(item: &Value) -> Scorer {
    let player = item.get("player").unwrap_or(&Value::Null);
    Scorer {
        name: pick_string(player, "name"),
        date_of_birth: pick_string(player, "dateOfBirth"),
        nationality: pick_string(player, "nationality"),
        position: pick_string(player, "position"),
        team: item.get("team").and_then(|t| pick_string(t, "name")),
        goals: pick_count(item, "goals"),
        assists: pick_count(item, "assists"),
        penalties: pick_count(item, "penalties"),
        played_matches: pick_count(item, "playedMatches"),
    }
}

fn pick_string(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// Counts sometimes arrive as floats or strings; negatives are treated as missing.
fn pick_count(v: &Value, key: &str) -> Option<u32> {
    let raw = v.get(key)?;
    let n = match raw {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    u32::try_from(n).ok()
}

fn snippet(body: &str) -> String {
    body.trim()
        .replace(['\n', '\r'], " ")
        .chars()
        .take(220)
        .collect()
}

/// Result of fetching one league; a failed league keeps an empty list.
#[derive(Debug, Clone)]
pub struct LeagueBatch {
    pub league: League,
    pub scorers: Vec<Scorer>,
    pub error: Option<String>,
}

/// Fetch leagues one after another, pausing `delay` between calls to stay inside
/// the upstream free-tier budget (10 requests per minute).
pub fn fetch_all_leagues(
    source: &dyn ScorerSource,
    leagues: &[League],
    delay: Duration,
) -> Vec<LeagueBatch> {
    let mut out = Vec::with_capacity(leagues.len());
    for (idx, league) in leagues.iter().enumerate() {
        let batch = match source.fetch_scorers(league) {
            Ok(scorers) => {
                debug!(league = league.code, scorers = scorers.len(), "fetched scorers");
                LeagueBatch {
                    league: *league,
                    scorers,
                    error: None,
                }
            }
            Err(err) => {
                warn!(league = league.code, error = %format!("{err:#}"), "skipping league");
                LeagueBatch {
                    league: *league,
                    scorers: Vec::new(),
                    error: Some(format!("{err:#}")),
                }
            }
        };
        out.push(batch);

        if idx + 1 < leagues.len() && !delay.is_zero() {
            thread::sleep(delay);
        }
    }
    let total: usize = out.iter().map(|b| b.scorers.len()).sum();
    let failed = out.iter().filter(|b| b.error.is_some()).count();
    info!(leagues = leagues.len(), failed, scorers = total, "league fetch complete");
    out
}

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::leagues::{League, all_leagues, leagues_from_codes};
use crate::rankings::ReportMeta;

const DEFAULT_BIND: &str = "127.0.0.1:8787";
const DEFAULT_SCORERS_LIMIT: u32 = 30;
const DEFAULT_LEAGUE_DELAY_MS: u64 = 6_500;
const DEFAULT_REPORT_TTL_SECS: u64 = 1_800;
const CACHE_DIR: &str = "scoutlens";

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub football_data_key: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub paypal_webhook_id: Option<String>,
    pub access_token_secret: Option<String>,
    pub scorers_limit: u32,
    pub league_delay: Duration,
    pub leagues: Vec<League>,
    pub market_values_path: Option<PathBuf>,
    pub subscribers_db: Option<PathBuf>,
    pub season_label: String,
    pub report_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let bind = get("SCOUTLENS_BIND")
            .and_then(|v| v.parse::<SocketAddr>().ok())
            .or_else(|| DEFAULT_BIND.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8787)));
        let scorers_limit = get("SCORERS_LIMIT")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_SCORERS_LIMIT)
            .clamp(1, 100);
        let league_delay_ms = get("LEAGUE_DELAY_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_LEAGUE_DELAY_MS)
            .min(60_000);
        let report_ttl_secs = get("REPORT_TTL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REPORT_TTL_SECS)
            .min(86_400);
        let leagues = get("SCOUTLENS_LEAGUES")
            .map(|v| leagues_from_codes(&v))
            .unwrap_or_else(all_leagues);

        Self {
            bind,
            football_data_key: get("FOOTBALL_DATA_KEY"),
            supabase_url: get("SUPABASE_URL"),
            supabase_service_key: get("SUPABASE_SERVICE_KEY"),
            stripe_webhook_secret: get("STRIPE_WEBHOOK_SECRET"),
            paypal_webhook_id: get("PAYPAL_WEBHOOK_ID"),
            access_token_secret: get("ACCESS_TOKEN_SECRET"),
            scorers_limit,
            league_delay: Duration::from_millis(league_delay_ms),
            leagues,
            market_values_path: get("MARKET_VALUES_PATH").map(PathBuf::from),
            subscribers_db: get("SUBSCRIBERS_DB").map(PathBuf::from),
            season_label: get("SEASON_LABEL").unwrap_or_else(|| ReportMeta::default().season),
            report_ttl: Duration::from_secs(report_ttl_secs),
        }
    }

    pub fn supabase(&self) -> Option<(&str, &str)> {
        match (&self.supabase_url, &self.supabase_service_key) {
            (Some(url), Some(key)) => Some((url.as_str(), key.as_str())),
            _ => None,
        }
    }

    pub fn report_meta(&self) -> ReportMeta {
        ReportMeta {
            season: self.season_label.clone(),
            ..ReportMeta::default()
        }
    }

    pub fn subscribers_db_path(&self) -> Option<PathBuf> {
        self.subscribers_db
            .clone()
            .or_else(|| app_cache_dir().map(|dir| dir.join("subscribers.sqlite")))
    }
}

/// `$XDG_CACHE_HOME/scoutlens`, falling back to `~/.cache/scoutlens`.
pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(CACHE_DIR));
        }
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::ServerConfig;

    fn config(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = config(&[]);
        assert_eq!(cfg.bind.to_string(), "127.0.0.1:8787");
        assert_eq!(cfg.scorers_limit, 30);
        assert_eq!(cfg.league_delay, Duration::from_millis(6_500));
        assert_eq!(cfg.leagues.len(), 9);
        assert_eq!(cfg.report_ttl, Duration::from_secs(1_800));
        assert!(cfg.football_data_key.is_none());
        assert!(cfg.supabase().is_none());
        assert_eq!(cfg.season_label, "2024-25");
    }

    #[test]
    fn values_are_trimmed_and_clamped() {
        let cfg = config(&[
            ("FOOTBALL_DATA_KEY", "  abc  "),
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_SERVICE_KEY", "   "),
            ("SCORERS_LIMIT", "500"),
            ("LEAGUE_DELAY_MS", "0"),
            ("SCOUTLENS_LEAGUES", "pl, ded"),
            ("SCOUTLENS_BIND", "0.0.0.0:9000"),
        ]);
        assert_eq!(cfg.football_data_key.as_deref(), Some("abc"));
        assert!(cfg.supabase().is_none());
        assert_eq!(cfg.scorers_limit, 100);
        assert_eq!(cfg.league_delay, Duration::ZERO);
        let codes: Vec<&str> = cfg.leagues.iter().map(|l| l.code).collect();
        assert_eq!(codes, vec!["PL", "DED"]);
        assert_eq!(cfg.bind.port(), 9000);
    }
}

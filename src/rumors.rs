use std::collections::HashSet;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rand::Rng;
use regex::Regex;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Serialize;
use tracing::{info, warn};

use crate::http_client::http_client;

pub const FEED_TIMEOUT: Duration = Duration::from_secs(5);
pub const ITEMS_PER_SOURCE: usize = 5;
pub const MAX_RUMORS: usize = 15;
pub const RUMOR_LIFETIME_DAYS: i64 = 30;

const FEED_USER_AGENT: &str = "Mozilla/5.0 (compatible; ScoutLens/1.0)";
const FEED_ACCEPT: &str = "application/rss+xml, application/xml, text/xml";

const TRANSFER_KEYWORDS: &[&str] = &[
    "transfer",
    "signing",
    "deal",
    "move",
    "join",
    "leave",
    "exit",
    "contract",
    "agreement",
    "target",
    "interest",
    "rumor",
    "rumour",
    "bid",
    "offer",
    "negotiation",
    "talks",
    "linked",
    "set to",
    "agreed",
];
const HOT_MARKERS: &[&str] = &["confirmed", "done deal", "agreed", "signed", "complete"];

// Names are case-sensitive "Xxxx" words; keywords match in any case but only as whole words.
static RE_PLAYER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+ [A-Z][a-z]+(?:-[A-Z][a-z]+)?)").unwrap()
});
static RE_PLAYER_THREE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-z]+ [A-Z][a-z]+ [A-Z][a-z]+)").unwrap());
static RE_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?i:from|at|leaving|exit|departure)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)\b")
        .unwrap()
});
static RE_FROM_ROLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)\s+(?i:star|player|defender|midfielder|forward)\b",
    )
    .unwrap()
});
static RE_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?i:to|join|sign|move|linked\s+with|target)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)\b",
    )
    .unwrap()
});
static RE_TO_LATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?i:set\s+for|agreed|deal\s+with)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)\b")
        .unwrap()
});
// Applied to lowercased text, first hit wins.
static RE_FEES: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        Regex::new(r"[€£$](\d+(?:\.\d+)?)\s*(?:m|million)\b").unwrap(),
        Regex::new(r"(\d+(?:\.\d+)?)\s*(?:million|m)\s*[€£$]").unwrap(),
        Regex::new(r"free\s*(?:transfer|agent|deal)").unwrap(),
        Regex::new(r"contract\s+expires").unwrap(),
    ]
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSource {
    pub name: &'static str,
    pub url: &'static str,
}

pub const FEED_SOURCES: [FeedSource; 2] = [
    FeedSource {
        name: "BBC Sport",
        url: "https://feeds.bbci.co.uk/sport/football/rss.xml",
    },
    FeedSource {
        name: "Sky Sports",
        url: "https://feeds.skynews.com/feeds/rss/sports.xml",
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub description: String,
    pub link: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RumorStatus {
    Hot,
    Warm,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rumor {
    pub id: String,
    pub player: String,
    pub from: String,
    pub to: String,
    pub fee: String,
    pub status: RumorStatus,
    pub source: String,
    pub date: NaiveDate,
    pub verified: bool,
    pub expires: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RumorsReport {
    pub last_updated: String,
    pub rumors: Vec<Rumor>,
}

/// Where feed bodies come from.
pub trait FeedFetcher: Send + Sync {
    fn fetch_feed(&self, source: &FeedSource) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpFeedFetcher;

impl FeedFetcher for HttpFeedFetcher {
    fn fetch_feed(&self, source: &FeedSource) -> Result<String> {
        let client = http_client()?;
        let resp = client
            .get(source.url)
            .timeout(FEED_TIMEOUT)
            .header(USER_AGENT, FEED_USER_AGENT)
            .header(ACCEPT, FEED_ACCEPT)
            .send()
            .with_context(|| format!("request {} feed", source.name))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("{} feed http {}", source.name, status));
        }
        resp.text()
            .with_context(|| format!("read {} feed body", source.name))
    }
}

/// Fetch every source on its own thread and merge the results. A source that
/// fails contributes nothing.
pub fn collect_rumors(
    fetcher: &dyn FeedFetcher,
    sources: &[FeedSource],
    now: DateTime<Utc>,
) -> Vec<Rumor> {
    let today = now.date_naive();
    let per_source: Vec<Vec<Rumor>> = thread::scope(|scope| {
        let handles: Vec<_> = sources
            .iter()
            .map(|source| {
                scope.spawn(move || match fetcher.fetch_feed(source) {
                    Ok(xml) => rumors_from_feed(&xml, source.name, today, now),
                    Err(err) => {
                        warn!(source = source.name, error = %err, "feed fetch failed");
                        Vec::new()
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_default())
            .collect()
    });

    let merged: Vec<Rumor> = per_source.into_iter().flatten().collect();
    let rumors = finalize_rumors(merged);
    info!(count = rumors.len(), "rumours collected");
    rumors
}

pub fn build_rumors_report(rumors: Vec<Rumor>, now: DateTime<Utc>) -> RumorsReport {
    RumorsReport {
        last_updated: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        rumors,
    }
}

/// Transfer items of one feed, at most five, as rumours.
pub fn rumors_from_feed(
    xml: &str,
    source: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Vec<Rumor> {
    parse_rss(xml, today)
        .into_iter()
        .filter(|item| is_transfer_related(&item.title, &item.description))
        .take(ITEMS_PER_SOURCE)
        .filter_map(|item| extract_rumor(&item, source, now))
        .collect()
}

/// Drop repeats of the same (player, from, to), newest first, capped.
pub fn finalize_rumors(rumors: Vec<Rumor>) -> Vec<Rumor> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Rumor> = rumors
        .into_iter()
        .filter(|r| {
            seen.insert(format!(
                "{}_{}_{}",
                r.player.to_lowercase(),
                r.from.to_lowercase(),
                r.to.to_lowercase()
            ))
        })
        .collect();
    unique.sort_by(|a, b| b.date.cmp(&a.date));
    unique.truncate(MAX_RUMORS);
    unique
}

pub fn parse_rss(xml: &str, today: NaiveDate) -> Vec<FeedItem> {
    let mut items = Vec::new();
    let mut from = 0;
    while let Some((start, end)) = next_block(xml, "<item", "</item>", from) {
        let block = &xml[start..end];
        from = end;

        let Some(title) = tag_text(block, "title") else {
            continue;
        };
        let description = tag_text(block, "description")
            .map(|d| strip_tags(&d))
            .unwrap_or_default();
        let link = tag_text(block, "link").unwrap_or_default();
        let date = tag_text(block, "pubDate")
            .and_then(|raw| DateTime::parse_from_rfc2822(raw.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc).date_naive())
            .unwrap_or(today);

        items.push(FeedItem {
            title,
            description,
            link,
            date,
        });
    }
    items
}

pub fn is_transfer_related(title: &str, description: &str) -> bool {
    let text = format!("{title} {description}").to_lowercase();
    TRANSFER_KEYWORDS.iter().any(|k| text.contains(k))
}

pub fn extract_rumor(item: &FeedItem, source: &str, now: DateTime<Utc>) -> Option<Rumor> {
    let player = extract_player(&item.title)?;
    // The headline ends a sentence so club names never run into the summary.
    let combined = format!("{}. {}", item.title, item.description);

    let from = first_capture(&[&*RE_FROM, &*RE_FROM_ROLE], &combined)
        .unwrap_or_else(|| "Unknown".to_string());
    let to = first_capture(&[&*RE_TO, &*RE_TO_LATE], &combined)
        .unwrap_or_else(|| "Multiple Clubs".to_string());

    let lower = combined.to_lowercase();
    let status = if HOT_MARKERS.iter().any(|m| lower.contains(m)) {
        RumorStatus::Hot
    } else {
        RumorStatus::Warm
    };

    Some(Rumor {
        id: rumor_id(now),
        player,
        from,
        to,
        fee: extract_fee(&lower),
        status,
        source: source.to_string(),
        date: item.date,
        verified: is_trusted_source(source),
        expires: now.date_naive() + chrono::Duration::days(RUMOR_LIFETIME_DAYS),
    })
}

pub fn is_trusted_source(source: &str) -> bool {
    FEED_SOURCES.iter().any(|s| s.name == source)
}

/// First "Xxxx Yyyy" (or "Xxxx Yyyy-Zzzz") pair in the headline. The two
/// words must be separated by whitespace only, so "Liverpool's Trent" is
/// not a pair.
pub fn extract_player(title: &str) -> Option<String> {
    first_capture(&[&*RE_PLAYER, &*RE_PLAYER_THREE], title)
}

/// Fee from the lowercased text: an amount in millions, a free deal, or
/// undisclosed.
pub fn extract_fee(lower: &str) -> String {
    let Some(caps) = RE_FEES.iter().find_map(|re| re.captures(lower)) else {
        return "Fee undisclosed".to_string();
    };
    if lower.contains("free") || lower.contains("contract expires") {
        return "Free (contract expires)".to_string();
    }
    match caps.get(1) {
        Some(n) => format!("€{}M", n.as_str()),
        None => "Fee undisclosed".to_string(),
    }
}

fn first_capture(patterns: &[&Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn rumor_id(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("rumor_{}_{}", now.timestamp_millis(), suffix)
}

fn next_block(s: &str, open: &str, close: &str, from: usize) -> Option<(usize, usize)> {
    let rest = s.get(from..)?;
    let mut offset = 0;
    loop {
        let start = rest.get(offset..)?.find(open)? + offset;
        // `<item>` or `<item attr=...>`, not `<itemCount>`.
        let next = rest[start + open.len()..].chars().next()?;
        if next == '>' || next.is_whitespace() {
            let end = rest[start..].find(close)? + start + close.len();
            return Some((from + start, from + end));
        }
        offset = start + open.len();
    }
}

/// Inner text of the first `<tag>` in `block`, CDATA unwrapped and entities
/// decoded.
fn tag_text(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let (start, end) = next_block(block, &open, &close, 0)?;
    let element = &block[start..end];
    let inner_start = element.find('>')? + 1;
    let inner_end = element.len() - close.len();
    if inner_start > inner_end {
        return None;
    }
    let inner = element[inner_start..inner_end]
        .replace("<![CDATA[", "")
        .replace("]]>", "");
    Some(decode_entities(inner.trim()))
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.trim().to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&#8217;", "\u{2019}")
        .replace("&amp;", "&")
}

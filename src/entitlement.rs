use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::http_client::http_client;

const PROFILES_SELECT: &str = "email,is_pro,subscription_status,subscription_end_date";

/// Row of the `profiles` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub email: String,
    #[serde(default)]
    pub is_pro: bool,
    #[serde(default)]
    pub subscription_status: Option<String>,
    #[serde(default)]
    pub subscription_end_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entitlement {
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub found: bool,
}

impl Entitlement {
    pub fn none() -> Self {
        Self {
            active: false,
            expires_at: None,
            status: None,
            found: false,
        }
    }

    pub fn from_profile(profile: &Profile, now: DateTime<Utc>) -> Self {
        Self {
            active: profile_is_active(profile, now),
            expires_at: profile
                .subscription_end_date
                .as_deref()
                .and_then(parse_end_date),
            status: profile.subscription_status.clone(),
            found: true,
        }
    }
}

/// Active means flagged pro, status `active`, and not past the end date.
/// An end date that cannot be parsed counts as expired.
pub fn profile_is_active(profile: &Profile, now: DateTime<Utc>) -> bool {
    if !profile.is_pro || profile.subscription_status.as_deref() != Some("active") {
        return false;
    }
    match profile.subscription_end_date.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(raw) => parse_end_date(raw).is_some_and(|end| end > now),
    }
}

pub fn parse_end_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Postgres `timestamp with time zone` text uses a space separator.
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Partial update applied by payment events. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub email: String,
    pub is_pro: Option<bool>,
    pub subscription_status: Option<String>,
    /// `Some(None)` clears the end date.
    pub subscription_end_date: Option<Option<String>>,
    pub subscription_id: Option<String>,
}

impl ProfileUpdate {
    fn to_row(&self, now: DateTime<Utc>) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("email".into(), Value::String(normalize_email(&self.email)));
        if let Some(is_pro) = self.is_pro {
            row.insert("is_pro".into(), Value::Bool(is_pro));
        }
        if let Some(status) = &self.subscription_status {
            row.insert("subscription_status".into(), Value::String(status.clone()));
        }
        if let Some(end) = &self.subscription_end_date {
            let v = end.clone().map(Value::String).unwrap_or(Value::Null);
            row.insert("subscription_end_date".into(), v);
        }
        if let Some(id) = &self.subscription_id {
            row.insert("subscription_id".into(), Value::String(id.clone()));
        }
        row.insert("updated_at".into(), Value::String(now.to_rfc3339()));
        row
    }
}

/// "Is this person entitled to full data", answered by some external service.
pub trait EntitlementService: Send + Sync {
    fn check_entitlement(&self, email: &str) -> Result<Entitlement>;

    fn apply_update(&self, update: &ProfileUpdate) -> Result<()>;

    /// True for the process-local stand-in used when no database is configured.
    fn is_mock(&self) -> bool {
        false
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Profiles kept in memory. Used when Supabase is not configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryEntitlements {
    profiles: Mutex<HashMap<String, Profile>>,
}

impl MemoryEntitlements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: Profile) {
        let key = normalize_email(&profile.email);
        let mut guard = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(key, profile);
    }

    pub fn profile(&self, email: &str) -> Option<Profile> {
        let guard = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(&normalize_email(email)).cloned()
    }
}

impl EntitlementService for MemoryEntitlements {
    fn check_entitlement(&self, email: &str) -> Result<Entitlement> {
        Ok(self
            .profile(email)
            .map(|p| Entitlement::from_profile(&p, Utc::now()))
            .unwrap_or_else(Entitlement::none))
    }

    fn apply_update(&self, update: &ProfileUpdate) -> Result<()> {
        let key = normalize_email(&update.email);
        if key.is_empty() {
            return Err(anyhow!("profile update without email"));
        }
        let mut guard = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        let profile = guard.entry(key.clone()).or_insert_with(|| Profile {
            email: key,
            is_pro: false,
            subscription_status: None,
            subscription_end_date: None,
        });
        if let Some(is_pro) = update.is_pro {
            profile.is_pro = is_pro;
        }
        if let Some(status) = &update.subscription_status {
            profile.subscription_status = Some(status.clone());
        }
        if let Some(end) = &update.subscription_end_date {
            profile.subscription_end_date = end.clone();
        }
        Ok(())
    }

    fn is_mock(&self) -> bool {
        true
    }
}

/// `profiles` table behind Supabase's PostgREST API. Blocking; call from a
/// blocking context.
#[derive(Debug, Clone)]
pub struct SupabaseEntitlements {
    base_url: String,
    service_key: String,
}

impl SupabaseEntitlements {
    pub fn new(base_url: &str, service_key: &str) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            service_key: service_key.trim().to_string(),
        }
    }

    fn profiles_url(&self) -> String {
        format!("{}/rest/v1/profiles", self.base_url)
    }

    fn fetch_profile(&self, email: &str) -> Result<Option<Profile>> {
        let client = http_client()?;
        let resp = client
            .get(self.profiles_url())
            .query(&[
                ("email", format!("eq.{}", normalize_email(email))),
                ("select", PROFILES_SELECT.to_string()),
                ("limit", "1".to_string()),
            ])
            .header("apikey", self.service_key.as_str())
            .bearer_auth(&self.service_key)
            .send()
            .context("profiles request failed")?;
        let status = resp.status();
        let body = resp.text().context("failed reading profiles body")?;
        if !status.is_success() {
            return Err(anyhow!("profiles http {}: {}", status, body.trim()));
        }
        let rows: Vec<Profile> = serde_json::from_str(&body).context("invalid profiles json")?;
        Ok(rows.into_iter().next())
    }
}

impl EntitlementService for SupabaseEntitlements {
    fn check_entitlement(&self, email: &str) -> Result<Entitlement> {
        let profile = self.fetch_profile(email)?;
        debug!(found = profile.is_some(), "profile lookup");
        Ok(profile
            .map(|p| Entitlement::from_profile(&p, Utc::now()))
            .unwrap_or_else(Entitlement::none))
    }

    fn apply_update(&self, update: &ProfileUpdate) -> Result<()> {
        let client = http_client()?;
        let row = update.to_row(Utc::now());
        let resp = client
            .post(self.profiles_url())
            .query(&[("on_conflict", "email")])
            .header("apikey", self.service_key.as_str())
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .bearer_auth(&self.service_key)
            .json(&Value::Object(row))
            .send()
            .context("profile upsert failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(anyhow!("profile upsert http {}: {}", status, body.trim()));
        }
        info!(status = ?update.subscription_status, "profile updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{
        EntitlementService, MemoryEntitlements, Profile, ProfileUpdate, parse_end_date,
        profile_is_active,
    };

    fn profile(is_pro: bool, status: &str, end: Option<String>) -> Profile {
        Profile {
            email: "user@example.com".to_string(),
            is_pro,
            subscription_status: Some(status.to_string()),
            subscription_end_date: end,
        }
    }

    #[test]
    fn free_cancelled_and_expired_profiles_are_inactive() {
        let now = Utc::now();
        assert!(!profile_is_active(&profile(false, "free", None), now));
        assert!(!profile_is_active(&profile(true, "cancelled", None), now));
        let past = (now - Duration::days(30)).to_rfc3339();
        assert!(!profile_is_active(&profile(true, "active", Some(past)), now));
        assert!(!profile_is_active(&profile(true, "active", Some("soon".into())), now));
    }

    #[test]
    fn active_profiles_with_future_or_no_end_date() {
        let now = Utc::now();
        let future = (now + Duration::days(30)).to_rfc3339();
        assert!(profile_is_active(&profile(true, "active", Some(future)), now));
        assert!(profile_is_active(&profile(true, "active", None), now));
    }

    #[test]
    fn end_dates_in_common_shapes() {
        let want = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_end_date("2025-06-01T00:00:00Z"), Some(want));
        assert_eq!(parse_end_date("2025-06-01 00:00:00+00"), Some(want));
        assert_eq!(parse_end_date("2025-06-01"), Some(want));
        assert_eq!(parse_end_date("June"), None);
    }

    #[test]
    fn memory_backend_applies_partial_updates() {
        let store = MemoryEntitlements::new();
        store
            .apply_update(&ProfileUpdate {
                email: " Pro@Example.com ".to_string(),
                is_pro: Some(true),
                subscription_status: Some("active".to_string()),
                subscription_end_date: Some(None),
                subscription_id: Some("I-123".to_string()),
            })
            .expect("activate");
        let ent = store.check_entitlement("pro@example.com").expect("check");
        assert!(ent.active && ent.found);

        store
            .apply_update(&ProfileUpdate {
                email: "pro@example.com".to_string(),
                subscription_status: Some("past_due".to_string()),
                ..ProfileUpdate::default()
            })
            .expect("past due");
        let p = store.profile("PRO@example.com").expect("profile");
        assert!(p.is_pro);
        assert_eq!(p.subscription_status.as_deref(), Some("past_due"));
        assert!(!store.check_entitlement("pro@example.com").expect("check").active);

        assert!(!store.check_entitlement("nobody@example.com").expect("check").found);
        assert!(store.apply_update(&ProfileUpdate::default()).is_err());
    }
}

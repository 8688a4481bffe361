use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::entitlement::ProfileUpdate;

type HmacSha256 = Hmac<Sha256>;

/// One-off payments buy this many days of access.
pub const ONE_OFF_ACCESS_DAYS: i64 = 30;
/// Allowed clock skew between Stripe's signing time and ours.
pub const STRIPE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    PayPal,
    Stripe,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::PayPal => "paypal",
            Provider::Stripe => "stripe",
        }
    }
}

/// The request headers a webhook delivery may carry.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub paypal_transmission_id: Option<String>,
    pub paypal_transmission_time: Option<String>,
    pub paypal_transmission_sig: Option<String>,
    pub stripe_signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// Answered with 401.
    Unauthorized(String),
    /// Acknowledged with 200 and an `error` field.
    Invalid(String),
}

impl fmt::Display for WebhookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebhookError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            WebhookError::Invalid(msg) => write!(f, "invalid payload: {msg}"),
        }
    }
}

impl std::error::Error for WebhookError {}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookAction {
    Update(ProfileUpdate),
    Ignored(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub provider: Provider,
    pub event_type: String,
    pub action: WebhookAction,
}

/// PayPal envelopes carry `event_type`, Stripe ones `type`.
pub fn detect_provider(body: &Value) -> Option<Provider> {
    if body.get("event_type").and_then(Value::as_str).is_some() {
        Some(Provider::PayPal)
    } else if body.get("type").and_then(Value::as_str).is_some() {
        Some(Provider::Stripe)
    } else {
        None
    }
}

/// Authenticate and interpret one delivery.
pub fn parse_event(
    headers: &WebhookHeaders,
    body: &[u8],
    stripe_secret: Option<&str>,
    now: DateTime<Utc>,
) -> Result<WebhookEvent, WebhookError> {
    let json: Value = serde_json::from_slice(body)
        .map_err(|e| WebhookError::Invalid(format!("body is not json: {e}")))?;
    match detect_provider(&json) {
        Some(Provider::PayPal) => {
            check_paypal_headers(headers)?;
            Ok(paypal_event(&json, now))
        }
        Some(Provider::Stripe) => {
            if let Some(secret) = stripe_secret {
                let header = headers.stripe_signature.as_deref().ok_or_else(|| {
                    WebhookError::Unauthorized("missing Stripe-Signature".to_string())
                })?;
                verify_stripe_signature(header, body, secret, now)?;
            }
            Ok(stripe_event(&json, now))
        }
        None => Err(WebhookError::Invalid("unknown webhook envelope".to_string())),
    }
}

/// PayPal deliveries must at least carry the transmission headers.
pub fn check_paypal_headers(headers: &WebhookHeaders) -> Result<(), WebhookError> {
    let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    if present(&headers.paypal_transmission_id)
        && present(&headers.paypal_transmission_time)
        && present(&headers.paypal_transmission_sig)
    {
        Ok(())
    } else {
        Err(WebhookError::Unauthorized(
            "missing PayPal transmission headers".to_string(),
        ))
    }
}

pub fn paypal_event(body: &Value, now: DateTime<Utc>) -> WebhookEvent {
    let event_type = str_at(body, &["event_type"]).unwrap_or_default();
    let resource = body.get("resource").unwrap_or(&Value::Null);
    let subscriber_email = str_at(resource, &["subscriber", "email_address"]);

    let action = match event_type.as_str() {
        "BILLING.SUBSCRIPTION.ACTIVATED"
        | "BILLING.SUBSCRIPTION.CREATED"
        | "BILLING.SUBSCRIPTION.RENEWED" => match subscriber_email {
            Some(email) => WebhookAction::Update(ProfileUpdate {
                email,
                is_pro: Some(true),
                subscription_status: Some("active".to_string()),
                subscription_end_date: Some(str_at(
                    resource,
                    &["billing_info", "next_billing_time"],
                )),
                subscription_id: str_at(resource, &["id"]),
            }),
            None => no_email(&event_type),
        },
        "BILLING.SUBSCRIPTION.CANCELLED" | "BILLING.SUBSCRIPTION.SUSPENDED" => {
            status_change(subscriber_email, &event_type, Some(false), "cancelled")
        }
        "BILLING.SUBSCRIPTION.EXPIRED" => {
            status_change(subscriber_email, &event_type, Some(false), "expired")
        }
        "BILLING.SUBSCRIPTION.PAYMENT.FAILED" => {
            status_change(subscriber_email, &event_type, None, "past_due")
        }
        "PAYMENT.SALE.COMPLETED" => {
            let payer = str_at(resource, &["payer", "email_address"])
                .or_else(|| str_at(resource, &["payer_info", "email"]));
            match payer {
                Some(email) => one_off_access(email, now),
                None => no_email(&event_type),
            }
        }
        other => WebhookAction::Ignored(format!("unhandled event {other}")),
    };

    WebhookEvent {
        provider: Provider::PayPal,
        event_type,
        action,
    }
}

pub fn stripe_event(body: &Value, now: DateTime<Utc>) -> WebhookEvent {
    let event_type = str_at(body, &["type"]).unwrap_or_default();
    let object = body
        .get("data")
        .and_then(|d| d.get("object"))
        .unwrap_or(&Value::Null);
    let email = str_at(object, &["customer_details", "email"])
        .or_else(|| str_at(object, &["customer_email"]))
        .or_else(|| str_at(object, &["metadata", "email"]));

    let action = match event_type.as_str() {
        "checkout.session.completed" => match email {
            Some(email) => one_off_access(email, now),
            None => no_email(&event_type),
        },
        "customer.subscription.deleted" => {
            status_change(email, &event_type, Some(false), "cancelled")
        }
        "invoice.payment_failed" => status_change(email, &event_type, None, "past_due"),
        other => WebhookAction::Ignored(format!("unhandled event {other}")),
    };

    WebhookEvent {
        provider: Provider::Stripe,
        event_type,
        action,
    }
}

/// Check a `Stripe-Signature: t=...,v1=...` header against HMAC-SHA256 of
/// `"{t}.{body}"`. Any matching `v1` entry is accepted.
pub fn verify_stripe_signature(
    header: &str,
    body: &[u8],
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.trim().parse::<i64>().ok(),
            Some(("v1", v)) => candidates.push(v.trim()),
            _ => {}
        }
    }
    let unauthorized = |msg: &str| WebhookError::Unauthorized(msg.to_string());
    let timestamp = timestamp.ok_or_else(|| unauthorized("signature header without timestamp"))?;
    if candidates.is_empty() {
        return Err(unauthorized("signature header without v1"));
    }
    if (now.timestamp() - timestamp).abs() > STRIPE_TOLERANCE_SECS {
        return Err(unauthorized("signature timestamp outside tolerance"));
    }

    for candidate in candidates {
        let Some(expected) = decode_hex(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| unauthorized("unusable signing secret"))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(unauthorized("signature mismatch"))
}

/// Header value Stripe would send for `body` at `timestamp`.
pub fn stripe_signature_header(secret: &str, timestamp: i64, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let sig = mac.finalize().into_bytes();
    let hex: String = sig.iter().map(|b| format!("{b:02x}")).collect();
    Some(format!("t={timestamp},v1={hex}"))
}

fn one_off_access(email: String, now: DateTime<Utc>) -> WebhookAction {
    let end = now + Duration::days(ONE_OFF_ACCESS_DAYS);
    WebhookAction::Update(ProfileUpdate {
        email,
        is_pro: Some(true),
        subscription_status: Some("active".to_string()),
        subscription_end_date: Some(Some(end.to_rfc3339_opts(SecondsFormat::Millis, true))),
        subscription_id: None,
    })
}

fn status_change(
    email: Option<String>,
    event_type: &str,
    is_pro: Option<bool>,
    status: &str,
) -> WebhookAction {
    match email {
        Some(email) => WebhookAction::Update(ProfileUpdate {
            email,
            is_pro,
            subscription_status: Some(status.to_string()),
            ..ProfileUpdate::default()
        }),
        None => no_email(event_type),
    }
}

fn no_email(event_type: &str) -> WebhookAction {
    WebhookAction::Ignored(format!("{event_type} without email"))
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut cur = value;
    for key in path {
        cur = cur.get(*key)?;
    }
    cur.as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(raw.get(i..i + 2)?, 16).ok())
        .collect()
}

pub mod access_token;
pub mod api;
pub mod config;
pub mod entitlement;
pub mod http_client;
pub mod leagues;
pub mod market_values;
pub mod pipeline;
pub mod rankings;
pub mod rate_limit;
pub mod report_export;
pub mod rumors;
pub mod scorers_fetch;
pub mod subscribers;
pub mod valuation;
pub mod webhooks;

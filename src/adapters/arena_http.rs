//! HTTP client for the arena: live contest feed, bankroll lookup and wager
//! submission.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, REFERER};
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::traits::{BankrollSource, LiveFeed, MatchMeta, WagerSubmitter};
use crate::config::LiveConfig;
use crate::error::{DuelbetError, LiveError, Result};

/// Cookie carrying the session id on state and wager requests
pub const SESSION_COOKIE: &str = "PHPSESSID";

#[derive(Debug, Clone)]
pub struct ArenaClient {
    http: Client,
    meta_url: Url,
    state_url: Url,
    wager_url: Url,
    uid: Option<String>,
}

impl ArenaClient {
    pub fn new(cfg: &LiveConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(session) = cfg.session_id.as_deref() {
            let cookie = HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE, session))
                .map_err(|e| DuelbetError::InvalidConfig(format!("invalid session id: {}", e)))?;
            headers.insert(COOKIE, cookie);
        }

        let wager_url = parse_url("live.wager_url", &cfg.wager_url)?;
        if let Some(origin) = origin_of(&wager_url) {
            if let Ok(value) = HeaderValue::from_str(&origin) {
                headers.insert(REFERER, value);
            }
        }

        let http = Client::builder()
            .user_agent("duelbet/0.1")
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| DuelbetError::Internal(format!("failed to build arena HTTP client: {}", e)))?;

        Ok(Self {
            http,
            meta_url: parse_url("live.meta_url", &cfg.meta_url)?,
            state_url: parse_url("live.state_url", &cfg.state_url)?,
            wager_url,
            uid: cfg.uid.clone(),
        })
    }

    async fn read_ok(resp: Response) -> Result<String> {
        let status = resp.status();
        let url = resp.url().to_string();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(DuelbetError::HttpStatus {
                status: status.as_u16(),
                url,
                body,
            });
        }
        Ok(body)
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| DuelbetError::InvalidConfig(format!("{}: {}", field, e)))
}

fn origin_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}/", url.scheme(), host, port),
        None => format!("{}://{}/", url.scheme(), host),
    })
}

/// Parse a displayed amount such as `"1,234"`
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    cleaned.trim().parse::<i64>().ok().map(|n| n as f64)
}

/// Bankroll of `uid` in a state document `{ "<uid>": { "b": "1,234" } }`
pub fn bankroll_from_state(state: &Value, uid: &str) -> Option<f64> {
    match state.get(uid)?.get("b")? {
        Value::String(s) => parse_amount(s),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Form body for a wager on `slot` (1 or 2)
pub fn wager_form(slot: u8, amount: u64) -> [(&'static str, String); 2] {
    [
        ("selectedplayer", format!("player{}", slot)),
        ("wager", amount.to_string()),
    ]
}

#[async_trait]
impl LiveFeed for ArenaClient {
    async fn next_match(&self, last: &MatchMeta) -> Result<MatchMeta> {
        let resp = self
            .http
            .get(self.meta_url.clone())
            .query(&[("p1", last.name_a.as_str()), ("p2", last.name_b.as_str())])
            .send()
            .await?;
        let body = Self::read_ok(resp).await?;
        let meta: MatchMeta = serde_json::from_str(&body)?;
        Ok(meta)
    }
}

#[async_trait]
impl BankrollSource for ArenaClient {
    async fn bankroll(&self) -> Result<f64> {
        let uid = self.uid.as_deref().ok_or(LiveError::MissingUid)?;
        let resp = self.http.get(self.state_url.clone()).send().await?;
        let body = Self::read_ok(resp).await?;
        let state: Value = serde_json::from_str(&body)?;
        let bank = bankroll_from_state(&state, uid).unwrap_or(0.0);
        debug!("bankroll from state: {}", bank);
        Ok(bank)
    }
}

#[async_trait]
impl WagerSubmitter for ArenaClient {
    async fn place(&self, slot: u8, amount: u64) -> Result<()> {
        let resp = self
            .http
            .post(self.wager_url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=UTF-8")
            .form(&wager_form(slot, amount))
            .send()
            .await?;
        let body = Self::read_ok(resp).await?;
        if body.trim().is_empty() {
            return Err(LiveError::EmptyResponse(self.wager_url.to_string()).into());
        }
        info!("Wager accepted: {} on player{}", amount, slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_displayed_amounts() {
        assert_eq!(parse_amount("1,234,567"), Some(1_234_567.0));
        assert_eq!(parse_amount(" 42 "), Some(42.0));
        assert_eq!(parse_amount("lots"), None);
    }

    #[test]
    fn reads_bankroll_for_uid() {
        let state = json!({
            "123": { "n": "someone", "b": "12,500" },
            "456": { "b": 900 },
        });
        assert_eq!(bankroll_from_state(&state, "123"), Some(12_500.0));
        assert_eq!(bankroll_from_state(&state, "456"), Some(900.0));
        assert_eq!(bankroll_from_state(&state, "789"), None);
    }

    #[test]
    fn wager_form_fields() {
        let form = wager_form(2, 1500);
        assert_eq!(form[0], ("selectedplayer", "player2".to_string()));
        assert_eq!(form[1], ("wager", "1500".to_string()));
    }

    #[test]
    fn client_builds_from_default_config() {
        let mut cfg = LiveConfig::default();
        cfg.session_id = Some("abc".to_string());
        assert!(ArenaClient::new(&cfg).is_ok());

        cfg.meta_url = "not a url".to_string();
        assert!(matches!(
            ArenaClient::new(&cfg),
            Err(DuelbetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn origin_keeps_port() {
        let url = Url::parse("http://localhost:8000/bet").unwrap();
        assert_eq!(origin_of(&url).as_deref(), Some("http://localhost:8000/"));
    }
}

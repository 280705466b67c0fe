// Session bootstrap: resolve a broadcast page into a stream token and room id
//
// One GET against the human-facing broadcast page. The token comes from the
// `ttwid` cookie, the room id from the embedded RENDER_DATA JSON blob. Failing
// to extract either is fatal for the run.

use crate::error::{PickerError, PickerResult};
use regex::Regex;
use reqwest::header::{HeaderMap, ACCEPT, COOKIE, SET_COOKIE, USER_AGENT};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const SESSION_COOKIE: &str = "ttwid";
const PAGE_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,\
image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9";
const NONCE_COOKIE: &str = "__ac_nonce=0638733a400869171be51";
const ROOM_ID_POINTER: &str = "/app/initialState/roomStore/roomInfo/roomId";
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Output of the bootstrap step, required to open the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub room_id: String,
}

impl Session {
    /// Cookie header value for the stream handshake
    pub fn cookie_header(&self) -> String {
        format!("{}={}", SESSION_COOKIE, self.token)
    }
}

pub struct SessionResolver {
    client: reqwest::Client,
    user_agent: String,
}

impl SessionResolver {
    pub fn new(user_agent: impl Into<String>) -> PickerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            user_agent: user_agent.into(),
        })
    }

    /// Fetch the broadcast page and extract the session
    pub async fn resolve(&self, page_url: &str) -> PickerResult<Session> {
        info!("Resolving broadcast page {}", page_url);

        let response = self
            .client
            .get(page_url)
            .header(ACCEPT, PAGE_ACCEPT)
            .header(USER_AGENT, &self.user_agent)
            .header(COOKIE, NONCE_COOKIE)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PickerError::Bootstrap(format!(
                "broadcast page returned {}",
                response.status()
            )));
        }

        let token = extract_cookie(response.headers(), SESSION_COOKIE)
            .ok_or_else(|| PickerError::MissingCookie(SESSION_COOKIE.to_string()))?;
        let body = response.text().await?;
        debug!("Broadcast page body: {} bytes", body.len());

        let room_id = extract_room_id(&body)?;
        info!("Resolved room {}", room_id);

        Ok(Session { token, room_id })
    }
}

/// Value of cookie `name` from the `Set-Cookie` response headers
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Room id from the page's embedded, percent-encoded RENDER_DATA JSON
pub fn extract_room_id(html: &str) -> PickerResult<String> {
    let pattern = Regex::new(r#"(?s)<script id="RENDER_DATA" type="application/json">(.*?)</script>"#)
        .map_err(|e| PickerError::Bootstrap(e.to_string()))?;

    let encoded = pattern
        .captures(html)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| PickerError::Bootstrap("RENDER_DATA block not found".to_string()))?
        .as_str();

    let decoded = urlencoding::decode(encoded)
        .map_err(|e| PickerError::Bootstrap(format!("RENDER_DATA is not valid UTF-8: {}", e)))?;
    let data: Value = serde_json::from_str(&decoded)?;

    match data.pointer(ROOM_ID_POINTER) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(PickerError::MissingRoomId),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn page_with(json: &str) -> String {
        format!(
            r#"<html><head></head><body><script id="RENDER_DATA" type="application/json">{}</script></body></html>"#,
            urlencoding::encode(json)
        )
    }

    #[test]
    fn test_extract_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("__ac_nonce=abc; Path=/"),
        );
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("ttwid=1%7Ctoken123; Path=/; HttpOnly"),
        );

        assert_eq!(
            extract_cookie(&headers, "ttwid"),
            Some("1%7Ctoken123".to_string())
        );
        assert_eq!(extract_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_extract_room_id_string_and_number() {
        let html = page_with(r#"{"app":{"initialState":{"roomStore":{"roomInfo":{"roomId":"7201234567890"}}}}}"#);
        assert_eq!(extract_room_id(&html).unwrap(), "7201234567890");

        let html = page_with(r#"{"app":{"initialState":{"roomStore":{"roomInfo":{"roomId":42}}}}}"#);
        assert_eq!(extract_room_id(&html).unwrap(), "42");
    }

    #[test]
    fn test_missing_room_id_is_fatal() {
        let html = page_with(r#"{"app":{"initialState":{"roomStore":{"roomInfo":{}}}}}"#);
        assert!(matches!(extract_room_id(&html), Err(PickerError::MissingRoomId)));
    }

    #[test]
    fn test_missing_render_data_is_fatal() {
        assert!(matches!(
            extract_room_id("<html><body>nothing here</body></html>"),
            Err(PickerError::Bootstrap(_))
        ));
    }

    #[test]
    fn test_session_cookie_header() {
        let session = Session {
            token: "abc".to_string(),
            room_id: "1".to_string(),
        };
        assert_eq!(session.cookie_header(), "ttwid=abc");
    }
}

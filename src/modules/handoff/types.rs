use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use url::Url;

use super::HandoffError;
use crate::modules::auth::tokens::TokenRecord;
use crate::AUTH_CODE_TTL_SECS;

/// Pending desktop sign-in, created by the desktop client. Read-only here.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Session {
    pub session_id: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub state: String,
    pub redirect_uri: String,
    pub client_id: String,
    /// Epoch seconds
    pub expires_at: u64,
    pub created_at: u64,
}

impl OAuth2Session {
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expires_at < now_secs
    }

    /// Build from a typed-attribute item (`{"state": {"S": "..."}, ...}`)
    pub fn from_item(item: &Map<String, Value>) -> Result<Self, HandoffError> {
        Ok(Self {
            session_id: string_attr(item, "sessionId")?
                .ok_or_else(|| missing("sessionId"))?,
            code_challenge: string_attr(item, "codeChallenge")?.unwrap_or_default(),
            code_challenge_method: string_attr(item, "codeChallengeMethod")?.unwrap_or_default(),
            state: string_attr(item, "state")?.ok_or_else(|| missing("state"))?,
            redirect_uri: string_attr(item, "redirectUri")?.ok_or_else(|| missing("redirectUri"))?,
            client_id: string_attr(item, "clientId")?.unwrap_or_default(),
            expires_at: number_attr(item, "expiresAt")?.ok_or_else(|| missing("expiresAt"))?,
            created_at: number_attr(item, "createdAt")?.unwrap_or_default(),
        })
    }
}

/// Single-use code the desktop client exchanges for the user's tokens.
/// `used` is only ever written as `false` here; the consumer flips it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationCode {
    pub code: String,
    pub oauth_session_id: String,
    pub cognito_access_token: String,
    pub cognito_id_token: String,
    pub cognito_refresh_token: String,
    pub used: bool,
    /// Epoch seconds
    pub expires_at: u64,
    pub created_at: u64,
}

impl AuthorizationCode {
    pub fn new(code: &str, oauth_session_id: &str, tokens: &TokenRecord, now_secs: u64) -> Self {
        Self {
            code: code.to_string(),
            oauth_session_id: oauth_session_id.to_string(),
            cognito_access_token: tokens.access_token.clone(),
            cognito_id_token: tokens.id_token.clone(),
            cognito_refresh_token: tokens.refresh_token.clone(),
            used: false,
            expires_at: now_secs + AUTH_CODE_TTL_SECS,
            created_at: now_secs,
        }
    }

    pub fn to_item(&self) -> Value {
        json!({
            "code": { "S": self.code },
            "oauthSessionId": { "S": self.oauth_session_id },
            "cognitoAccessToken": { "S": self.cognito_access_token },
            "cognitoIdToken": { "S": self.cognito_id_token },
            "cognitoRefreshToken": { "S": self.cognito_refresh_token },
            "used": { "BOOL": self.used },
            "expiresAt": { "N": self.expires_at.to_string() },
            "createdAt": { "N": self.created_at.to_string() },
        })
    }
}

/// What the desktop client needs back: the code plus the session's state and redirect target
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HandoffGrant {
    pub code: String,
    pub state: String,
    pub redirect_uri: String,
}

impl HandoffGrant {
    /// `redirectUri?code=<code>&state=<state>`, keeping any query the URI already has
    pub fn redirect_url(&self) -> Result<Url, HandoffError> {
        let mut url = Url::parse(&self.redirect_uri)?;
        url.query_pairs_mut()
            .append_pair("code", &self.code)
            .append_pair("state", &self.state);
        Ok(url)
    }
}

fn missing(name: &str) -> HandoffError {
    HandoffError::InvalidItem(format!("missing attribute {}", name))
}

fn string_attr(item: &Map<String, Value>, name: &str) -> Result<Option<String>, HandoffError> {
    match item.get(name) {
        None => Ok(None),
        Some(attr) => attr
            .get("S")
            .and_then(Value::as_str)
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandoffError::InvalidItem(format!("{} is not a string", name))),
    }
}

fn number_attr(item: &Map<String, Value>, name: &str) -> Result<Option<u64>, HandoffError> {
    match item.get(name) {
        None => Ok(None),
        Some(attr) => {
            let raw = attr
                .get("N")
                .and_then(Value::as_str)
                .ok_or_else(|| HandoffError::InvalidItem(format!("{} is not a number", name)))?;
            // Numbers may carry a fractional part; whole seconds are enough
            let whole = raw.split('.').next().unwrap_or(raw);
            whole
                .parse::<u64>()
                .map(Some)
                .map_err(|_| HandoffError::InvalidItem(format!("{} is not a timestamp: {}", name, raw)))
        }
    }
}

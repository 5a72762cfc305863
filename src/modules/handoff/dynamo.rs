use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::sigv4::{self, Credentials, SigningRequest};
use super::store::HandoffStore;
use super::types::{AuthorizationCode, OAuth2Session};
use super::HandoffError;
use crate::modules::auth::cognito::{decode_response, AMZ_JSON};
use crate::modules::auth::provider::ProviderError;
use crate::modules::config::AppConfig;
use crate::modules::utils::time::{Clock, SystemClock};
use crate::HTTP_TIMEOUT_SECS;

const IDENTITY_TARGET_PREFIX: &str = "AWSCognitoIdentityService";
const DYNAMO_TARGET_PREFIX: &str = "DynamoDB_20120810";
const DYNAMO_JSON: &str = "application/x-amz-json-1.0";
/// Credentials this close to expiry are fetched again
const CREDENTIALS_SLACK_SECS: u64 = 60;

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetIdBody {
    identity_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialsBody {
    access_key_id: String,
    secret_key: String,
    #[serde(default)]
    session_token: Option<String>,
    #[serde(default)]
    expiration: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetCredentialsBody {
    credentials: CredentialsBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetItemBody {
    #[serde(default)]
    item: Option<Map<String, Value>>,
}

struct CachedCredentials {
    id_token: String,
    credentials: Credentials,
}

/// Handoff tables in DynamoDB, reached with temporary credentials that the
/// identity pool issues in exchange for the user's ID token
pub struct DynamoHandoffStore {
    http: Client,
    region: String,
    identity_pool_id: String,
    login_provider: String,
    sessions_table: String,
    codes_table: String,
    identity_endpoint: String,
    dynamo_endpoint: String,
    dynamo_host: String,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<CachedCredentials>>,
}

impl DynamoHandoffStore {
    pub fn from_config(config: &AppConfig) -> Result<Self, HandoffError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            region: config.region.clone(),
            identity_pool_id: config.identity_pool_id.clone(),
            login_provider: config.login_provider(),
            sessions_table: config.sessions_table.clone(),
            codes_table: config.auth_codes_table.clone(),
            identity_endpoint: format!("https://cognito-identity.{}.amazonaws.com/", config.region),
            dynamo_endpoint: format!("https://dynamodb.{}.amazonaws.com/", config.region),
            dynamo_host: format!("dynamodb.{}.amazonaws.com", config.region),
            clock: Arc::new(SystemClock),
            cached: Mutex::new(None),
        })
    }

    fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        content_type: &str,
        target: &str,
        body: &Value,
        signed: Option<&Credentials>,
    ) -> Result<T, HandoffError> {
        let body = body.to_string();
        let mut request = self.http.post(endpoint);

        match signed {
            Some(credentials) => {
                let at = DateTime::<Utc>::from_timestamp_millis(self.clock.now_millis() as i64)
                    .unwrap_or_else(Utc::now);
                let headers = sigv4::sign(
                    &SigningRequest {
                        host: &self.dynamo_host,
                        region: &self.region,
                        service: "dynamodb",
                        content_type,
                        target,
                        body: &body,
                    },
                    credentials,
                    at,
                )
                .map_err(|e| HandoffError::Credentials(format!("Failed to sign request: {}", e)))?;
                for (name, value) in headers {
                    // reqwest derives Host from the URL
                    if name != "host" {
                        request = request.header(name, value);
                    }
                }
            }
            None => {
                request = request
                    .header("Content-Type", content_type)
                    .header("X-Amz-Target", target);
            }
        }

        let response = request
            .body(body)
            .send()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(decode_response(status, &text)?)
    }

    fn cache(&self) -> MutexGuard<'_, Option<CachedCredentials>> {
        self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached credentials for `id_token` that stay valid past the slack window
    fn cached_credentials(&self, id_token: &str) -> Option<Credentials> {
        let now_secs = self.clock.now_secs();
        self.cache()
            .as_ref()
            .filter(|entry| entry.id_token == id_token)
            .filter(|entry| {
                entry
                    .credentials
                    .expiration
                    .map_or(false, |exp| exp > now_secs + CREDENTIALS_SLACK_SECS)
            })
            .map(|entry| entry.credentials.clone())
    }

    fn remember(&self, id_token: &str, credentials: &Credentials) {
        *self.cache() = Some(CachedCredentials {
            id_token: id_token.to_string(),
            credentials: credentials.clone(),
        });
    }

    fn logins(&self, id_token: &str) -> Map<String, Value> {
        let mut logins = Map::new();
        logins.insert(self.login_provider.clone(), Value::String(id_token.to_string()));
        logins
    }

    /// Credentials for `id_token`, reused while they stay valid
    fn credentials(&self, id_token: &str) -> Result<Credentials, HandoffError> {
        if let Some(credentials) = self.cached_credentials(id_token) {
            return Ok(credentials);
        }

        if self.identity_pool_id.is_empty() {
            return Err(HandoffError::Credentials(
                "identity pool is not configured".to_string(),
            ));
        }

        let logins = self.logins(id_token);
        let identity: GetIdBody = self
            .post(
                &self.identity_endpoint,
                AMZ_JSON,
                &format!("{}.GetId", IDENTITY_TARGET_PREFIX),
                &json!({ "IdentityPoolId": self.identity_pool_id, "Logins": logins }),
                None,
            )
            .map_err(|e| HandoffError::Credentials(e.to_string()))?;
        debug!("Resolved identity {}", identity.identity_id);
        let issued: GetCredentialsBody = self
            .post(
                &self.identity_endpoint,
                AMZ_JSON,
                &format!("{}.GetCredentialsForIdentity", IDENTITY_TARGET_PREFIX),
                &json!({ "IdentityId": identity.identity_id, "Logins": logins }),
                None,
            )
            .map_err(|e| HandoffError::Credentials(e.to_string()))?;

        let credentials = Credentials {
            access_key_id: issued.credentials.access_key_id,
            secret_key: issued.credentials.secret_key,
            session_token: issued.credentials.session_token,
            expiration: issued.credentials.expiration.map(|e| e as u64),
        };
        self.remember(id_token, &credentials);
        Ok(credentials)
    }

    fn get_session_request(&self, session_id: &str) -> Value {
        json!({
            "TableName": self.sessions_table,
            "Key": { "sessionId": { "S": session_id } },
            "ConsistentRead": true,
        })
    }

    /// A colliding code fails the write instead of replacing the earlier grant
    fn put_code_request(&self, code: &AuthorizationCode) -> Value {
        json!({
            "TableName": self.codes_table,
            "Item": code.to_item(),
            "ConditionExpression": "attribute_not_exists(code)",
        })
    }
}

impl HandoffStore for DynamoHandoffStore {
    fn get_session(
        &self,
        session_id: &str,
        id_token: &str,
    ) -> Result<Option<OAuth2Session>, HandoffError> {
        let credentials = self.credentials(id_token)?;
        let body: GetItemBody = self.post(
            &self.dynamo_endpoint,
            DYNAMO_JSON,
            &format!("{}.GetItem", DYNAMO_TARGET_PREFIX),
            &self.get_session_request(session_id),
            Some(&credentials),
        )?;
        body.item.as_ref().map(OAuth2Session::from_item).transpose()
    }

    fn put_code(&self, code: &AuthorizationCode, id_token: &str) -> Result<(), HandoffError> {
        let credentials = self.credentials(id_token)?;
        let _: Value = self.post(
            &self.dynamo_endpoint,
            DYNAMO_JSON,
            &format!("{}.PutItem", DYNAMO_TARGET_PREFIX),
            &self.put_code_request(code),
            Some(&credentials),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::auth::service::tests::stored;
    use crate::modules::utils::time::ManualClock;

    const NOW_SECS: u64 = 1_700_000_000;

    fn store_at(clock: Arc<ManualClock>) -> DynamoHandoffStore {
        let mut store = DynamoHandoffStore::from_config(&AppConfig::default()).unwrap();
        store.clock = clock;
        store
    }

    fn issued(expiration: Option<u64>) -> Credentials {
        Credentials {
            access_key_id: "ASIA".to_string(),
            secret_key: "sk".to_string(),
            session_token: Some("tok".to_string()),
            expiration,
        }
    }

    #[test]
    fn test_credentials_cached_per_id_token() {
        let clock = Arc::new(ManualClock::new(NOW_SECS * 1000));
        let store = store_at(clock.clone());
        store.remember("id-1", &issued(Some(NOW_SECS + 120)));

        // Served from the cache: no identity pool is configured to fetch from
        assert_eq!(store.credentials("id-1").unwrap().access_key_id, "ASIA");
        assert!(store.cached_credentials("id-2").is_none());
        assert!(matches!(
            store.credentials("id-2"),
            Err(HandoffError::Credentials(_))
        ));

        clock.advance(59_000);
        assert!(store.cached_credentials("id-1").is_some());
        // Inside the last minute they are fetched again
        clock.advance(1_000);
        assert!(store.cached_credentials("id-1").is_none());
    }

    #[test]
    fn test_credentials_without_expiry_are_not_reused() {
        let store = store_at(Arc::new(ManualClock::new(NOW_SECS * 1000)));
        store.remember("id-1", &issued(None));
        assert!(store.cached_credentials("id-1").is_none());
    }

    #[test]
    fn test_get_session_request() {
        let mut config = AppConfig::default();
        config.sessions_table = "sessions".to_string();
        let store = DynamoHandoffStore::from_config(&config).unwrap();

        assert_eq!(
            store.get_session_request("sess-1"),
            json!({
                "TableName": "sessions",
                "Key": { "sessionId": { "S": "sess-1" } },
                "ConsistentRead": true,
            })
        );
    }

    #[test]
    fn test_put_code_request_refuses_to_overwrite() {
        let store = DynamoHandoffStore::from_config(&AppConfig::default()).unwrap();
        let code = AuthorizationCode::new("c0de", "sess-1", &stored(None), NOW_SECS);

        let request = store.put_code_request(&code);
        assert_eq!(request["TableName"], "fount-auth-codes");
        assert_eq!(request["ConditionExpression"], "attribute_not_exists(code)");
        assert_eq!(request["Item"], code.to_item());
        assert_eq!(request["Item"]["code"]["S"], "c0de");
    }

    #[test]
    fn test_store_from_config() {
        let mut config = AppConfig::default();
        config.region = "eu-west-1".to_string();
        config.user_pool_id = "eu-west-1_AbC".to_string();
        let store = DynamoHandoffStore::from_config(&config).unwrap();

        assert_eq!(store.dynamo_endpoint, "https://dynamodb.eu-west-1.amazonaws.com/");
        assert_eq!(store.login_provider, "cognito-idp.eu-west-1.amazonaws.com/eu-west-1_AbC");
        assert_eq!(store.sessions_table, "fount-oauth2-sessions");
        assert_eq!(store.codes_table, "fount-auth-codes");
    }

    #[test]
    fn test_missing_identity_pool_fails_locally() {
        let store = DynamoHandoffStore::from_config(&AppConfig::default()).unwrap();
        let err = store.get_session("sess-1", "id-token").unwrap_err();
        assert!(matches!(err, HandoffError::Credentials(_)));
    }

    #[test]
    fn test_decode_get_item() {
        let empty: GetItemBody = decode_response(200, "{}").unwrap();
        assert!(empty.item.is_none());

        let body = r#"{"Item":{"sessionId":{"S":"s"},"state":{"S":"st"},"redirectUri":{"S":"http://localhost/cb"},"expiresAt":{"N":"10"}}}"#;
        let parsed: GetItemBody = decode_response(200, body).unwrap();
        let session = OAuth2Session::from_item(parsed.item.as_ref().unwrap()).unwrap();
        assert_eq!(session.state, "st");
    }

    #[test]
    fn test_decode_credentials() {
        let body = r#"{"IdentityId":"us-east-1:abc","Credentials":{"AccessKeyId":"ASIA","SecretKey":"sk","SessionToken":"tok","Expiration":1.7000036E9}}"#;
        let parsed: GetCredentialsBody = decode_response(200, body).unwrap();
        assert_eq!(parsed.credentials.access_key_id, "ASIA");
        assert_eq!(parsed.credentials.expiration.map(|e| e as u64), Some(1_700_003_600));
    }
}

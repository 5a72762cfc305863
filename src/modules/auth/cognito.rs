use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::provider::{
    AuthFlow, AuthenticationResult, CodeDeliveryDetails, IdentityProvider, ProviderError,
    SignUpOutput,
};
use crate::modules::config::AppConfig;
use crate::HTTP_TIMEOUT_SECS;

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
pub(crate) const AMZ_JSON: &str = "application/x-amz-json-1.1";

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeliveryDetailsBody {
    destination: Option<String>,
    delivery_medium: Option<String>,
    attribute_name: Option<String>,
}

impl From<DeliveryDetailsBody> for CodeDeliveryDetails {
    fn from(body: DeliveryDetailsBody) -> Self {
        Self {
            destination: body.destination,
            delivery_medium: body.delivery_medium,
            attribute_name: body.attribute_name,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SignUpBody {
    #[serde(default)]
    user_sub: Option<String>,
    #[serde(default)]
    user_confirmed: Option<bool>,
    #[serde(default)]
    code_delivery_details: Option<DeliveryDetailsBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthResultBody {
    access_token: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthBody {
    #[serde(default)]
    authentication_result: Option<AuthResultBody>,
    #[serde(default)]
    challenge_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ForgotPasswordBody {
    #[serde(default)]
    code_delivery_details: Option<DeliveryDetailsBody>,
}

/// Turn an error body such as `{"__type":"...#NotAuthorizedException","message":"..."}`
/// into a `ProviderError::Service`
pub(crate) fn service_error(status: u16, body: &str) -> ProviderError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let kind = parsed
        .get("__type")
        .and_then(Value::as_str)
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| format!("HTTP {}", status));
    let message = parsed
        .get("message")
        .or_else(|| parsed.get("Message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| kind.clone());
    ProviderError::Service { kind, message }
}

/// Decode a response body, treating non-2xx statuses as service errors
pub(crate) fn decode_response<T: DeserializeOwned>(
    status: u16,
    body: &str,
) -> Result<T, ProviderError> {
    if !(200..300).contains(&status) {
        return Err(service_error(status, body));
    }
    let body = if body.trim().is_empty() { "{}" } else { body };
    serde_json::from_str(body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

/// JSON-1.1 client for the managed identity provider, bound to a single
/// user pool app client
pub struct CognitoClient {
    http: Client,
    endpoint: String,
    client_id: String,
}

impl CognitoClient {
    pub fn new(region: &str, client_id: &str) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("https://cognito-idp.{}.amazonaws.com/", region),
            client_id: client_id.to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        Self::new(&config.region, &config.client_id)
    }

    fn call<T: DeserializeOwned>(&self, operation: &str, payload: Value) -> Result<T, ProviderError> {
        debug!("Identity provider call: {}", operation);
        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", AMZ_JSON)
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, operation))
            .json(&payload)
            .send()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        decode_response(status, &body)
    }
}

impl IdentityProvider for CognitoClient {
    fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutput, ProviderError> {
        let body: SignUpBody = self.call(
            "SignUp",
            json!({
                "ClientId": self.client_id,
                "Username": email,
                "Password": password,
                "UserAttributes": [{ "Name": "email", "Value": email }],
            }),
        )?;
        Ok(SignUpOutput {
            user_sub: body.user_sub.unwrap_or_default(),
            user_confirmed: body.user_confirmed.unwrap_or(false),
            code_delivery_details: body.code_delivery_details.map(Into::into),
        })
    }

    fn confirm_sign_up(&self, email: &str, confirmation_code: &str) -> Result<(), ProviderError> {
        let _: Value = self.call(
            "ConfirmSignUp",
            json!({
                "ClientId": self.client_id,
                "Username": email,
                "ConfirmationCode": confirmation_code,
            }),
        )?;
        Ok(())
    }

    fn initiate_auth(&self, flow: AuthFlow) -> Result<Option<AuthenticationResult>, ProviderError> {
        let (auth_flow, parameters) = match flow {
            AuthFlow::UserPassword { username, password } => (
                "USER_PASSWORD_AUTH",
                json!({ "USERNAME": username, "PASSWORD": password }),
            ),
            AuthFlow::RefreshToken { refresh_token } => (
                "REFRESH_TOKEN_AUTH",
                json!({ "REFRESH_TOKEN": refresh_token }),
            ),
        };
        let body: InitiateAuthBody = self.call(
            "InitiateAuth",
            json!({
                "ClientId": self.client_id,
                "AuthFlow": auth_flow,
                "AuthParameters": parameters,
            }),
        )?;

        if let Some(challenge) = &body.challenge_name {
            debug!("Identity provider answered with challenge {}", challenge);
        }
        Ok(body.authentication_result.map(|r| AuthenticationResult {
            access_token: r.access_token,
            id_token: r.id_token,
            refresh_token: r.refresh_token,
            expires_in: r.expires_in,
        }))
    }

    fn forgot_password(&self, email: &str) -> Result<Option<CodeDeliveryDetails>, ProviderError> {
        let body: ForgotPasswordBody = self.call(
            "ForgotPassword",
            json!({ "ClientId": self.client_id, "Username": email }),
        )?;
        Ok(body.code_delivery_details.map(Into::into))
    }

    fn confirm_forgot_password(
        &self,
        email: &str,
        confirmation_code: &str,
        new_password: &str,
    ) -> Result<(), ProviderError> {
        let _: Value = self.call(
            "ConfirmForgotPassword",
            json!({
                "ClientId": self.client_id,
                "Username": email,
                "ConfirmationCode": confirmation_code,
                "Password": new_password,
            }),
        )?;
        Ok(())
    }

    fn change_password(
        &self,
        access_token: &str,
        previous_password: &str,
        proposed_password: &str,
    ) -> Result<(), ProviderError> {
        let _: Value = self.call(
            "ChangePassword",
            json!({
                "AccessToken": access_token,
                "PreviousPassword": previous_password,
                "ProposedPassword": proposed_password,
            }),
        )?;
        Ok(())
    }

    fn global_sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        let _: Value = self.call("GlobalSignOut", json!({ "AccessToken": access_token }))?;
        Ok(())
    }

    fn delete_user(&self, access_token: &str) -> Result<(), ProviderError> {
        let _: Value = self.call("DeleteUser", json!({ "AccessToken": access_token }))?;
        Ok(())
    }
}

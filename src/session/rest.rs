use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Mutex;

use crate::common::config::AuthConfig;
use crate::common::error::{AttendanceError, Result};
use crate::service::http::{build_client, join_url};
use crate::session::events::{AuthEvent, Subscribers, Subscription};
use crate::session::{AuthProvider, Identity};

/// Identity-toolkit style REST auth (`accounts:signUp`,
/// `accounts:signInWithPassword`, `accounts:signInWithIdp`, `accounts:delete`)
pub struct RestAuthProvider {
    base_url: String,
    api_key: Option<String>,
    http: Client,
    current: Mutex<Option<Identity>>,
    subscribers: Subscribers,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: String,
    id_token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl RestAuthProvider {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            http: build_client(config.timeout_seconds, None)?,
            current: Mutex::new(None),
            subscribers: Subscribers::default(),
        })
    }

    fn call(&self, method: &str, body: serde_json::Value) -> Result<reqwest::blocking::Response> {
        let mut request = self.http.post(join_url(&self.base_url, &format!("accounts:{}", method)));
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }
        let response = request.json(&body).send()?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let message = response
            .json::<ErrorBody>()
            .map(|b| b.error.message)
            .unwrap_or_else(|_| format!("HTTP {}", status));
        tracing::warn!("Auth call {} failed: {}", method, message);
        Err(AttendanceError::remote(friendly_auth_error(&message)))
    }

    fn establish(&self, response: reqwest::blocking::Response) -> Result<Identity> {
        let account: AccountResponse = response.json()?;
        let identity = Identity {
            uid: account.local_id,
            email: account.email,
            id_token: account.id_token,
        };
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    fn set_current(&self, identity: Option<Identity>) {
        if let Ok(mut current) = self.current.lock() {
            *current = identity.clone();
        }
        self.subscribers.notify(match identity {
            Some(identity) => AuthEvent::SignedIn(identity),
            None => AuthEvent::SignedOut,
        });
    }
}

/// Identity-toolkit error codes come back as SCREAMING_CASE tokens
pub(crate) fn friendly_auth_error(code: &str) -> String {
    let head = code.split(':').next().unwrap_or(code).trim();
    match head {
        "EMAIL_EXISTS" => "An account with this email already exists".to_string(),
        "INVALID_EMAIL" => "Please enter a valid email address".to_string(),
        "WEAK_PASSWORD" => "Password should be at least 6 characters".to_string(),
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => {
            "Invalid email or password".to_string()
        }
        "USER_DISABLED" => "This account has been disabled".to_string(),
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "Too many attempts. Please try again later".to_string(),
        _ => code.to_string(),
    }
}

impl AuthProvider for RestAuthProvider {
    fn create_account(&self, email: &str, password: &str) -> Result<Identity> {
        let response = self.call(
            "signUp",
            json!({ "email": email, "password": password, "returnSecureToken": true }),
        )?;
        self.establish(response)
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let response = self.call(
            "signInWithPassword",
            json!({ "email": email, "password": password, "returnSecureToken": true }),
        )?;
        self.establish(response)
    }

    fn sign_in_with_token(&self, provider_token: &str) -> Result<Identity> {
        let response = self.call(
            "signInWithIdp",
            json!({
                "postBody": format!("id_token={}&providerId=google.com", provider_token),
                "requestUri": "http://localhost",
                "returnSecureToken": true,
                "returnIdpCredential": true,
            }),
        )?;
        self.establish(response)
    }

    fn sign_out(&self) -> Result<()> {
        self.set_current(None);
        Ok(())
    }

    fn delete_account(&self, identity: &Identity) -> Result<()> {
        self.call("delete", json!({ "idToken": identity.id_token }))?;
        let was_current = self
            .current_identity()
            .map(|c| c.uid == identity.uid)
            .unwrap_or(false);
        if was_current {
            self.set_current(None);
        }
        Ok(())
    }

    fn current_identity(&self) -> Option<Identity> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    fn restore(&self, identity: Identity) -> Result<()> {
        self.set_current(Some(identity));
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_toolkit_codes_to_readable_text() {
        assert_eq!(friendly_auth_error("EMAIL_EXISTS"), "An account with this email already exists");
        assert_eq!(
            friendly_auth_error("WEAK_PASSWORD : Password should be at least 6 characters"),
            "Password should be at least 6 characters"
        );
        assert_eq!(friendly_auth_error("INVALID_LOGIN_CREDENTIALS"), "Invalid email or password");
        assert_eq!(friendly_auth_error("SOMETHING_NEW"), "SOMETHING_NEW");
    }
}

//! Authentication and session handling
//!
//! Sign-in goes through the hosted backend's OAuth flow: the user opens the
//! provider's authorize URL in a browser and comes back with an access token
//! in the redirect URL fragment. The token is a JWT whose claims carry the
//! user id, so a saved session can be checked offline; `AuthClient` talks to
//! the backend to resolve the full profile, refresh tokens and sign out.
//!
//! ## Session file
//!
//! Stored as JSON in the data directory (`session.json`). Removing the file
//! signs the user out locally.

use std::fs;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::error::AuthError;
use crate::models::{User, UserId};

/// Treat tokens this close to expiry as expired
const EXPIRY_MARGIN_SECS: i64 = 30;

/// A signed-in user and their tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: User,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    user_metadata: Option<UserMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

/// User object returned by the auth API
#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<UserMetadata>,
}

impl From<AuthUser> for User {
    fn from(user: AuthUser) -> Self {
        let metadata = user.user_metadata.unwrap_or_default();
        User {
            id: UserId::new(user.id),
            email: user.email.unwrap_or_default(),
            full_name: metadata.full_name,
            avatar_url: metadata.avatar_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

impl Session {
    /// Build a session from an access token without contacting the backend
    pub fn from_access_token(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
    ) -> Result<Self, AuthError> {
        let access_token = access_token.into();
        let claims = decode_claims(&access_token)?;
        let metadata = claims.user_metadata.unwrap_or_default();
        let expires_at = claims
            .exp
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single());

        Ok(Self {
            access_token,
            refresh_token,
            user: User {
                id: UserId::new(claims.sub),
                email: claims.email.unwrap_or_default(),
                full_name: metadata.full_name,
                avatar_url: metadata.avatar_url,
            },
            expires_at,
        })
    }

    pub fn owner(&self) -> &UserId {
        &self.user.id
    }

    /// Whether the access token is expired (or about to be) at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|exp| exp - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) <= now)
            .unwrap_or(false)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Load a saved session; `None` when nobody is signed in
    pub fn load(path: &Path) -> Result<Option<Self>, AuthError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Persist the session
    pub fn save(&self, path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Delete a saved session; returns whether one existed
    pub fn remove(path: &Path) -> Result<bool, AuthError> {
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }
}

/// Decode the (unverified) claims of a JWT
fn decode_claims(token: &str) -> Result<Claims, AuthError> {
    let mut parts = token.trim().split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(AuthError::InvalidToken("expected three segments".to_string())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::InvalidToken(e.to_string()))
}

/// Pull tokens out of whatever the user pasted after signing in
///
/// Accepts the full redirect URL (tokens in the fragment), a bare fragment
/// (`access_token=...&refresh_token=...`), or just the access token.
pub fn tokens_from_redirect(input: &str) -> Option<(String, Option<String>)> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let params = match input.split_once('#') {
        Some((_, fragment)) => fragment,
        None if input.contains("access_token=") => input,
        None => return Some((input.to_string(), None)),
    };

    let mut access = None;
    let mut refresh = None;
    for (key, value) in url::form_urlencoded::parse(params.as_bytes()) {
        match key.as_ref() {
            "access_token" => access = Some(value.into_owned()),
            "refresh_token" => refresh = Some(value.into_owned()),
            _ => {}
        }
    }
    access.map(|a| (a, refresh))
}

/// Client for the hosted auth API
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    /// URL to open in a browser to start the OAuth flow
    pub fn authorize_url(&self, provider: &str, redirect_to: Option<&str>) -> Result<String, AuthError> {
        let mut url = Url::parse(&self.endpoint("authorize"))
            .map_err(|e| AuthError::Request(format!("invalid backend URL: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", provider);
            if let Some(redirect) = redirect_to {
                query.append_pair("redirect_to", redirect);
            }
        }
        Ok(url.to_string())
    }

    /// Resolve the profile behind an access token
    pub async fn current_user(&self, access_token: &str) -> Result<User, AuthError> {
        let response = self
            .http
            .get(self.endpoint("user"))
            .header("apikey", &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => {
                let user: AuthUser = response.json().await?;
                debug!(user = %user.id, "Resolved current user");
                Ok(user.into())
            }
            401 | 403 => Err(AuthError::Expired),
            status => Err(AuthError::Request(format!("auth API returned {}", status))),
        }
    }

    /// Verify a token against the backend and build a session from it
    pub async fn sign_in_with_token(
        &self,
        access_token: &str,
        refresh_token: Option<String>,
    ) -> Result<Session, AuthError> {
        let mut session = Session::from_access_token(access_token, refresh_token)?;
        session.user = self.current_user(access_token).await?;
        info!(user = %session.user.id.short(), "Signed in");
        Ok(session)
    }

    /// Exchange a refresh token for a new session
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.api_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::Expired);
        }

        let token: TokenResponse = response.json().await?;
        let expires_at = token
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        Ok(Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            user: token.user.into(),
            expires_at,
        })
    }

    /// Revoke the session on the backend
    pub async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self
            .http
            .post(self.endpoint("logout"))
            .header("apikey", &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        // An already-invalid token means there is nothing left to revoke
        match response.status().as_u16() {
            200..=299 | 401 | 403 => {
                info!("Signed out");
                Ok(())
            }
            status => Err(AuthError::Request(format!("logout returned {}", status))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn token(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.signature", header, payload)
    }

    #[test]
    fn test_session_from_access_token() {
        let jwt = token(json!({
            "sub": "6f1c2a9e-1111-4000-8000-000000000000",
            "email": "ada@example.com",
            "exp": 1_900_000_000,
            "user_metadata": { "full_name": "Ada Lovelace" }
        }));

        let session = Session::from_access_token(jwt.clone(), Some("r1".to_string())).unwrap();
        assert_eq!(session.owner().as_str(), "6f1c2a9e-1111-4000-8000-000000000000");
        assert_eq!(session.user.email, "ada@example.com");
        assert_eq!(session.user.display_name(), "Ada Lovelace");
        assert_eq!(session.expires_at.unwrap().timestamp(), 1_900_000_000);
        assert_eq!(session.access_token, jwt);
    }

    #[test]
    fn test_expiry_uses_margin() {
        let jwt = token(json!({ "sub": "u1", "exp": 1_000 }));
        let session = Session::from_access_token(jwt, None).unwrap();

        let early = Utc.timestamp_opt(900, 0).unwrap();
        let close = Utc.timestamp_opt(980, 0).unwrap();
        assert!(!session.is_expired_at(early));
        assert!(session.is_expired_at(close));

        let no_exp = Session::from_access_token(token(json!({ "sub": "u1" })), None).unwrap();
        assert!(!no_exp.is_expired());
    }

    #[test]
    fn test_invalid_tokens() {
        assert!(matches!(
            Session::from_access_token("not-a-jwt", None),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            Session::from_access_token("a.!!!.c", None),
            Err(AuthError::InvalidToken(_))
        ));
        // Valid base64 but no subject
        let jwt = token(json!({ "email": "x@example.com" }));
        assert!(Session::from_access_token(jwt, None).is_err());
    }

    #[test]
    fn test_session_file_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("session.json");

        assert!(Session::load(&path).unwrap().is_none());
        assert!(!Session::remove(&path).unwrap());

        let session = Session::from_access_token(token(json!({ "sub": "u1" })), None).unwrap();
        session.save(&path).unwrap();
        assert_eq!(Session::load(&path).unwrap(), Some(session));

        assert!(Session::remove(&path).unwrap());
        assert!(Session::load(&path).unwrap().is_none());
    }

    #[test]
    fn test_tokens_from_redirect() {
        let url = "http://localhost:3000/bookmarks#access_token=abc.def.ghi&expires_in=3600&refresh_token=r1&token_type=bearer";
        assert_eq!(
            tokens_from_redirect(url),
            Some(("abc.def.ghi".to_string(), Some("r1".to_string())))
        );

        assert_eq!(
            tokens_from_redirect("access_token=abc&token_type=bearer"),
            Some(("abc".to_string(), None))
        );
        assert_eq!(
            tokens_from_redirect(" abc.def.ghi "),
            Some(("abc.def.ghi".to_string(), None))
        );
        assert_eq!(tokens_from_redirect("https://x.com/#error=access_denied"), None);
        assert_eq!(tokens_from_redirect(""), None);
    }

    #[test]
    fn test_authorize_url() {
        let client = AuthClient::new("https://abc.example.co/", "anon").unwrap();
        let url = client
            .authorize_url("google", Some("http://localhost:3000/bookmarks"))
            .unwrap();
        assert_eq!(
            url,
            "https://abc.example.co/auth/v1/authorize?provider=google&redirect_to=http%3A%2F%2Flocalhost%3A3000%2Fbookmarks"
        );
    }
}

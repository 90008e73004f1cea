/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */

use std::collections::HashMap;

use const_format::concatcp;
use reqwest_oauth1::{OAuthClientProvider, TokenReaderFuture};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FlickrdError, Result};
use crate::flickr_client::FlickrClient;
use crate::interaction::Interaction;

const OAUTH_ORIGIN: &str = "https://www.flickr.com";
const REQUEST_TOKEN_URL: &str = concatcp!(OAUTH_ORIGIN, "/services/oauth/request_token");
const ACCESS_TOKEN_URL: &str = concatcp!(OAUTH_ORIGIN, "/services/oauth/access_token");
const AUTHORIZE_URL: &str = concatcp!(OAUTH_ORIGIN, "/services/oauth/authorize");

/// OAuth access token plus the account it was issued for
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub(crate) struct Credential {
    pub(crate) api_key: String,
    pub(crate) token: String,
    pub(crate) token_secret: String,
    pub(crate) user_nsid: String,
    pub(crate) username: String,
    pub(crate) fullname: Option<String>,
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.fullname.as_deref().filter(|v| !v.is_empty()) {
            Some(fullname) => write!(f, "{}({})", self.username, fullname),
            None => write!(f, "{}", self.username),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RequestToken {
    pub(crate) token: String,
    pub(crate) secret: String,
}

/// Where the credential is persisted between runs
pub(crate) trait TokenStore {
    fn load_credential(&self) -> Result<Option<Credential>>;
    fn save_credential(&self, credential: &Credential) -> Result<()>;
    fn delete_credential(&self) -> Result<()>;
}

/// The OAuth 1.0a endpoints
pub(crate) trait TokenService {
    fn api_key(&self) -> &str;

    async fn request_token(&self) -> Result<RequestToken>;

    fn authorize_url(&self, request: &RequestToken) -> Result<Url>;

    async fn access_token(&self, request: &RequestToken, verifier: &str) -> Result<Credential>;

    /// Ok(false) when Flickr no longer accepts the token
    async fn check_token(&self, credential: &Credential) -> Result<bool>;
}

/// Talks to the Flickr OAuth service
pub(crate) struct FlickrOAuth {
    api_key: String,
    secret_key: String,
}

impl FlickrOAuth {
    pub(crate) fn new(api_key: &str, secret_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }
}

impl TokenService for FlickrOAuth {
    fn api_key(&self) -> &str {
        &self.api_key
    }

    async fn request_token(&self) -> Result<RequestToken> {
        let secrets = reqwest_oauth1::Secrets::new(self.api_key.as_str(), self.secret_key.as_str());

        let client = reqwest::Client::new();
        let resp = client
            .oauth1(secrets)
            .get(REQUEST_TOKEN_URL)
            .query(&[("oauth_callback", "oob")])
            .send()
            .parse_oauth_token()
            .await
            .map_err(|e| FlickrdError::Auth(format!("request token: {}", e)))?;

        Ok(RequestToken {
            token: resp.oauth_token,
            secret: resp.oauth_token_secret,
        })
    }

    fn authorize_url(&self, request: &RequestToken) -> Result<Url> {
        Url::parse_with_params(
            AUTHORIZE_URL,
            &[("oauth_token", request.token.as_str()), ("perms", "read")],
        )
        .map_err(|e| FlickrdError::Auth(e.to_string()))
    }

    async fn access_token(&self, request: &RequestToken, verifier: &str) -> Result<Credential> {
        let secrets = reqwest_oauth1::Secrets::new(self.api_key.as_str(), self.secret_key.as_str())
            .token(request.token.as_str(), request.secret.as_str());

        let client = reqwest::Client::new();
        let resp = client
            .oauth1(secrets)
            .get(ACCESS_TOKEN_URL)
            .query(&[("oauth_verifier", verifier)])
            .send()
            .await
            .map_err(|e| FlickrdError::Auth(format!("access token: {}", e)))?;
        if !resp.status().is_success() {
            return Err(FlickrdError::Auth(format!(
                "access token request returned {}",
                resp.status()
            )));
        }
        let body = resp.text().await?;
        credential_from_access_response(&self.api_key, &body)
    }

    async fn check_token(&self, credential: &Credential) -> Result<bool> {
        let client = FlickrClient::new(&self.secret_key, credential);
        match client.test_login().await {
            Ok(nsid) => {
                log::debug!("Stored token is valid for {}", nsid);
                Ok(true)
            }
            Err(err) if err.is_auth() => {
                log::debug!("Stored token rejected: {}", err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

// Parses the form encoded body returned by the access token endpoint
fn credential_from_access_response(api_key: &str, body: &str) -> Result<Credential> {
    let fields: HashMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    let field = |name: &str| -> Result<String> {
        fields
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| FlickrdError::Auth(format!("access token response lacks {}", name)))
    };

    Ok(Credential {
        api_key: api_key.to_string(),
        token: field("oauth_token")?,
        token_secret: field("oauth_token_secret")?,
        user_nsid: field("user_nsid")?,
        username: fields.get("username").cloned().unwrap_or_default(),
        fullname: fields.get("fullname").cloned(),
    })
}

/// Establishes an authorized session, prompting the user only when needed
pub(crate) struct AuthSession<'a, S, T> {
    service: S,
    store: &'a T,
}

impl<'a, S: TokenService, T: TokenStore> AuthSession<'a, S, T> {
    pub(crate) fn new(service: S, store: &'a T) -> Self {
        Self { service, store }
    }

    /// Returns a valid credential, running the interactive flow when there is
    /// no stored token or the stored one was revoked.
    pub(crate) async fn ensure_authenticated<I: Interaction>(
        &self,
        interaction: &mut I,
    ) -> Result<Credential> {
        match self.store.load_credential()? {
            Some(credential) if credential.api_key == self.service.api_key() => {
                if self.service.check_token(&credential).await? {
                    return Ok(credential);
                }
                log::warn!("The stored Flickr token is no longer valid. Authorization is required again.");
                self.clear_credentials()?;
            }
            Some(_) => {
                log::info!("The stored Flickr token was issued for another api_key. Authorization is required again.");
                self.clear_credentials()?;
            }
            None => log::debug!("No stored Flickr token"),
        }

        let credential = self.authorize(interaction).await?;
        self.store.save_credential(&credential)?;
        log::info!("Authorization completed for {}", credential);
        Ok(credential)
    }

    async fn authorize<I: Interaction>(&self, interaction: &mut I) -> Result<Credential> {
        // step 1: acquire request token & token secret
        let request = self.service.request_token().await?;

        // step 2. acquire user pin
        let url = self.service.authorize_url(&request)?;
        let verifier = interaction.verification_code(&url)?;

        // step 3. acquire access token
        self.service.access_token(&request, &verifier).await
    }

    /// Forgets the stored token so the next run authorizes again
    pub(crate) fn clear_credentials(&self) -> Result<()> {
        self.store.delete_credential()
    }
}

// Get Consumer and Access Tokens
pub(crate) async fn get_full_auth_tokens<T: TokenStore, I: Interaction>(
    api_key: &str,
    secret_key: &str,
    store: &T,
    interaction: &mut I,
) -> Result<Credential> {
    AuthSession::new(FlickrOAuth::new(api_key, secret_key), store)
        .ensure_authenticated(interaction)
        .await
}

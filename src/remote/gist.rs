// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! GitHub Gist backed remote store.
//!
//! Each rule set is stored as one gist whose description is the rule set
//! title. Every request is a single blocking attempt bounded by the request
//! timeout of [`Settings`]. Nothing is retried, a failed request fails the
//! whole operation.

use crate::{
    config::{Settings, Token},
    remote::{RemoteError, RemoteRuleSet, RemoteStore, Result},
};

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{
    blocking::{Client, RequestBuilder, Response},
    header::{ACCEPT, AUTHORIZATION},
    Method, StatusCode,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

const MEDIA_TYPE: &str = "application/vnd.github.v3+json";
const PAGE_SIZE: usize = 100;

/// Remote store client for GitHub Gist API.
#[derive(Debug, Clone)]
pub struct GistClient {
    http: Client,
    api_url: String,
    token: Option<Token>,
}

impl GistClient {
    /// Construct new client.
    ///
    /// Without a token only public rule sets can be fetched.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Transport`] if HTTP client cannot be built.
    pub fn new(settings: &Settings, token: Option<Token>) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("rulegist/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn require_token(&self) -> Result<()> {
        match self.token {
            Some(_) => Ok(()),
            None => Err(RemoteError::MissingToken),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!("{method} {path}");
        let request = self
            .http
            .request(method, format!("{}{}", self.api_url, path))
            .header(ACCEPT, MEDIA_TYPE);

        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("token {}", token.secret())),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder, subject: &str) -> Result<Response> {
        let response = request.send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        Err(classify(status, self.token.is_some(), subject, body))
    }
}

impl RemoteStore for GistClient {
    fn has_credential(&self) -> bool {
        self.token.is_some()
    }

    #[instrument(skip(self, files), level = "debug")]
    fn create(&self, title: &str, files: &BTreeMap<String, String>, public: bool) -> Result<String> {
        self.require_token()?;
        let payload = CreatePayload {
            description: title,
            public,
            files: files
                .iter()
                .map(|(name, content)| (name.as_str(), FileContent { content }))
                .collect(),
        };

        let request = self.request(Method::POST, "/gists").json(&payload);
        let created: RemoteRuleSet = self.send(request, title)?.json()?;
        Ok(created.id)
    }

    #[instrument(skip(self, files), level = "debug")]
    fn update_wholesale(
        &self,
        id: &str,
        files: &BTreeMap<String, Option<String>>,
    ) -> Result<String> {
        self.require_token()?;
        let payload = UpdatePayload {
            files: files
                .iter()
                .map(|(name, content)| {
                    let content = content.as_deref().map(|content| FileContent { content });
                    (name.as_str(), content)
                })
                .collect(),
        };

        let request = self
            .request(Method::PATCH, &format!("/gists/{id}"))
            .json(&payload);
        let updated: RemoteRuleSet = self.send(request, id)?.json()?;
        Ok(updated.id)
    }

    #[instrument(skip(self), level = "debug")]
    fn fetch_by_id(&self, id: &str) -> Result<RemoteRuleSet> {
        let request = self.request(Method::GET, &format!("/gists/{id}"));
        Ok(self.send(request, id)?.json()?)
    }

    #[instrument(skip(self), level = "debug")]
    fn list_mine_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteRuleSet>> {
        self.require_token()?;
        let mut listing = Vec::new();
        for page in 1.. {
            let mut query = vec![
                ("per_page", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ];
            if let Some(since) = since {
                query.push(("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
            }

            let request = self.request(Method::GET, "/gists").query(&query);
            let batch: Vec<RemoteRuleSet> = self.send(request, "gists")?.json()?;
            let done = batch.len() < PAGE_SIZE;
            listing.extend(batch);
            if done {
                break;
            }
        }

        debug!("listed {} rule sets", listing.len());
        Ok(listing)
    }

    #[instrument(skip(self), level = "debug")]
    fn fetch_with_history(&self, id: &str) -> Result<RemoteRuleSet> {
        // INVARIANT: Single gist responses always embed the revision history.
        self.fetch_by_id(id)
    }

    #[instrument(skip(self), level = "debug")]
    fn delete(&self, id: &str) -> Result<()> {
        self.require_token()?;
        let request = self.request(Method::DELETE, &format!("/gists/{id}"));
        let response = self.send(request, id)?;
        if response.status() != StatusCode::NO_CONTENT {
            return Err(RemoteError::Status {
                status: response.status().as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn fetch_raw(&self, url: &str) -> Result<Vec<u8>> {
        // INVARIANT: Raw content URLs are pre-signed, never send the token along.
        let response = self.http.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify(status, false, url, body));
        }

        Ok(response.bytes()?.to_vec())
    }
}

/// Map unsuccessful status to error.
pub(crate) fn classify(
    status: StatusCode,
    authenticated: bool,
    subject: &str,
    body: String,
) -> RemoteError {
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound(subject.to_string()),
        StatusCode::UNAUTHORIZED if authenticated => RemoteError::InvalidToken,
        StatusCode::UNAUTHORIZED => RemoteError::AuthRequired(subject.to_string()),
        _ => RemoteError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

#[derive(Debug, Serialize)]
struct FileContent<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreatePayload<'a> {
    description: &'a str,
    public: bool,
    files: BTreeMap<&'a str, FileContent<'a>>,
}

#[derive(Debug, Serialize)]
struct UpdatePayload<'a> {
    files: BTreeMap<&'a str, Option<FileContent<'a>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenSource;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn settings() -> Settings {
        let mut settings = Settings::new("unused");
        settings.api_url = "https://api.example.com/".into();
        settings
    }

    #[test]
    fn classify_unsuccessful_status() {
        let result = classify(StatusCode::NOT_FOUND, true, "abc", String::new());
        assert!(matches!(result, RemoteError::NotFound(id) if id == "abc"));

        let result = classify(StatusCode::UNAUTHORIZED, false, "abc", String::new());
        assert!(matches!(result, RemoteError::AuthRequired(id) if id == "abc"));

        let result = classify(StatusCode::UNAUTHORIZED, true, "abc", String::new());
        assert!(matches!(result, RemoteError::InvalidToken));

        let result = classify(StatusCode::UNPROCESSABLE_ENTITY, true, "abc", "bad".into());
        assert!(matches!(result, RemoteError::Status { status: 422, body } if body == "bad"));
    }

    #[test]
    fn request_carries_token_only_when_present() -> anyhow::Result<()> {
        let anonymous = GistClient::new(&settings(), None)?;
        let request = anonymous.request(Method::GET, "/gists/abc").build()?;
        assert_eq!(request.url().as_str(), "https://api.example.com/gists/abc");
        assert_eq!(request.headers()[ACCEPT], MEDIA_TYPE);
        assert!(request.headers().get(AUTHORIZATION).is_none());

        let token = Token::new("ghp_blah", TokenSource::Environment);
        let authenticated = GistClient::new(&settings(), Some(token))?;
        let request = authenticated.request(Method::GET, "/gists/abc").build()?;
        assert_eq!(request.headers()[AUTHORIZATION], "token ghp_blah");

        Ok(())
    }

    #[test]
    fn mutations_require_token_before_any_request() -> anyhow::Result<()> {
        let client = GistClient::new(&settings(), None)?;
        assert!(!client.has_credential());

        let result = client.create("T", &BTreeMap::new(), false);
        assert!(matches!(result, Err(RemoteError::MissingToken)));

        let result = client.update_wholesale("abc", &BTreeMap::new());
        assert!(matches!(result, Err(RemoteError::MissingToken)));

        let result = client.list_mine_since(None);
        assert!(matches!(result, Err(RemoteError::MissingToken)));

        let result = client.delete("abc");
        assert!(matches!(result, Err(RemoteError::MissingToken)));

        Ok(())
    }

    #[test]
    fn update_payload_nulls_removed_entries() -> anyhow::Result<()> {
        let payload = UpdatePayload {
            files: BTreeMap::from([
                ("keep_mdc", Some(FileContent { content: "X" })),
                ("stale_mdc", None),
            ]),
        };

        let result = serde_json::to_value(&payload)?;
        let expect = json!({
            "files": {
                "keep_mdc": { "content": "X" },
                "stale_mdc": null,
            }
        });
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn create_payload_is_private_by_default_shape() -> anyhow::Result<()> {
        let payload = CreatePayload {
            description: "T",
            public: false,
            files: BTreeMap::from([("python_linting_mdc", FileContent { content: "X" })]),
        };

        let result = serde_json::to_value(&payload)?;
        let expect = json!({
            "description": "T",
            "public": false,
            "files": { "python_linting_mdc": { "content": "X" } },
        });
        assert_eq!(result, expect);

        Ok(())
    }
}

//! OAuth token refresh and authorized request helpers.
//!
//! Refresh is idempotent under concurrency: two racing 401s may each
//! trigger a refresh and the last write wins. Each successful refresh
//! emits exactly one `connection:updated` event so the orchestrator can
//! persist the new credentials.

use chrono::{Duration as ChronoDuration, Utc};
use faktur_core::error::{FakturError, Result};
use faktur_core::events::{EventBus, InboxEvent};
use faktur_core::types::OAuthTokens;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Refresh the access token in place via a form-urlencoded POST to the
/// connection's token endpoint.
pub async fn refresh(client: &Client, tokens: &mut OAuthTokens) -> Result<()> {
    let refresh_token = tokens
        .refresh_token
        .clone()
        .ok_or_else(|| FakturError::auth(401, "no refresh token on connection"))?;

    let mut form = vec![
        ("grant_type", "refresh_token".to_string()),
        ("refresh_token", refresh_token),
        ("client_id", tokens.client_id.clone()),
    ];
    if let Some(secret) = &tokens.client_secret {
        form.push(("client_secret", secret.clone()));
    }

    let response = client
        .post(&tokens.token_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| FakturError::transport(format!("token refresh: {}", e)))?;
    let status = response.status();
    if !status.is_success() {
        return Err(FakturError::auth(
            status.as_u16(),
            format!("token refresh failed with {}", status),
        ));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| FakturError::parse(format!("token response: {}", e)))?;

    tokens.access_token = token.access_token;
    if let Some(new_refresh) = token.refresh_token {
        tokens.refresh_token = Some(new_refresh);
    }
    // 10 s safety margin against clock drift between us and the provider
    tokens.expires_at = token
        .expires_in
        .map(|seconds| Utc::now() + ChronoDuration::seconds(seconds - 10));

    debug!("refreshed access token via {}", tokens.token_url);
    Ok(())
}

/// GET with bearer auth; on 401 refresh once, emit `connection:updated`
/// and retry. A second 401 surfaces as an auth error.
pub async fn get_with_refresh(
    client: &Client,
    url: &str,
    tokens: &mut OAuthTokens,
    connection_id: &str,
    bus: &EventBus,
) -> Result<reqwest::Response> {
    let first = client
        .get(url)
        .bearer_auth(&tokens.access_token)
        .send()
        .await
        .map_err(|e| FakturError::transport(format!("GET {}: {}", url, e)))?;

    if first.status() != StatusCode::UNAUTHORIZED {
        return check_status(first, url);
    }

    warn!("401 from {}, attempting token refresh", url);
    refresh(client, tokens).await?;
    bus.publish(InboxEvent::ConnectionUpdated {
        connection_id: connection_id.to_string(),
        tokens: tokens.clone(),
    });

    let second = client
        .get(url)
        .bearer_auth(&tokens.access_token)
        .send()
        .await
        .map_err(|e| FakturError::transport(format!("GET {}: {}", url, e)))?;
    if second.status() == StatusCode::UNAUTHORIZED {
        return Err(FakturError::auth(401, format!("still unauthorized: {}", url)));
    }
    check_status(second, url)
}

fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(FakturError::auth(status.as_u16(), url.to_string()));
    }
    if !status.is_success() {
        return Err(FakturError::transport(format!("{} returned {}", url, status)));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tokens(token_url: String) -> OAuthTokens {
        OAuthTokens {
            access_token: "old".to_string(),
            refresh_token: Some("r1".to_string()),
            expires_at: None,
            client_id: "cid".to_string(),
            client_secret: Some("secret".to_string()),
            token_url,
        }
    }

    #[tokio::test]
    async fn test_refresh_updates_token_in_place() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .and(body_string_contains("client_id=cid"))
            .and(body_string_contains("client_secret=secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "X",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut tokens = tokens(format!("{}/token", server.uri()));
        refresh(&Client::new(), &mut tokens).await.unwrap();

        assert_eq!(tokens.access_token, "X");
        let expires = tokens.expires_at.unwrap();
        let delta = (expires - Utc::now()).num_seconds();
        assert!((3580..=3595).contains(&delta), "delta was {}", delta);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let mut tokens = tokens(format!("{}/token", server.uri()));
        let err = refresh(&Client::new(), &mut tokens).await.unwrap_err();
        assert!(err.is_auth());
        // old token untouched on failure
        assert_eq!(tokens.access_token, "old");
    }

    #[tokio::test]
    async fn test_get_with_refresh_retries_once() {
        let server = MockServer::start().await;
        // first call with the old token: 401
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(wiremock::matchers::header("authorization", "Bearer old"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        // refresh endpoint
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;
        // retry with the fresh token: 200
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(wiremock::matchers::header("authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let mut tokens = tokens(format!("{}/token", server.uri()));

        let response = get_with_refresh(
            &Client::new(),
            &format!("{}/files", server.uri()),
            &mut tokens,
            "conn1",
            &bus,
        )
        .await
        .unwrap();
        assert_eq!(response.text().await.unwrap(), "ok");
        assert_eq!(tokens.access_token, "new");

        // exactly one connection:updated
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "connection:updated");
        assert!(rx.try_recv().is_err());
    }
}

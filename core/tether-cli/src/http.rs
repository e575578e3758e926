//! Blocking REST client for history, rollback, sessions and task status.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tether_core::config::ServerConfig;
use tether_core::{BackendApi, Result, TetherError};
use tether_protocol::{
    HistoryResponse, RenameSessionRequest, RollbackRequest, RollbackResponse, SessionSummary,
    TaskStatusResponse,
};
use tracing::debug;
use url::Url;

pub struct HttpApi {
    client: Client,
    base: Url,
    auth_token: Option<String>,
}

impl HttpApi {
    pub fn new(server: &ServerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(server.request_timeout_ms))
            .build()
            .map_err(|err| TetherError::api("client", err.to_string()))?;
        // A trailing slash keeps `join` from replacing the last path segment.
        let mut base = Url::parse(&server.api_url)
            .map_err(|err| TetherError::api(&server.api_url, err.to_string()))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(Self {
            client,
            base,
            auth_token: server.auth_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|err| TetherError::api(path, err.to_string()))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn execute(&self, endpoint: &str, request: RequestBuilder) -> Result<Response> {
        debug!(endpoint, "Backend request");
        self.authorized(request)
            .send()
            .and_then(Response::error_for_status)
            .map_err(|err| TetherError::api(endpoint, err.to_string()))
    }

    fn json<T: DeserializeOwned>(&self, endpoint: &str, request: RequestBuilder) -> Result<T> {
        self.execute(endpoint, request)?
            .json::<T>()
            .map_err(|err| TetherError::api(endpoint, format!("decoding response: {}", err)))
    }
}

impl BackendApi for HttpApi {
    fn fetch_history(&self, session_id: &str) -> Result<HistoryResponse> {
        let url = self.endpoint("history")?;
        let request = self.client.get(url).query(&[("session_id", session_id)]);
        self.json("history", request)
    }

    fn rollback_to_message(&self, request: &RollbackRequest) -> Result<RollbackResponse> {
        let url = self.endpoint("rollback/to-message")?;
        let request = self.client.post(url).json(request);
        self.json("rollback/to-message", request)
    }

    fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let url = self.endpoint("sessions")?;
        self.json("sessions", self.client.get(url))
    }

    fn rename_session(&self, session_id: &str, title: &str) -> Result<()> {
        let path = format!("sessions/{}", session_id);
        let body = RenameSessionRequest {
            title: title.to_string(),
        };
        let request = self.client.patch(self.endpoint(&path)?).json(&body);
        self.execute(&path, request).map(|_| ())
    }

    fn delete_session(&self, session_id: &str) -> Result<()> {
        let path = format!("sessions/{}", session_id);
        let request = self.client.delete(self.endpoint(&path)?);
        self.execute(&path, request).map(|_| ())
    }

    fn task_status(&self, task_id: &str) -> Result<TaskStatusResponse> {
        let path = format!("quick-action/status/{}", task_id);
        let request = self.client.get(self.endpoint(&path)?);
        self.json(&path, request)
    }
}

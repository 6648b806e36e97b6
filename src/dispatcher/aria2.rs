//! aria2 JSON-RPC dispatcher

use super::{DispatchRequest, Dispatcher, SubmitOutcome, TransferState};
use crate::error::{DispatchError, Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const NAME: &str = "aria2";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Dispatcher talking to an aria2 daemon started with `--enable-rpc`
///
/// Each release is added with `aria2.addUri` into `<save_path>/<subscription>/<episode>`
/// and polled with `aria2.tellStatus`.
pub struct Aria2Dispatcher {
    rpc_url: String,
    secret: Option<String>,
    save_path: PathBuf,
    http_client: reqwest::Client,
}

impl Aria2Dispatcher {
    /// Create a dispatcher for the daemon at `rpc_url`
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(rpc_url: String, secret: Option<String>, save_path: PathBuf) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            rpc_url,
            secret,
            save_path,
            http_client,
        })
    }

    /// Positional parameters, prefixed with `token:<secret>` when a secret is set
    fn params(&self, rest: Vec<Value>) -> Vec<Value> {
        let mut params = Vec::with_capacity(rest.len() + 1);
        if let Some(secret) = &self.secret {
            params.push(Value::String(format!("token:{}", secret)));
        }
        params.extend(rest);
        params
    }

    /// Perform one call; the inner result carries RPC-level errors
    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<std::result::Result<Value, RpcError>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "bangumi-sync",
            "method": method,
            "params": self.params(params),
        });

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::TimedOut {
                        dispatcher: NAME.to_string(),
                        after_secs: HTTP_TIMEOUT.as_secs(),
                    }
                } else {
                    DispatchError::Unreachable {
                        dispatcher: NAME.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        // aria2 answers RPC errors with a 4xx status and a JSON body, so the body is
        // parsed before the status is judged
        let status = response.status();
        let text = response.text().await.map_err(|e| DispatchError::Unreachable {
            dispatcher: NAME.to_string(),
            reason: e.to_string(),
        })?;

        let parsed: RpcResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(DispatchError::Unreachable {
                    dispatcher: NAME.to_string(),
                    reason: format!("HTTP {}", status.as_u16()),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        match (parsed.result, parsed.error) {
            (_, Some(error)) => Ok(Err(error)),
            (Some(result), None) => Ok(Ok(result)),
            (None, None) => Ok(Ok(Value::Null)),
        }
    }

    fn target_dir(&self, request: &DispatchRequest) -> PathBuf {
        self.save_path
            .join(&request.subscription)
            .join(request.episode.to_string())
    }
}

#[async_trait]
impl Dispatcher for Aria2Dispatcher {
    fn name(&self) -> &str {
        NAME
    }

    async fn submit(&self, requests: &[DispatchRequest]) -> Result<Vec<SubmitOutcome>> {
        let mut outcomes = Vec::with_capacity(requests.len());

        for request in requests {
            let dir = self.target_dir(request);
            let params = vec![
                json!([request.locator]),
                json!({ "dir": dir.to_string_lossy() }),
            ];

            let outcome = match self.call("aria2.addUri", params).await? {
                Ok(Value::String(gid)) => {
                    debug!(
                        entry_id = %request.entry_id,
                        gid = %gid,
                        dir = %dir.display(),
                        "aria2 accepted transfer"
                    );
                    SubmitOutcome::Accepted { handle: gid }
                }
                Ok(other) => SubmitOutcome::Rejected {
                    reason: format!("unexpected addUri result: {}", other),
                },
                Err(error) => {
                    warn!(
                        entry_id = %request.entry_id,
                        code = error.code,
                        error = %error.message,
                        "aria2 rejected transfer"
                    );
                    SubmitOutcome::Rejected {
                        reason: error.message,
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn poll(&self, handle: &str) -> Result<TransferState> {
        let params = vec![json!(handle), json!(["status", "errorMessage"])];

        let status = match self.call("aria2.tellStatus", params).await? {
            Ok(status) => status,
            Err(error) => {
                return Err(DispatchError::Rpc {
                    dispatcher: NAME.to_string(),
                    code: error.code,
                    message: error.message,
                }
                .into());
            }
        };

        let state = status.get("status").and_then(Value::as_str).unwrap_or("");
        Ok(match state {
            "complete" => TransferState::Complete,
            "error" => TransferState::Failed {
                reason: status
                    .get("errorMessage")
                    .and_then(Value::as_str)
                    .filter(|m| !m.is_empty())
                    .unwrap_or("aria2 reported an error")
                    .to_string(),
            },
            "removed" => TransferState::Failed {
                reason: "transfer removed from aria2".to_string(),
            },
            _ => TransferState::Active,
        })
    }
}

//! Chat-completion backend and the retry policy wrapped around it.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::{CancellationToken, HaltResult};
use crate::core::types::ChatMessage;
use crate::io::config::LlmConfig;

/// Response used in place of a completion once every attempt has failed.
///
/// It extracts to a code fence the build will reject, so the loop reports a
/// compile failure instead of aborting the session.
pub const FALLBACK_RESPONSE: &str = "```\n[ERROR] Failed to generate due to API error or quota.\n```";

/// Granularity of cancellation checks while backing off.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// One request/response round trip with a chat model.
pub trait ChatClient: Send {
    fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    top_p: f64,
    seed: u64,
    max_tokens: u32,
    n: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    temperature: f64,
    top_p: f64,
    seed: u64,
    max_tokens: u32,
}

impl OpenAiChatClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            warn!(env = %config.api_key_env, "no API key set, requests will be unauthenticated");
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            temperature: config.temperature,
            top_p: config.top_p,
            seed: config.seed,
            max_tokens: config.max_tokens,
        })
    }
}

impl ChatClient for OpenAiChatClient {
    #[instrument(skip_all, fields(model = %model, messages = messages.len()))]
    fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let body = CompletionRequest {
            model,
            messages,
            temperature: self.temperature,
            top_p: self.top_p,
            seed: self.seed,
            max_tokens: self.max_tokens,
            n: 1,
            stream: false,
        };
        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let started = Instant::now();
        let response = request.send().context("send completion request")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(anyhow!("completion request failed with status {status}: {text}"));
        }
        let payload: CompletionResponse = response.json().context("parse completion response")?;
        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("completion response had no content"))?;
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "completion received");
        Ok(content)
    }
}

/// How often, and how patiently, a completion is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_tries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_tries: config.max_tries.max(1),
            backoff: config.retry_backoff(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

/// Ask `client` for a completion, retrying failures.
///
/// The token is checked before every attempt, after every result and
/// throughout the backoff, so a stop request never waits out a retry.
/// After `max_tries` failures the [`FALLBACK_RESPONSE`] is returned.
pub fn complete_with_retry(
    client: &dyn ChatClient,
    model: &str,
    messages: &[ChatMessage],
    policy: &RetryPolicy,
    token: &CancellationToken,
) -> HaltResult<String> {
    let mut tries = 0u32;
    loop {
        token.checkpoint()?;
        tries += 1;
        match client.complete(model, messages) {
            Ok(response) => {
                token.checkpoint()?;
                return Ok(response);
            }
            Err(err) => {
                token.checkpoint()?;
                warn!(model, tries, err = %format!("{err:#}"), "completion attempt failed");
                if tries >= policy.max_tries {
                    warn!(model, "giving up on completion, using fallback response");
                    return Ok(FALLBACK_RESPONSE.to_string());
                }
                sleep_unless_cancelled(policy.backoff, token)?;
            }
        }
    }
}

fn sleep_unless_cancelled(duration: Duration, token: &CancellationToken) -> HaltResult<()> {
    let deadline = Instant::now() + duration;
    loop {
        token.checkpoint()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
        debug!("backoff tick");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times, then answers.
    struct FlakyClient {
        failures: u32,
        calls: AtomicU32,
        on_call: Mutex<Option<CancellationToken>>,
    }

    impl FlakyClient {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                on_call: Mutex::new(None),
            }
        }

        /// Trip `token` during the first call.
        fn cancelling(self, token: CancellationToken) -> Self {
            *self.on_call.lock().expect("lock") = Some(token);
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ChatClient for FlakyClient {
        fn complete(&self, _model: &str, _messages: &[ChatMessage]) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(token) = self.on_call.lock().expect("lock").as_ref() {
                token.set();
            }
            if n <= self.failures {
                Err(anyhow!("quota exceeded"))
            } else {
                Ok(format!("answer after {n}"))
            }
        }
    }

    fn fast_policy(max_tries: u32) -> RetryPolicy {
        RetryPolicy {
            max_tries,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn retries_until_success() {
        let client = FlakyClient::new(2);
        let token = CancellationToken::new();
        let response = complete_with_retry(&client, "m", &[], &fast_policy(3), &token)
            .expect("completion");
        assert_eq!(response, "answer after 3");
        assert_eq!(client.calls(), 3);
    }

    #[test]
    fn exhausted_retries_yield_fallback() {
        let client = FlakyClient::new(10);
        let token = CancellationToken::new();
        let response = complete_with_retry(&client, "m", &[], &fast_policy(3), &token)
            .expect("completion");
        assert_eq!(response, FALLBACK_RESPONSE);
        assert_eq!(client.calls(), 3);
    }

    #[test]
    fn cancelled_token_skips_the_call() {
        let client = FlakyClient::new(0);
        let token = CancellationToken::new();
        token.set();
        let result = complete_with_retry(&client, "m", &[], &fast_policy(3), &token);
        assert!(result.is_err_and(|halt| halt.is_cancelled()));
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn cancellation_during_call_discards_response() {
        let token = CancellationToken::new();
        let client = FlakyClient::new(0).cancelling(token.clone());
        let result = complete_with_retry(&client, "m", &[], &fast_policy(3), &token);
        assert!(result.is_err_and(|halt| halt.is_cancelled()));
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let client = FlakyClient::new(10).cancelling(token.clone());
        let policy = RetryPolicy {
            max_tries: 3,
            backoff: Duration::from_secs(30),
        };
        let started = Instant::now();
        let result = complete_with_retry(&client, "m", &[], &policy, &token);
        assert!(result.is_err_and(|halt| halt.is_cancelled()));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn policy_never_allows_zero_tries() {
        let config = LlmConfig {
            max_tries: 0,
            ..LlmConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_tries, 1);
    }
}

//! Chat-model-backed test generator.

use std::sync::{Arc, LazyLock};

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::agents::chat::{ChatClient, OpenAiChatClient, RetryPolicy, complete_with_retry};
use crate::agents::{AgentFactory, GenerationAgent};
use crate::core::cancel::{CancellationToken, HaltResult};
use crate::core::types::{ChatMessage, Generation, GenerationTask};
use crate::io::config::RefinerConfig;
use crate::io::prompt::PromptEngine;

static JAVA_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```java(.*)```").expect("java fence pattern should be valid"));
static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(.*)```").expect("fence pattern should be valid"));

const THINK_CLOSE: &str = "</think>";

/// Drop a reasoning model's `<think>...</think>` preamble, keeping the answer.
pub fn strip_thinking(response: &str) -> &str {
    match response.rfind(THINK_CLOSE) {
        Some(idx) => response[idx + THINK_CLOSE.len()..].trim(),
        None => response,
    }
}

/// Pull the test source out of a fenced response.
///
/// Prefers a ```` ```java ```` fence, then any fence. Both matches are greedy,
/// spanning from the first opening to the last closing fence. A response
/// with no fence yields a single space so the build fails visibly.
pub fn extract_code(response: &str) -> String {
    let captured = JAVA_FENCE
        .captures(response)
        .or_else(|| ANY_FENCE.captures(response))
        .and_then(|caps| caps.get(1));
    match captured {
        Some(code) => code.as_str().trim().to_string(),
        None => {
            warn!("response contains no code block");
            " ".to_string()
        }
    }
}

/// [`GenerationAgent`] that asks one chat model for tests.
pub struct TestGenAgent {
    model: String,
    client: Box<dyn ChatClient>,
    prompts: Arc<PromptEngine>,
    system_prompt: String,
    retry: RetryPolicy,
    token: CancellationToken,
}

impl TestGenAgent {
    pub fn new(
        model: impl Into<String>,
        client: Box<dyn ChatClient>,
        prompts: Arc<PromptEngine>,
        system_prompt: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model: model.into(),
            client,
            prompts,
            system_prompt: system_prompt.into(),
            retry,
            token: CancellationToken::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one prompt and return the visible exchange with the raw reply.
    ///
    /// The system prompt goes to the model but is not part of the exchange.
    fn ask(&self, prompt: String) -> HaltResult<(String, Vec<ChatMessage>)> {
        let request = [
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(prompt.as_str()),
        ];
        let raw = complete_with_retry(
            self.client.as_ref(),
            &self.model,
            &request,
            &self.retry,
            &self.token,
        )?;
        let exchange = vec![ChatMessage::user(prompt), ChatMessage::assistant(raw.as_str())];
        Ok((raw, exchange))
    }

    fn generation(&self, prompt: String) -> HaltResult<Generation> {
        let (response, exchange) = self.ask(prompt.clone())?;
        let artifact = extract_code(strip_thinking(&response));
        debug!(model = %self.model, artifact_len = artifact.len(), "extracted candidate");
        Ok(Generation {
            artifact,
            prompt,
            response,
            exchange,
        })
    }
}

impl GenerationAgent for TestGenAgent {
    fn set_cancel_check(&mut self, token: CancellationToken) {
        self.token = token;
    }

    fn generate(&mut self, task: &GenerationTask) -> HaltResult<Generation> {
        info!(model = %self.model, test_class = %task.test_class, "generating test");
        let prompt = self.prompts.render_generate(task)?;
        self.generation(prompt)
    }

    fn refine(
        &mut self,
        artifact: &str,
        diagnostics: &str,
        task: &GenerationTask,
    ) -> HaltResult<Generation> {
        info!(model = %self.model, test_class = %task.test_class, "refining test");
        let prompt = self.prompts.render_refine(artifact, diagnostics, task)?;
        self.generation(prompt)
    }

    fn finish(&mut self) -> HaltResult<Vec<ChatMessage>> {
        let prompt = self.prompts.render_finish()?;
        let (_, exchange) = self.ask(prompt)?;
        Ok(exchange)
    }
}

/// Builds [`TestGenAgent`]s talking to the configured endpoint.
pub struct ChatAgentFactory {
    config: RefinerConfig,
    prompts: Arc<PromptEngine>,
    system_prompt: String,
}

impl ChatAgentFactory {
    pub fn new(config: RefinerConfig) -> Result<Self> {
        let prompts = Arc::new(PromptEngine::new());
        let system_prompt = prompts.render_system(&config.project)?;
        Ok(Self {
            config,
            prompts,
            system_prompt,
        })
    }
}

impl AgentFactory for ChatAgentFactory {
    fn agent_for(&self, model: &str) -> Result<Box<dyn GenerationAgent>> {
        let client = OpenAiChatClient::from_config(&self.config.llm)?;
        Ok(Box::new(TestGenAgent::new(
            model,
            Box::new(client),
            self.prompts.clone(),
            self.system_prompt.clone(),
            RetryPolicy::from_config(&self.config.llm),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replies with canned responses and records every request.
    struct CannedClient {
        replies: Mutex<Vec<String>>,
        seen: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    }

    impl ChatClient for CannedClient {
        fn complete(&self, _model: &str, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().expect("lock").push(messages.to_vec());
            let mut replies = self.replies.lock().expect("lock");
            Ok(if replies.is_empty() {
                String::new()
            } else {
                replies.remove(0)
            })
        }
    }

    fn agent(replies: &[&str]) -> (TestGenAgent, Arc<Mutex<Vec<Vec<ChatMessage>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = CannedClient {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            seen: seen.clone(),
        };
        let agent = TestGenAgent::new(
            "gpt-4o",
            Box::new(client),
            Arc::new(PromptEngine::new()),
            "stay generic",
            RetryPolicy {
                max_tries: 1,
                backoff: Duration::ZERO,
            },
        );
        (agent, seen)
    }

    fn task() -> GenerationTask {
        GenerationTask {
            focal_method: "int add(int a, int b)".to_string(),
            focal_context: "class Calc {}".to_string(),
            test_class: "CalcTest".to_string(),
            test_desc: "adds".to_string(),
            referable_test: None,
            facts: Vec::new(),
            junit_version: 4,
        }
    }

    #[test]
    fn extract_prefers_java_fence() {
        let response = "intro\n```\nnot this\n```\n```java\nclass A {}\n```";
        // Greedy matching spans to the final fence.
        assert_eq!(extract_code(response), "class A {}");
    }

    #[test]
    fn extract_falls_back_to_plain_fence() {
        assert_eq!(
            extract_code("```package demo;\nclass ATest {}\n```"),
            "package demo;\nclass ATest {}"
        );
    }

    #[test]
    fn extract_without_fence_is_single_space() {
        assert_eq!(extract_code("I cannot help with that."), " ");
    }

    #[test]
    fn strip_thinking_keeps_text_after_last_marker() {
        assert_eq!(
            strip_thinking("<think>a</think>x<think>b</think>\n answer "),
            "answer"
        );
        assert_eq!(strip_thinking("plain"), "plain");
    }

    #[test]
    fn generate_sends_system_prompt_but_exchange_omits_it() {
        let (mut agent, seen) = agent(&["```java\nclass CalcTest {}\n```"]);
        let generation = agent.generate(&task()).expect("generate");

        assert_eq!(generation.artifact, "class CalcTest {}");
        assert_eq!(generation.exchange.len(), 2);
        assert_eq!(generation.exchange[0].role, Role::User);
        assert_eq!(generation.exchange[0].content, generation.prompt);
        assert_eq!(generation.exchange[1].content, generation.response);

        let requests = seen.lock().expect("lock");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0], ChatMessage::system("stay generic"));
    }

    #[test]
    fn refine_prompt_embeds_previous_artifact() {
        let (mut agent, _) = agent(&["```\nclass Fixed {}\n```"]);
        let generation = agent
            .refine("class Broken {}", "[ERROR] boom", &task())
            .expect("refine");
        assert!(generation.prompt.contains("class Broken {}"));
        assert!(generation.prompt.contains("[ERROR] boom"));
        assert_eq!(generation.artifact, "class Fixed {}");
    }

    #[test]
    fn finish_returns_prompt_and_reply() {
        let (mut agent, _) = agent(&["FINISH GENERATION"]);
        let exchange = agent.finish().expect("finish");
        assert_eq!(exchange.len(), 2);
        assert_eq!(exchange[1], ChatMessage::assistant("FINISH GENERATION"));
    }

    #[test]
    fn cancelled_agent_makes_no_request() {
        let (mut agent, seen) = agent(&["unused"]);
        let token = CancellationToken::new();
        token.set();
        agent.set_cancel_check(token);
        let result = agent.generate(&task());
        assert!(result.is_err_and(|halt| halt.is_cancelled()));
        assert!(seen.lock().expect("lock").is_empty());
    }
}

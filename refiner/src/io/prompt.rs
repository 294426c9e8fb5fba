//! Prompt rendering for test generation and repair.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::GenerationTask;
use crate::io::config::ProjectConfig;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");
const REFINE_TEMPLATE: &str = include_str!("prompts/refine.md");
const FINISH_TEMPLATE: &str = include_str!("prompts/finish.md");

/// Task fields exposed to the templates.
#[derive(Debug, Serialize)]
struct TaskContext<'a> {
    focal_method: &'a str,
    focal_context: &'a str,
    test_class: &'a str,
    test_desc: &'a str,
    referable_test: Option<&'a str>,
    facts: &'a [String],
    junit_version: u32,
}

impl<'a> TaskContext<'a> {
    fn from_task(task: &'a GenerationTask) -> Self {
        Self {
            focal_method: task.focal_method.trim(),
            focal_context: task.focal_context.trim(),
            test_class: &task.test_class,
            test_desc: task.test_desc.trim(),
            referable_test: task
                .referable_test
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty()),
            facts: &task.facts,
            junit_version: task.junit_version,
        }
    }
}

#[derive(Debug, Serialize)]
struct RefineContext<'a> {
    artifact: &'a str,
    diagnostics: &'a str,
    #[serde(flatten)]
    task: TaskContext<'a>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("generate", GENERATE_TEMPLATE)
            .expect("generate template should be valid");
        env.add_template("refine", REFINE_TEMPLATE)
            .expect("refine template should be valid");
        env.add_template("finish", FINISH_TEMPLATE)
            .expect("finish template should be valid");
        Self { env }
    }

    /// System message asking the model not to lean on memorized project code.
    pub fn render_system(&self, project: &ProjectConfig) -> Result<String> {
        let template = self.env.get_template("system")?;
        Ok(template.render(context! {
            project_name => project.name.as_deref().filter(|s| !s.trim().is_empty()),
            project_url => project.url.as_deref().filter(|s| !s.trim().is_empty()),
        })?)
    }

    pub fn render_generate(&self, task: &GenerationTask) -> Result<String> {
        let template = self.env.get_template("generate")?;
        Ok(template.render(TaskContext::from_task(task))?)
    }

    pub fn render_refine(
        &self,
        artifact: &str,
        diagnostics: &str,
        task: &GenerationTask,
    ) -> Result<String> {
        let template = self.env.get_template("refine")?;
        Ok(template.render(RefineContext {
            artifact: artifact.trim(),
            diagnostics: diagnostics.trim(),
            task: TaskContext::from_task(task),
        })?)
    }

    pub fn render_finish(&self) -> Result<String> {
        let template = self.env.get_template("finish")?;
        Ok(template.render(context! {})?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> GenerationTask {
        GenerationTask {
            focal_method: "public int add(int a, int b) {\n  return a + b;\n}".to_string(),
            focal_context: "public class Calc { ... }".to_string(),
            test_class: "CalcTest".to_string(),
            test_desc: "# Objective\nAdds two numbers.".to_string(),
            referable_test: None,
            facts: Vec::new(),
            junit_version: 5,
        }
    }

    #[test]
    fn generate_prompt_names_class_and_version() {
        let prompt = PromptEngine::new().render_generate(&task()).expect("render");
        assert!(prompt.contains("A JUnit 5 test class named CalcTest"));
        assert!(prompt.contains("return a + b;"));
        assert!(!prompt.contains("# Referable Test Case"));
        assert!(!prompt.contains("# Relevant Project Information"));
    }

    #[test]
    fn generate_prompt_includes_reference_and_numbered_facts() {
        let mut task = task();
        task.referable_test = Some("class OtherTest {}".to_string());
        task.facts = vec!["Calc is immutable".to_string(), "add never throws".to_string()];
        let prompt = PromptEngine::new().render_generate(&task).expect("render");
        assert!(prompt.contains("# Referable Test Case\n```\nclass OtherTest {}\n```"));
        assert!(prompt.contains("## Fact 1:\nCalc is immutable"));
        assert!(prompt.contains("## Fact 2:\nadd never throws"));
        assert!(prompt.contains("using #Referable Test Case# as a guide"));
    }

    #[test]
    fn refine_prompt_carries_artifact_and_diagnostics() {
        let prompt = PromptEngine::new()
            .render_refine(
                "class CalcTest {}",
                "[ERROR] cannot find symbol",
                &task(),
            )
            .expect("render");
        assert!(prompt.contains("# Generated Target Test Case\n```\nclass CalcTest {}\n```"));
        assert!(prompt.contains("[ERROR] cannot find symbol"));
        assert!(prompt.contains("# Target Test Case Description"));
    }

    #[test]
    fn system_prompt_mentions_project_when_configured() {
        let engine = PromptEngine::new();
        let project = ProjectConfig {
            name: Some("spark".to_string()),
            url: Some("https://example.com/spark".to_string()),
        };
        let named = engine.render_system(&project).expect("render");
        assert!(named.contains("'spark' (https://example.com/spark)"));

        let generic = engine
            .render_system(&ProjectConfig::default())
            .expect("render");
        assert!(!generic.contains('\''));
    }

    #[test]
    fn finish_prompt_asks_for_marker() {
        let prompt = PromptEngine::new().render_finish().expect("render");
        assert!(prompt.contains("FINISH GENERATION"));
    }
}

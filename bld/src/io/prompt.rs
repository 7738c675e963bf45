//! Instruction rendering for the repair agent.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::label::build_file_for;

const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

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
        env.add_template("repair", REPAIR_TEMPLATE)
            .expect("repair template should be valid");
        Self { env }
    }

    /// Instruction asking the agent for the minimal change set that builds `target`.
    pub fn render_repair(&self, target: &str) -> Result<String> {
        let build_file = build_file_for(target).map(|path| path.display().to_string());
        let template = self.env.get_template("repair")?;
        let rendered = template.render(context! {
            target => target,
            build_file => build_file,
        })?;
        Ok(rendered.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_instruction_names_target_and_build_file() {
        let text = PromptEngine::new()
            .render_repair("//crates/cli:grep_cli")
            .expect("render");
        assert!(text.starts_with(
            "Please make the minimal Bazel file changes necessary to build //crates/cli:grep_cli."
        ));
        assert!(text.contains("crates/cli/BUILD.bazel"));
        assert!(text.ends_with("Do not touch non-Bazel files."));
    }

    #[test]
    fn repair_instruction_without_package() {
        let text = PromptEngine::new().render_repair("ripgrep").expect("render");
        assert!(!text.contains("build file is"));
    }
}

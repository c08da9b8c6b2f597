//! Chat-template references derived from the served model path.
//!
//! Only the template *name* is resolved here; rendering belongs to the caller.

use serde::Serialize;

pub const DEFAULT_CHAT_TEMPLATE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Public struct `ChatTemplate` used across srt client components.
pub struct ChatTemplate {
    pub name: String,
}

impl ChatTemplate {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

struct TemplateRule {
    all_of: &'static [&'static str],
    template: &'static str,
}

// Ordered: the first rule whose fragments all occur in the lowercased path wins.
const TEMPLATE_RULES: &[TemplateRule] = &[
    TemplateRule {
        all_of: &["llama-3", "instruct"],
        template: "llama-3-instruct",
    },
    TemplateRule {
        all_of: &["llama-2", "chat"],
        template: "llama-2-chat",
    },
    TemplateRule {
        all_of: &["mistral", "instruct"],
        template: "mistral",
    },
    TemplateRule {
        all_of: &["mixtral", "instruct"],
        template: "mistral",
    },
    TemplateRule {
        all_of: &["gemma", "-it"],
        template: "gemma-it",
    },
    TemplateRule {
        all_of: &["qwen"],
        template: "chatml",
    },
    TemplateRule {
        all_of: &["tinyllama"],
        template: "chatml",
    },
    TemplateRule {
        all_of: &["vicuna"],
        template: "vicuna_v1.1",
    },
    TemplateRule {
        all_of: &["llava-v1.5"],
        template: "vicuna_v1.1",
    },
    TemplateRule {
        all_of: &["yi-1.5", "chat"],
        template: "yi-1.5",
    },
    TemplateRule {
        all_of: &["deepseek", "chat"],
        template: "deepseek-v2",
    },
];

pub fn resolve_chat_template(model_path: &str) -> ChatTemplate {
    let normalized = model_path.trim().to_ascii_lowercase();
    let name = TEMPLATE_RULES
        .iter()
        .find(|rule| {
            rule.all_of
                .iter()
                .all(|fragment| normalized.contains(fragment))
        })
        .map(|rule| rule.template)
        .unwrap_or(DEFAULT_CHAT_TEMPLATE);
    ChatTemplate::named(name)
}

#[cfg(test)]
mod tests {
    use super::{resolve_chat_template, DEFAULT_CHAT_TEMPLATE};

    #[test]
    fn resolves_known_model_families() {
        assert_eq!(
            resolve_chat_template("meta-llama/Meta-Llama-3.1-8B-Instruct").name,
            "llama-3-instruct"
        );
        assert_eq!(
            resolve_chat_template("/models/Qwen2-7B-Instruct").name,
            "chatml"
        );
        assert_eq!(
            resolve_chat_template("lmsys/vicuna-7b-v1.5").name,
            "vicuna_v1.1"
        );
    }

    #[test]
    fn falls_back_to_default_template() {
        assert_eq!(
            resolve_chat_template("my-org/custom-model").name,
            DEFAULT_CHAT_TEMPLATE
        );
    }
}

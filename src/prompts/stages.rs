//! Built-in prompts for the synthesis and final-answer stages.
//!
//! Agent prompts are loaded from disk; these two are fixed parts of the
//! pipeline and are parsed on demand with [`PromptTemplate::parse`].

use super::template::PromptTemplate;
use crate::error::TemplateError;

/// Name under which the evaluator prompt is reported in errors.
pub const EVALUATOR_TEMPLATE_NAME: &str = "builtin:evaluator";

/// Name under which the final-answer prompt is reported in errors.
pub const FINAL_TEMPLATE_NAME: &str = "builtin:final";

/// Prompt asking for a synthesis of the best insights across agent responses.
pub const EVALUATOR_PROMPT: &str = r#"Review these responses and extract the best insights:
{responses}

Provide a synthesis of the best insights that can be used for further analysis.
"#;

/// Prompt asking for the final answer derived from distilled insights.
pub const FINAL_PROMPT: &str = r#"Using these key insights:
{insights}

Provide a comprehensive final answer to the original question.
"#;

/// Returns the parsed evaluator template.
pub fn evaluator_template() -> Result<PromptTemplate, TemplateError> {
    PromptTemplate::parse(EVALUATOR_TEMPLATE_NAME, EVALUATOR_PROMPT)
}

/// Returns the parsed final-answer template.
pub fn final_template() -> Result<PromptTemplate, TemplateError> {
    PromptTemplate::parse(FINAL_TEMPLATE_NAME, FINAL_PROMPT)
}

/// Builds the review document fed to the evaluator: one labeled entry per
/// response, separated by blank lines, in the order given.
pub fn format_responses(responses: &[(String, usize)]) -> String {
    responses
        .iter()
        .map(|(text, index)| format!("Response {}:\n{}", index, text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates_parse() {
        assert_eq!(evaluator_template().unwrap().variables(), vec!["responses"]);
        assert_eq!(final_template().unwrap().variables(), vec!["insights"]);
    }

    #[test]
    fn test_format_responses_labels_by_index() {
        let doc = format_responses(&[("A".to_string(), 1), ("B".to_string(), 2)]);
        assert_eq!(doc, "Response 1:\nA\n\nResponse 2:\nB");
    }

    #[test]
    fn test_format_responses_empty() {
        assert_eq!(format_responses(&[]), "");
    }
}

//! Prompt assembly for context-grounded answers.

pub const NO_CONTEXT_PREFIX: &str = "No relevant context found.";

const CONTEXT_SEPARATOR: &str = "\n\n";

const GROUNDING_RULES: &str = "This is very important:
Please answer the question based on the provided context.
If the context doesn't contain enough information, please say so.
If the question has nothing to do with the context, don't answer the question, just say you don't have any information about the subject.
At the end of your answer, provide up to three relevant follow up questions the user might ask about the provided context.";

/// Question passed through untouched when retrieval is switched off.
pub fn plain_prompt(question: &str) -> String {
    question.to_string()
}

pub fn grounded_prompt(question: &str, context: &[String]) -> String {
    if context.is_empty() {
        return format!("{NO_CONTEXT_PREFIX} Question: {question}");
    }

    let joined = context.join(CONTEXT_SEPARATOR);
    format!("Context from documents:\n{joined}\n\nQuestion: {question}\n\n{GROUNDING_RULES}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_is_framed_as_missing() {
        let prompt = grounded_prompt("What is the torque?", &[]);
        assert!(prompt.starts_with("No relevant context found."));
        assert!(prompt.ends_with("What is the torque?"));
    }

    #[test]
    fn context_and_rules_surround_the_question() {
        let context = vec!["first passage".to_string(), "second passage".to_string()];
        let prompt = grounded_prompt("Why?", &context);

        assert!(prompt.contains("first passage\n\nsecond passage"));
        assert!(prompt.contains("Question: Why?"));
        assert!(prompt.contains("based on the provided context"));
        assert!(prompt.contains("doesn't contain enough information"));
        assert!(prompt.contains("nothing to do with the context"));
        assert!(prompt.contains("up to three relevant follow up questions"));
    }

    #[test]
    fn plain_prompt_is_verbatim() {
        assert_eq!(plain_prompt("  raw question "), "  raw question ");
    }
}

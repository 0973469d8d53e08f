//! test_regex: checks that a pattern's first match equals an expected answer.

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{str_arg, Tool};

pub const FOUND: &str = "Regex pattern found in text";
pub const NOT_FOUND: &str = "Regex pattern not found in text";

pub struct TestRegexTool;

/// Search `text` for the first match of `pattern` and compare it to `answer`.
pub fn first_match_equals(pattern: &str, text: &str, answer: &str) -> anyhow::Result<bool> {
    let re = Regex::new(pattern).with_context(|| format!("invalid regex pattern '{pattern}'"))?;
    Ok(re.find(text).is_some_and(|m| m.as_str() == answer))
}

#[async_trait]
impl Tool for TestRegexTool {
    fn name(&self) -> &str {
        "test_regex"
    }

    fn description(&self) -> &str {
        "Test a regex pattern against some text and check whether the first match equals the expected answer."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "regex_pattern": {
                    "type": "string",
                    "description": "The regular expression to search with"
                },
                "text_to_search": {
                    "type": "string",
                    "description": "The text to search in"
                },
                "answer_text": {
                    "type": "string",
                    "description": "The text the first match is expected to equal"
                }
            },
            "required": ["regex_pattern", "text_to_search", "answer_text"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let pattern = str_arg(&args, "regex_pattern")?;
        let text = str_arg(&args, "text_to_search")?;
        let answer = str_arg(&args, "answer_text")?;

        let verdict = if first_match_equals(pattern, text, answer)? {
            FOUND
        } else {
            NOT_FOUND
        };
        Ok(verdict.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pattern: &str, text: &str, answer: &str) -> HashMap<String, Value> {
        HashMap::from([
            ("regex_pattern".to_string(), json!(pattern)),
            ("text_to_search".to_string(), json!(text)),
            ("answer_text".to_string(), json!(answer)),
        ])
    }

    #[tokio::test]
    async fn test_first_match_must_equal_answer() {
        let out = TestRegexTool
            .execute(args(r"\d{3}-\d{4}", "call 555-1234 now", "555-1234"))
            .await
            .unwrap();
        assert_eq!(out, FOUND);

        // Only the first match counts.
        let out = TestRegexTool
            .execute(args(r"\d+", "7 and 42", "42"))
            .await
            .unwrap();
        assert_eq!(out, NOT_FOUND);
    }

    #[tokio::test]
    async fn test_no_match() {
        let out = TestRegexTool
            .execute(args("xyz", "abc", "xyz"))
            .await
            .unwrap();
        assert_eq!(out, NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_an_error() {
        let err = TestRegexTool
            .execute(args("(unclosed", "abc", "a"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid regex"));
    }
}

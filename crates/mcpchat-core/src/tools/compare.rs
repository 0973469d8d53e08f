//! compare_documents: checks a document against a trusted reference.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::summarize::ask_for_summary;
use super::{str_arg, Tool};
use crate::config::SummarizerConfig;
use crate::provider::LlmProvider;

const COMPARE_PROMPT: &str = "You are a helpful assistant that compares documents. You identify \
differences in the numerical values the user provides while comparing it to a 'truth' document. \
You also note minor variations, knowing that the documents are overall the same. \
Return the feedback in <summary></summary> tags.";

pub struct CompareDocumentsTool {
    provider: Arc<dyn LlmProvider>,
    model: String,
    config: SummarizerConfig,
}

impl CompareDocumentsTool {
    pub fn new(provider: Arc<dyn LlmProvider>, model: &str, config: SummarizerConfig) -> Self {
        Self {
            provider,
            model: model.to_string(),
            config,
        }
    }
}

#[async_trait]
impl Tool for CompareDocumentsTool {
    fn name(&self) -> &str {
        "compare_documents"
    }

    fn description(&self) -> &str {
        "Compare a document against a verified 'truth' document and report the differences, \
         focusing on numerical values."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_content": {
                    "type": "string",
                    "description": "The content of the document to analyze"
                },
                "truthdoc_content": {
                    "type": "string",
                    "description": "The verified document that document_content is compared to"
                }
            },
            "required": ["document_content", "truthdoc_content"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let document = str_arg(&args, "document_content")?;
        let truth = str_arg(&args, "truthdoc_content")?;

        let prompt = format!(
            "{COMPARE_PROMPT}\n\nDocument content: {document}\n\nTruthdoc content: {truth}"
        );
        ask_for_summary(self.provider.as_ref(), &self.model, &self.config, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;

    #[tokio::test]
    async fn test_compare_sends_both_documents() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(ScriptedProvider::text(
            "<summary>Total differs: 410 vs 401.</summary>",
        ))]));
        let tool = CompareDocumentsTool::new(provider.clone(), "m", SummarizerConfig::default());

        let mut args = HashMap::new();
        args.insert("document_content".into(), json!("total 410"));
        args.insert("truthdoc_content".into(), json!("total 401"));
        let out = tool.execute(args).await.unwrap();
        assert_eq!(out, "Total differs: 410 vs 401.");

        let seen = provider.seen.lock().unwrap();
        let prompt = seen[0][0].content_as_str().unwrap();
        assert!(prompt.contains("Document content: total 410"));
        assert!(prompt.contains("Truthdoc content: total 401"));
    }

    #[tokio::test]
    async fn test_missing_truth_document() {
        let tool = CompareDocumentsTool::new(
            Arc::new(ScriptedProvider::default()),
            "m",
            SummarizerConfig::default(),
        );
        let mut args = HashMap::new();
        args.insert("document_content".into(), json!("a"));
        let err = tool.execute(args).await.unwrap_err();
        assert!(err.to_string().contains("truthdoc_content"));
    }
}

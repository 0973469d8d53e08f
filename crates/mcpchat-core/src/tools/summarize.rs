//! summarize_document: asks the model for a tagged summary.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{extract_tagged, str_arg, Tool};
use crate::config::SummarizerConfig;
use crate::provider::types::ChatMessage;
use crate::provider::LlmProvider;

const SUMMARY_PROMPT: &str = "You are a helpful assistant that summarizes documents. \
You provide a thorough summary of the document and highlight anything surprising or \
interesting. Return the summary in <summary></summary> tags.";

pub struct SummarizeDocumentTool {
    provider: Arc<dyn LlmProvider>,
    model: String,
    config: SummarizerConfig,
}

impl SummarizeDocumentTool {
    pub fn new(provider: Arc<dyn LlmProvider>, model: &str, config: SummarizerConfig) -> Self {
        Self {
            provider,
            model: model.to_string(),
            config,
        }
    }
}

/// Send a single user prompt and return the `<summary>` section of the reply.
pub(crate) async fn ask_for_summary(
    provider: &dyn LlmProvider,
    model: &str,
    config: &SummarizerConfig,
    prompt: String,
) -> anyhow::Result<String> {
    let messages = [ChatMessage::user(&prompt)];
    let response = provider
        .chat(
            &messages,
            &[],
            Some(model),
            config.max_tokens,
            config.temperature,
        )
        .await
        .context("model call failed")?;

    let reply = response.text();
    if reply.is_empty() {
        anyhow::bail!("model returned an empty reply");
    }
    debug!(chars = reply.len(), "Received summary reply");
    Ok(extract_tagged(reply, "summary").to_string())
}

#[async_trait]
impl Tool for SummarizeDocumentTool {
    fn name(&self) -> &str {
        "summarize_document"
    }

    fn description(&self) -> &str {
        "Analyze and summarize document content, highlighting anything surprising or interesting."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_content": {
                    "type": "string",
                    "description": "The content of the document to analyze"
                }
            },
            "required": ["document_content"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let document = str_arg(&args, "document_content")?;
        if document.trim().is_empty() {
            anyhow::bail!("document_content is empty");
        }

        let prompt = format!("{SUMMARY_PROMPT}\n\nDocument content: {document}");
        ask_for_summary(self.provider.as_ref(), &self.model, &self.config, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;

    #[tokio::test]
    async fn test_summary_is_extracted_from_tags() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(ScriptedProvider::text(
            "Sure.\n<summary>Revenue grew 12%.</summary>\nAnything else?",
        ))]));
        let tool = SummarizeDocumentTool::new(provider.clone(), "m", SummarizerConfig::default());

        let mut args = HashMap::new();
        args.insert("document_content".into(), json!("Q3 report ..."));
        let out = tool.execute(args).await.unwrap();
        assert_eq!(out, "Revenue grew 12%.");

        let seen = provider.seen.lock().unwrap();
        let prompt = seen[0][0].content_as_str().unwrap();
        assert!(prompt.contains("<summary></summary>"));
        assert!(prompt.ends_with("Document content: Q3 report ..."));
    }

    #[tokio::test]
    async fn test_empty_document_is_rejected() {
        let tool = SummarizeDocumentTool::new(
            Arc::new(ScriptedProvider::default()),
            "m",
            SummarizerConfig::default(),
        );
        let mut args = HashMap::new();
        args.insert("document_content".into(), json!("  "));
        assert!(tool.execute(args).await.is_err());
    }
}

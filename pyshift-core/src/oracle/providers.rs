// Oracle provider backed by an Anthropic-compatible messages API.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OracleSection;
use crate::error::OracleError;
use crate::types::BreakingChange;

use super::{ExtractionOracle, RewriteOracle, RewriteRequest, SourceDocument, TokenUsage};

/// HTTP oracle speaking the Anthropic messages protocol. Implements both
/// the extraction and rewrite roles; the two differ only in prompt and
/// response handling.
#[derive(Debug)]
pub struct AnthropicOracle {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout_secs: u64,
}

impl AnthropicOracle {
    /// Build from the oracle config section; `None` when no API key is
    /// present in the configured environment variable.
    pub fn from_config(config: &OracleSection) -> Option<Self> {
        let api_key = std::env::var(&config.api_key_env).ok()?;
        Some(Self {
            client: Client::new(),
            api_key,
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn new(api_key: String, model: String, base_url: String, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url,
            timeout_secs,
        }
    }

    async fn call(&self, prompt: &str, max_tokens: u32) -> Result<(String, TokenUsage), OracleError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            temperature: 0.0,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        debug!(model = %self.model, "calling oracle");

        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let resp = tokio::time::timeout(std::time::Duration::from_secs(self.timeout_secs), request)
            .await
            .map_err(|_| OracleError::Timeout(self.timeout_secs))?
            .map_err(|e| OracleError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(OracleError::Api { status, body });
        }

        let result: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;

        let text = result
            .content
            .first()
            .map(|c| c.text.clone())
            .unwrap_or_default();

        Ok((
            text,
            TokenUsage {
                input_tokens: result.usage.input_tokens,
                output_tokens: result.usage.output_tokens,
            },
        ))
    }
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait::async_trait]
impl ExtractionOracle for AnthropicOracle {
    async fn extract(
        &self,
        library: &str,
        from_version: &str,
        to_version: &str,
        document: &SourceDocument,
    ) -> Result<Vec<BreakingChange>, OracleError> {
        let prompt = extraction_prompt(library, from_version, to_version, document);
        let (text, _usage) = self.call(&prompt, 4096).await?;
        let mut changes = parse_extraction_response(&text)?;
        for change in &mut changes {
            if change.provenance.is_none() {
                change.provenance = Some(crate::types::Provenance {
                    url: document.url.clone(),
                    excerpt: String::new(),
                });
            }
        }
        Ok(changes)
    }
}

#[async_trait::async_trait]
impl RewriteOracle for AnthropicOracle {
    async fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<String, OracleError> {
        let prompt = rewrite_prompt(request);
        let (text, _usage) = self.call(&prompt, 4096).await?;
        Ok(strip_code_fences(&text).to_string())
    }
}

fn extraction_prompt(
    library: &str,
    from_version: &str,
    to_version: &str,
    document: &SourceDocument,
) -> String {
    format!(
        "You analyse Python library release notes and list breaking API changes.\n\
         Library: {library}\nUpgrade: {from_version} -> {to_version}\n\n\
         Return ONLY a JSON array. Each element:\n\
         {{\"id\": str, \"kind\": one of [\"symbol-rename\",\"attribute-rename\",\"method-rename\",\
         \"function-signature\",\"decorator-shape\",\"class-config-restructure\",\"import-move\",\
         \"argument-rename\",\"argument-removed\",\"behavior-change\"],\n\
         \"match\": {{\"symbol\": str, \"receiver\": str|null, \"argument\": str|null}},\n\
         \"replacement\": str, \"confidence\": \"high\"|\"medium\"|\"low\",\n\
         \"requires_imports\": [{{\"module\": str, \"names\": [str]}}], \"removes_imports\": [str],\n\
         \"explanation\": str}}\n\n\
         Document ({url}):\n{content}",
        url = document.url,
        content = document.content,
    )
}

fn rewrite_prompt(request: &RewriteRequest<'_>) -> String {
    let guidance = match request.breaking_change {
        Some(change) => format!(
            "Apply exactly this documented change:\n{}\n",
            serde_json::to_string_pretty(change).unwrap_or_default()
        ),
        None => "Update every use of the library's removed or renamed APIs.\n".to_string(),
    };
    format!(
        "You migrate Python code across a breaking library upgrade.\n\
         Library: {} ({} -> {})\n{guidance}\
         Rewrite the code below accordingly. Keep formatting and comments;\n\
         change nothing unrelated. Return ONLY the rewritten code, no prose.\n\n{}",
        request.library, request.from_version, request.to_version, request.slice,
    )
}

/// Oracle responses sometimes arrive wrapped in a markdown fence.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("python").unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    rest.strip_suffix("```").map_or(rest, str::trim_end)
}

fn parse_extraction_response(text: &str) -> Result<Vec<BreakingChange>, OracleError> {
    // Tolerate prose around the array by slicing to the outermost brackets.
    let trimmed = text.trim();
    let json = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err(OracleError::Parse("no JSON array in response".into())),
    };
    serde_json::from_str(json).map_err(|e| OracleError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_plain_and_language_fences() {
        assert_eq!(strip_code_fences("x = 1\n"), "x = 1");
        assert_eq!(strip_code_fences("```python\nx = 1\n```"), "x = 1\n");
        assert_eq!(strip_code_fences("```\nx = 1\n```"), "x = 1\n");
    }

    #[test]
    fn parses_extraction_array_with_surrounding_prose() {
        let text = r#"Here are the changes:
[{"id": "c1", "kind": "method-rename",
  "match": {"symbol": "dict"}, "replacement": "model_dump",
  "confidence": "high", "explanation": ""}]
Done."#;
        let changes = parse_extraction_response(text).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].matcher.symbol, "dict");
    }

    #[test]
    fn rejects_response_without_array() {
        assert!(parse_extraction_response("I cannot help with that.").is_err());
    }

    #[test]
    fn rewrite_prompt_includes_spec_entry() {
        let change = BreakingChange {
            id: "c1".into(),
            kind: crate::types::ChangeKind::FunctionSignature,
            matcher: crate::types::MatchSpec {
                symbol: "run".into(),
                receiver: None,
                argument: None,
            },
            replacement: String::new(),
            confidence: crate::types::Confidence::Medium,
            requires_imports: vec![],
            removes_imports: vec![],
            explanation: "run() now takes keyword-only args".into(),
            provenance: None,
        };
        let request = RewriteRequest {
            library: "celery",
            from_version: "4.0",
            to_version: "5.0",
            breaking_change: Some(&change),
            slice: "app.run(1, 2)",
        };
        let prompt = rewrite_prompt(&request);
        assert!(prompt.contains("keyword-only"));
        assert!(prompt.contains("app.run(1, 2)"));
    }
}

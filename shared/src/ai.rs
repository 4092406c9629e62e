//! Document analysis backed by a text-generation model on Bedrock.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::Client as BedrockClient;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::AiConfig;
use crate::documents::DocumentRow;
use crate::{Error, Result};

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const TRUNCATION_MARKER: &str = "\n\n[Document truncated]";
const MALFORMED_REPLY: &str = "AI provider returned a malformed response";

/// One prompt for the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
}

/// Anything that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    anthropic_version: &'static str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesReply {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API over `InvokeModel`.
pub struct BedrockGenerator {
    client: BedrockClient,
    config: AiConfig,
}

impl BedrockGenerator {
    pub fn new(client: BedrockClient, config: AiConfig) -> Self {
        Self { client, config }
    }

    fn request_body(&self, request: &GenerationRequest) -> Result<Vec<u8>> {
        let body = MessagesBody {
            anthropic_version: ANTHROPIC_VERSION,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            system: request.system.as_deref(),
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };
        Ok(serde_json::to_vec(&body)?)
    }
}

/// Concatenate the text blocks of a Messages reply.
fn reply_text(raw: &[u8]) -> Result<String> {
    let reply: MessagesReply =
        serde_json::from_slice(raw).map_err(|_| Error::ExternalService(MALFORMED_REPLY.to_string()))?;

    let text: String = reply
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(Error::ExternalService(
            "AI provider returned an empty response".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for BedrockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = self.request_body(request)?;

        let response = self
            .client
            .invoke_model()
            .model_id(&self.config.model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(|e| {
                error!(model_id = %self.config.model_id, error = %e, "Bedrock invocation failed");
                Error::ExternalService("AI provider request failed".to_string())
            })?;

        reply_text(response.body().as_ref())
    }
}

/// Overall tone of a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl<'de> Deserialize<'de> for Sentiment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(match raw.trim().to_ascii_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAnalysis {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl DocumentInfo {
    /// Models fill absent fields with placeholders; treat those as missing.
    fn cleaned(mut self) -> Self {
        let blank = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty() && !matches!(v.to_ascii_lowercase().as_str(), "n/a" | "unknown" | "none" | "null"))
        };
        self.title = blank(self.title);
        self.author = blank(self.author);
        self.date = blank(self.date);
        self
    }
}

/// Slice out the outermost JSON object of a reply that may carry prose or code fences.
pub fn extract_json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

/// Cut `text` to at most `max_chars` characters, appending a marker when cut.
pub fn truncate(text: &str, max_chars: usize) -> std::borrow::Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{}", &text[..idx], TRUNCATION_MARKER).into(),
        None => text.into(),
    }
}

fn parse_structured<T: serde::de::DeserializeOwned>(reply: &str) -> Result<T> {
    extract_json_object(reply)
        .and_then(|json| serde_json::from_str(json).ok())
        .ok_or_else(|| Error::ExternalService(MALFORMED_REPLY.to_string()))
}

const SYSTEM_PROMPT: &str =
    "You are a careful document assistant. Base every statement on the document you are given.";

/// The document operations exposed over HTTP.
#[derive(Clone)]
pub struct DocumentAssistant {
    generator: Arc<dyn TextGenerator>,
    max_input_chars: usize,
}

impl DocumentAssistant {
    pub fn new(generator: Arc<dyn TextGenerator>, max_input_chars: usize) -> Self {
        Self {
            generator,
            max_input_chars,
        }
    }

    fn document_block(&self, document: &DocumentRow) -> String {
        format!(
            "Title: {}\n\n<document>\n{}\n</document>",
            document.title,
            truncate(&document.content, self.max_input_chars)
        )
    }

    async fn ask_model(&self, prompt: String) -> Result<String> {
        let request = GenerationRequest {
            system: Some(SYSTEM_PROMPT.to_string()),
            prompt,
        };
        self.generator.generate(&request).await
    }

    pub async fn analyze(&self, document: &DocumentRow) -> Result<DocumentAnalysis> {
        let prompt = format!(
            r#"Analyze the following document and provide:
1. A concise summary
2. Key points
3. Overall sentiment (positive, negative, or neutral)
4. Main topics discussed
5. Recommendations based on the content

{}

Respond with only a JSON object of this shape:
{{"summary": "string", "keyPoints": ["string"], "sentiment": "positive|negative|neutral", "topics": ["string"], "recommendations": ["string"]}}"#,
            self.document_block(document)
        );

        let reply = self.ask_model(prompt).await?;
        let analysis = parse_structured(&reply)?;
        info!(document_id = %document.id, "Document analyzed");
        Ok(analysis)
    }

    pub async fn summarize(&self, document: &DocumentRow) -> Result<String> {
        let prompt = format!(
            "Generate a concise summary of the following document. The summary should be clear, \
             informative, and capture the main points while maintaining readability.\n\n{}",
            self.document_block(document)
        );
        Ok(self.ask_model(prompt).await?.trim().to_string())
    }

    pub async fn answer(&self, document: &DocumentRow, question: &str) -> Result<String> {
        let prompt = format!(
            "Answer the question using only the document below. If the document does not contain \
             the answer, say that the document does not provide this information.\n\n{}\n\nQuestion: {}",
            self.document_block(document),
            question
        );
        Ok(self.ask_model(prompt).await?.trim().to_string())
    }

    pub async fn extract_information(&self, document: &DocumentRow) -> Result<DocumentInfo> {
        let prompt = format!(
            r#"Extract the following information from the document:
- Title (if present)
- Author (if present)
- Date (if present)
- Keywords
- Named entities (people, organizations, locations, etc.)

{}

Respond with only a JSON object of this shape, using null for anything not present:
{{"title": "string", "author": "string", "date": "string", "keywords": ["string"], "entities": [{{"name": "string", "type": "string"}}]}}"#,
            self.document_block(document)
        );

        let reply = self.ask_model(prompt).await?;
        Ok(parse_structured::<DocumentInfo>(&reply)?.cleaned())
    }
}

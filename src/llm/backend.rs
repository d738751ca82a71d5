use crate::config::LlmConfig;
use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;

pub const STOP_SEQUENCES: [&str; 2] = ["\n\n# DONE", "<|stop|>"];

/// One system/user exchange as sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop: Vec<String>,
}

pub type FragmentStream = Box<dyn Iterator<Item = Result<String, BackendError>> + Send>;

/// Transport to a chat-completion service. Implementations classify their
/// errors; they never retry.
pub trait CompletionBackend: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError>;
    fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream, BackendError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    stop: &'a [String],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client. A local Ollama serves the
/// same API under `/v1`.
pub struct HttpBackend {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl HttpBackend {
    pub fn new(config: &LlmConfig) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Connectivity(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_available(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        self.client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::blocking::Response, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: &request.system },
                ChatMessage { role: "user", content: &request.user },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stop: &request.stop,
            stream,
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(classify_transport)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().unwrap_or_default();
        if status.as_u16() == 429 {
            Err(BackendError::RateLimited(text))
        } else {
            Err(BackendError::Status { status: status.as_u16(), body: text })
        }
    }
}

fn classify_transport(err: reqwest::Error) -> BackendError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        BackendError::Connectivity(err.to_string())
    } else {
        BackendError::Malformed(err.to_string())
    }
}

impl CompletionBackend for HttpBackend {
    fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let resp: ChatResponse = self
            .send(request, false)?
            .json()
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| BackendError::Malformed("response has no choices".to_string()))
    }

    fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream, BackendError> {
        let resp = self.send(request, true)?;
        Ok(Box::new(SseFragments::new(BufReader::new(resp))))
    }
}

/// Reads `data:` lines of a server-sent event stream and yields the
/// content deltas until `[DONE]`.
pub struct SseFragments<R> {
    reader: R,
    done: bool,
}

impl<R: BufRead> SseFragments<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, done: false }
    }
}

impl<R: BufRead> Iterator for SseFragments<R> {
    type Item = Result<String, BackendError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    let Some(data) = line.trim().strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        self.done = true;
                        continue;
                    }
                    return match serde_json::from_str::<ChatChunk>(data) {
                        Ok(chunk) => Some(Ok(chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.delta.content)
                            .unwrap_or_default())),
                        Err(e) => {
                            self.done = true;
                            Some(Err(BackendError::Malformed(e.to_string())))
                        }
                    };
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(BackendError::Connectivity(e.to_string())));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn sse_yields_deltas_until_done() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                    : keep-alive\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{}}]}\n\n\
                    data: [DONE]\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n";
        let parts: Vec<String> = SseFragments::new(Cursor::new(body))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(parts, ["Hel", "lo", ""]);
    }

    #[test]
    fn sse_reports_garbage_once() {
        let mut frags = SseFragments::new(Cursor::new("data: {not json}\ndata: [DONE]\n"));
        assert!(matches!(frags.next(), Some(Err(BackendError::Malformed(_)))));
        assert!(frags.next().is_none());
    }

    #[test]
    fn request_body_matches_chat_completions_shape() {
        let stop: Vec<String> = STOP_SEQUENCES.iter().map(|s| s.to_string()).collect();
        let body = ChatRequest {
            model: "mistral:instruct",
            messages: [
                ChatMessage { role: "system", content: "sys" },
                ChatMessage { role: "user", content: "hi" },
            ],
            temperature: 0.5,
            max_tokens: 16,
            stop: &stop,
            stream: false,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["content"], "hi");
        assert_eq!(v["stop"][1], "<|stop|>");
        assert_eq!(v["stream"], false);
    }
}

use crate::error::ToolError;
use crate::llm::Completion;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

const CHUNK_SIZE: usize = 1000;
const CHUNK_OVERLAP: usize = 200;
const MAX_CONTEXT_CHARS: usize = 8000;
const SNIPPET_CHARS: usize = 600;
const NO_ANSWER: &str = "I don't know.";

/// Chunks a documentation answer draws on unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 6;

const SYSTEM_PROMPT: &str = "You are an ERP expert. Answer concisely using ONLY the provided context. \
If the answer is not clearly in the context, say 'I don't know'. \
Prefer steps and exact ERP terms when possible.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocAnswer {
    pub answer: String,
    pub sources: Vec<String>,
}

/// Answers how-to questions from product documentation.
pub trait DocsLookup: Send + Sync {
    fn answer(&self, question: &str, k: usize) -> Result<DocAnswer, ToolError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub source: String,
    pub text: String,
}

/// Splits `text` into overlapping windows of `size` characters.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut parts = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let end = (i + size).min(chars.len());
        parts.push(chars[i..end].iter().collect());
        i += step;
    }
    parts
}

fn is_markdown(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref(),
        Some("md" | "mdx" | "markdown")
    )
}

/// Reads every markdown file under `dir` (recursively) into chunks. A
/// missing directory yields no chunks.
pub fn load_dir(dir: &Path) -> Result<Vec<Chunk>, ToolError> {
    let mut chunks = Vec::new();
    if !dir.is_dir() {
        return Ok(chunks);
    }
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current)
            .map_err(|e| ToolError::Collaborator(format!("cannot read {current:?}: {e}")))?;
        let mut paths: Vec<_> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();
        for path in paths {
            if path.is_dir() {
                pending.push(path);
            } else if is_markdown(&path) {
                let Ok(text) = fs::read_to_string(&path) else {
                    warn!(path = %path.display(), "skipping unreadable doc");
                    continue;
                };
                let source = path.display().to_string();
                chunks.extend(
                    chunk_text(&text, CHUNK_SIZE, CHUNK_OVERLAP)
                        .into_iter()
                        .map(|text| Chunk { source: source.clone(), text }),
                );
            }
        }
    }
    debug!(chunks = chunks.len(), dir = %dir.display(), "loaded docs");
    Ok(chunks)
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Term-overlap search over in-memory chunks, with an optional model to
/// phrase the answer.
pub struct KeywordDocs {
    chunks: Vec<Chunk>,
    llm: Option<Arc<dyn Completion>>,
}

impl KeywordDocs {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks, llm: None }
    }

    pub fn with_llm(mut self, llm: Arc<dyn Completion>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Best `k` chunks sharing at least one term with `query`.
    pub fn search(&self, query: &str, k: usize) -> Vec<&Chunk> {
        let wanted = terms(query);
        let mut scored: Vec<(f32, usize, &Chunk)> = self
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(i, chunk)| {
                let have = terms(&chunk.text);
                let hits = wanted.intersection(&have).count();
                if hits == 0 {
                    return None;
                }
                let score = hits as f32 / (have.len() as f32).sqrt().max(1.0);
                Some((score, i, chunk))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.into_iter().take(k).map(|(_, _, c)| c).collect()
    }
}

impl DocsLookup for KeywordDocs {
    fn answer(&self, question: &str, k: usize) -> Result<DocAnswer, ToolError> {
        let hits = self.search(question, k.max(1));
        let Some(best) = hits.first() else {
            return Ok(DocAnswer { answer: NO_ANSWER.to_string(), sources: Vec::new() });
        };

        let mut sources: Vec<String> = Vec::new();
        for hit in &hits {
            if !sources.contains(&hit.source) {
                sources.push(hit.source.clone());
            }
        }
        sources.truncate(k);

        let context = hits
            .iter()
            .map(|h| format!("[{}] {}", h.source, h.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let context = truncate_chars(&context, MAX_CONTEXT_CHARS);
        let prompt = format!("Question: {question}\n\nContext:\n{context}\n\nAnswer:");

        let snippet = || truncate_chars(&best.text, SNIPPET_CHARS).to_string();
        let answer = match &self.llm {
            Some(llm) => llm.complete(SYSTEM_PROMPT, &prompt).unwrap_or_else(|e| {
                warn!(error = %e, "doc answer fell back to snippet");
                snippet()
            }),
            None => snippet(),
        };

        Ok(DocAnswer { answer, sources })
    }
}

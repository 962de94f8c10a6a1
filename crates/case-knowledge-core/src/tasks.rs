//! Task extraction: content aggregation, prompt construction and
//! lenient parsing of the model's reply.
//!
//! Nothing here talks to a model. The app's task engine feeds
//! [`task_request`] to a completer and hands the reply to
//! [`parse_task_response`], which never fails: malformed output degrades
//! to an empty list.

use serde::Serialize;
use serde_json::Value;

use crate::error::{CaseError, CaseResult};
use crate::models::{ChunkMetadata, ContentChunk, TaskCategory, TaskDraft, TaskPriority};
use crate::provider::CompletionRequest;

pub const TASK_SYSTEM_PROMPT: &str = "You are a construction site safety and compliance expert. \
You MUST respond with valid JSON only. No explanations, no markdown, just pure JSON.";

const TASK_INSTRUCTIONS: &str = r#"Based on this content, generate 2-5 specific actionable tasks. Focus on:
1. Safety issues requiring immediate attention
2. Compliance or regulatory requirements
3. Repairs or maintenance needed
4. Required documentation or reports
5. Follow-up actions needed

CRITICAL: You must respond with ONLY valid JSON in this exact format. Do not include any explanatory text before or after the JSON:

{
    "tasks": [
        {
            "title": "Inspect structural integrity",
            "description": "Detailed description of what needs to be done",
            "priority": "high",
            "category": "safety",
            "reasoning": "Why this task is important"
        }
    ]
}

Priority must be: "high", "medium", or "low"
Category must be: "safety", "compliance", "maintenance", "documentation", or "general""#;

/// One aggregated piece of case content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentItem {
    pub chunk_id: String,
    pub source_filename: String,
    pub doc_id: String,
    pub chunk_index: u32,
    pub text: String,
}

/// A case's non-task content grouped by modality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaseContent {
    pub documents: Vec<ContentItem>,
    pub audio_transcriptions: Vec<ContentItem>,
    pub image_descriptions: Vec<ContentItem>,
}

impl CaseContent {
    /// Groups chunks by doc_type, skipping task chunks.
    ///
    /// Items are ordered by filename, then document, then chunk index, so
    /// each document reads in its original order.
    pub fn aggregate(chunks: &[ContentChunk]) -> Self {
        let mut content = CaseContent::default();
        for chunk in chunks {
            let bucket = match &chunk.metadata {
                ChunkMetadata::Document { .. } => &mut content.documents,
                ChunkMetadata::AudioTranscription { .. } => &mut content.audio_transcriptions,
                ChunkMetadata::Image { .. } => &mut content.image_descriptions,
                ChunkMetadata::Task { .. } => continue,
            };
            bucket.push(ContentItem {
                chunk_id: chunk.chunk_id.clone(),
                source_filename: chunk
                    .metadata
                    .source_filename()
                    .unwrap_or_default()
                    .to_string(),
                doc_id: chunk.metadata.doc_id().to_string(),
                chunk_index: chunk.metadata.chunk_index(),
                text: chunk.text.clone(),
            });
        }
        for bucket in [
            &mut content.documents,
            &mut content.audio_transcriptions,
            &mut content.image_descriptions,
        ] {
            bucket.sort_by(|a, b| {
                (&a.source_filename, &a.doc_id, a.chunk_index).cmp(&(
                    &b.source_filename,
                    &b.doc_id,
                    b.chunk_index,
                ))
            });
        }
        content
    }

    pub fn total(&self) -> usize {
        self.documents.len() + self.audio_transcriptions.len() + self.image_descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Every aggregated chunk id, used as task provenance.
    pub fn all_chunk_ids(&self) -> Vec<String> {
        self.documents
            .iter()
            .chain(&self.audio_transcriptions)
            .chain(&self.image_descriptions)
            .map(|item| item.chunk_id.clone())
            .collect()
    }
}

/// Renders the user prompt for task generation.
pub fn task_prompt(content: &CaseContent) -> String {
    let mut prompt = String::from("Analyze this construction case and generate actionable tasks:\n\n");
    let sections = [
        ("DOCUMENTS", &content.documents),
        ("AUDIO TRANSCRIPTIONS", &content.audio_transcriptions),
        ("IMAGE DESCRIPTIONS", &content.image_descriptions),
    ];
    for (heading, items) in sections {
        if items.is_empty() {
            continue;
        }
        prompt.push_str(heading);
        prompt.push_str(":\n");
        for item in items {
            prompt.push_str(&format!("- {}: {}\n", item.source_filename, item.text));
        }
        prompt.push('\n');
    }
    prompt.push_str(TASK_INSTRUCTIONS);
    prompt
}

pub fn task_request(content: &CaseContent) -> CompletionRequest {
    CompletionRequest::new(TASK_SYSTEM_PROMPT, task_prompt(content))
}

/// Parses a model reply into task drafts, degrading to `[]` on any failure.
pub fn parse_task_response(raw: &str) -> Vec<TaskDraft> {
    try_parse_tasks(raw).unwrap_or_default()
}

/// Strict variant of [`parse_task_response`] that reports why parsing failed.
pub fn try_parse_tasks(raw: &str) -> CaseResult<Vec<TaskDraft>> {
    let body = strip_code_fence(raw);
    let value = match serde_json::from_str::<Value>(body) {
        Ok(v) => v,
        Err(direct) => {
            let candidate = first_balanced_object(body).ok_or_else(|| CaseError::ExtractionParse {
                reason: format!("no JSON object in reply: {}", direct),
            })?;
            serde_json::from_str::<Value>(candidate).map_err(|e| CaseError::ExtractionParse {
                reason: e.to_string(),
            })?
        }
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("tasks") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(CaseError::ExtractionParse {
                    reason: "reply has no 'tasks' array".to_string(),
                })
            }
        },
        other => {
            return Err(CaseError::ExtractionParse {
                reason: format!("unexpected JSON value: {}", other),
            })
        }
    };

    Ok(items.iter().filter_map(draft_from_value).collect())
}

fn draft_from_value(value: &Value) -> Option<TaskDraft> {
    let obj = value.as_object()?;
    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    let title = text("title");
    if title.is_empty() {
        return None;
    }
    Some(TaskDraft {
        title,
        description: text("description"),
        priority: TaskPriority::parse_lenient(&text("priority")),
        category: TaskCategory::parse_lenient(&text("category")),
        reasoning: text("reasoning"),
    })
}

/// Removes a surrounding Markdown code fence, with or without a language tag.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Finds the first `{...}` substring whose braces balance, ignoring braces
/// inside JSON strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

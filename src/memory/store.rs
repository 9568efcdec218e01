//! Session transcript
//!
//! Bounded, in-order record of what was said in one session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Default number of messages kept per session
pub const DEFAULT_TRANSCRIPT_CAPACITY: usize = 200;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Advisor,
    System,
}

/// A single message in the transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: MessageRole,
    pub content: String,
    /// Approximate token count
    pub token_count: usize,
    /// Routed intent or event label (documents, recommendation, ...)
    pub label: Option<String>,
}

impl TranscriptMessage {
    pub fn new(role: MessageRole, content: String, label: Option<String>) -> Self {
        let token_count = (content.len() + 3) / 4;

        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            content,
            token_count,
            label,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    messages: VecDeque<TranscriptMessage>,
    total_tokens: usize,
    capacity: usize,
}

impl Transcript {
    pub fn new(capacity: usize) -> Self {
        Self {
            created_at: Utc::now(),
            updated_at: Utc::now(),
            messages: VecDeque::new(),
            total_tokens: 0,
            capacity: capacity.max(1),
        }
    }

    /// Append, dropping the oldest messages past capacity.
    pub fn push(&mut self, message: TranscriptMessage) {
        self.total_tokens += message.token_count;
        self.messages.push_back(message);

        while self.messages.len() > self.capacity {
            if let Some(old) = self.messages.pop_front() {
                self.total_tokens = self.total_tokens.saturating_sub(old.token_count);
            }
        }
        self.updated_at = Utc::now();
    }

    pub fn user(&mut self, content: &str) {
        self.push(TranscriptMessage::new(MessageRole::User, content.to_string(), None));
    }

    pub fn advisor(&mut self, content: &str, label: Option<String>) {
        self.push(TranscriptMessage::new(MessageRole::Advisor, content.to_string(), label));
    }

    pub fn messages(&self) -> impl Iterator<Item = &TranscriptMessage> {
        self.messages.iter()
    }

    /// N most recent messages, newest first
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &TranscriptMessage> {
        self.messages.iter().rev().take(count)
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Plain-text rendering for logs and the demo binary
    pub fn formatted(&self) -> String {
        let mut out = String::new();

        for msg in &self.messages {
            let role = match msg.role {
                MessageRole::User => "You",
                MessageRole::Advisor => "Advisor",
                MessageRole::System => "System",
            };
            out.push_str(&format!(
                "[{}] {}: {}\n\n",
                msg.timestamp.format("%H:%M:%S"),
                role,
                msg.content
            ));
        }

        out
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSCRIPT_CAPACITY)
    }
}

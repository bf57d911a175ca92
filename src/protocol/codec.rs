//! Producer chunk codec and response assembly
//!
//! Producers emit small JSON chunks `{type: start|thinking|result, content}`.
//! Text that is not a JSON chunk at all is an opaque plain-text chunk and
//! counts as answer text. A JSON chunk of any other type is relayed verbatim
//! but left out of the answer. [`StreamAssembler`] turns a sequence of chunks into the
//! frames broadcast for one response id.

use serde::{Deserialize, Serialize};

use super::frame::Frame;
use super::messages::MessageId;

/// Chunk type reported by a producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Opening remark, shown as thinking
    Start,
    /// Intermediate reasoning, never persisted
    Thinking,
    /// Part of the final answer
    Result,
    /// Unparseable chunk, treated as answer text
    #[serde(skip)]
    Text,
    /// JSON chunk of an unknown type, relayed as-is
    #[serde(skip)]
    Passthrough,
}

/// A decoded producer chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerChunk {
    pub kind: ChunkKind,
    pub content: String,
}

#[derive(Deserialize)]
struct RawChunk {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: String,
}

impl ProducerChunk {
    pub fn new(kind: ChunkKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    /// Decode a raw chunk, falling back to plain text
    pub fn parse(raw: &str) -> Self {
        let Ok(chunk) = serde_json::from_str::<RawChunk>(raw) else {
            return Self::new(ChunkKind::Text, raw);
        };

        match chunk.kind.as_str() {
            "start" => Self::new(ChunkKind::Start, chunk.content),
            "thinking" => Self::new(ChunkKind::Thinking, chunk.content),
            "result" => Self::new(ChunkKind::Result, chunk.content),
            _ => Self::new(ChunkKind::Passthrough, raw),
        }
    }

    /// Encode as the JSON chunk format producers emit
    pub fn encode(&self) -> String {
        match self.kind {
            ChunkKind::Text | ChunkKind::Passthrough => self.content.clone(),
            kind => serde_json::json!({ "type": kind, "content": self.content }).to_string(),
        }
    }

    /// Whether the chunk is shown as thinking
    pub fn is_thinking(&self) -> bool {
        matches!(self.kind, ChunkKind::Start | ChunkKind::Thinking)
    }

    /// Whether the chunk is part of the final answer
    pub fn is_result(&self) -> bool {
        matches!(self.kind, ChunkKind::Result | ChunkKind::Text)
    }
}

/// Builds the frame sequence for one streamed response
#[derive(Debug)]
pub struct StreamAssembler {
    response_id: MessageId,
    result: String,
    chunks: usize,
    finished: bool,
}

impl StreamAssembler {
    pub fn new(response_id: MessageId) -> Self {
        Self {
            response_id,
            result: String::new(),
            chunks: 0,
            finished: false,
        }
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    /// Number of chunk frames produced so far
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Concatenated answer text so far
    pub fn result(&self) -> &str {
        &self.result
    }

    /// Frame for one raw chunk
    pub fn push(&mut self, raw: &str) -> Frame {
        let chunk = ProducerChunk::parse(raw);
        if chunk.is_result() {
            self.result.push_str(&chunk.content);
        }
        self.chunks += 1;
        let thinking = chunk.is_thinking();
        Frame::stream(&self.response_id, chunk.content, false, thinking)
    }

    /// The single terminal frame, carrying the full answer.
    ///
    /// Returns `None` once the end frame has already been produced.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(Frame::stream(&self.response_id, self.result.clone(), true, false))
    }

    /// Consume the assembler, yielding the final answer text
    pub fn into_result(self) -> String {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed_chunks() {
        assert_eq!(
            ProducerChunk::parse(r#"{"type":"start","content":"go"}"#),
            ProducerChunk::new(ChunkKind::Start, "go")
        );
        assert_eq!(
            ProducerChunk::parse(r#"{"type":"thinking","content":"hmm"}"#).kind,
            ChunkKind::Thinking
        );
        assert_eq!(
            ProducerChunk::parse(r#"{"type":"result","content":"42"}"#),
            ProducerChunk::new(ChunkKind::Result, "42")
        );
    }

    #[test]
    fn test_parse_fallback_text() {
        assert_eq!(
            ProducerChunk::parse("plain words"),
            ProducerChunk::new(ChunkKind::Text, "plain words")
        );
        // JSON that is not an object
        assert_eq!(ProducerChunk::parse("\n").kind, ChunkKind::Text);
    }

    #[test]
    fn test_parse_unknown_type_passthrough() {
        let raw = r#"{"type":"tool","content":"x"}"#;
        let chunk = ProducerChunk::parse(raw);
        assert_eq!(chunk, ProducerChunk::new(ChunkKind::Passthrough, raw));
        assert!(!chunk.is_result());
        assert!(!chunk.is_thinking());
        assert_eq!(chunk.encode(), raw);

        // An object without a type is relayed the same way
        let untyped = r#"{"content":"y"}"#;
        assert_eq!(ProducerChunk::parse(untyped).kind, ChunkKind::Passthrough);
    }

    #[test]
    fn test_encode_matches_parse() {
        let chunk = ProducerChunk::new(ChunkKind::Result, "sunny");
        assert_eq!(ProducerChunk::parse(&chunk.encode()), chunk);
        let text = ProducerChunk::new(ChunkKind::Text, "raw");
        assert_eq!(text.encode(), "raw");
    }

    #[test]
    fn test_assembler_concatenates_result_chunks() {
        let mut assembler = StreamAssembler::new("r1".to_string());
        let frames = vec![
            assembler.push(&ProducerChunk::new(ChunkKind::Start, "Looking: ").encode()),
            assembler.push(&ProducerChunk::new(ChunkKind::Thinking, "...").encode()),
            assembler.push(&ProducerChunk::new(ChunkKind::Result, "Hello ").encode()),
            assembler.push("world"),
        ];

        assert!(frames[0].is_thinking());
        assert!(frames[1].is_thinking());
        assert!(!frames[2].is_thinking());
        assert!(frames.iter().all(|f| !f.is_end() && f.id == "r1"));
        assert_eq!(assembler.chunk_count(), 4);

        let end = assembler.finish().unwrap();
        assert!(end.is_end());
        assert_eq!(end.content, "Hello world");
        assert_eq!(end.id, "r1");
    }

    #[test]
    fn test_assembler_skips_unknown_chunks_in_answer() {
        let mut assembler = StreamAssembler::new("r3".to_string());
        assembler.push(&ProducerChunk::new(ChunkKind::Result, "A").encode());
        let relayed = assembler.push(r#"{"type":"tool","content":"x"}"#);

        assert_eq!(relayed.content, r#"{"type":"tool","content":"x"}"#);
        assert!(!relayed.is_thinking());
        assert_eq!(assembler.chunk_count(), 2);
        assert_eq!(assembler.finish().unwrap().content, "A");
    }

    #[test]
    fn test_assembler_finishes_once() {
        let mut assembler = StreamAssembler::new("r2".to_string());
        assert!(assembler.finish().is_some());
        assert!(assembler.finish().is_none());
    }
}

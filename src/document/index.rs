//! In-memory document index with lexical ranking.
//!
//! A document is built completely before it becomes visible. Replacing it
//! swaps one `Arc`, so a concurrent query sees either the old document or
//! the new one, never a mix.

use crate::defaults;
use crate::document::chunker::{self, Section};
use crate::error::{ParlanceError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Words ignored when ranking.
const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "but", "by", "can", "could", "did", "do",
    "does", "for", "from", "had", "has", "have", "how", "i", "if", "in", "into", "is", "it",
    "its", "me", "my", "of", "on", "or", "our", "so", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "to", "was", "we", "were", "what", "when", "where",
    "which", "who", "why", "will", "with", "would", "you", "your",
];

/// Characters of the first paragraph shown in a summary.
const SUMMARY_PREVIEW_CHARS: usize = 150;

/// Identifies one ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DocumentId(u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

/// Position of a chunk in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChunkId(usize);

impl ChunkId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk-{}", self.0)
    }
}

/// A contiguous span of document text with its ranking keywords.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    id: ChunkId,
    section: String,
    text: String,
    keywords: BTreeSet<String>,
}

impl DocumentChunk {
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Title of the section the chunk belongs to.
    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn keywords(&self) -> &BTreeSet<String> {
        &self.keywords
    }
}

/// A generated study question with its answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudyQuestion {
    pub question: String,
    pub answer: String,
}

/// An ingested, immutable document.
#[derive(Debug)]
pub struct Document {
    id: DocumentId,
    name: String,
    sections: Vec<Section>,
    chunks: Vec<DocumentChunk>,
    word_count: usize,
}

impl Document {
    fn build(id: DocumentId, name: &str, text: &str, max_chunk_chars: usize) -> Result<Self> {
        let sections = chunker::split_sections(text);
        let mut chunks = Vec::new();
        for section in &sections {
            let title_words = tokenize(&section.title);
            for piece in chunker::chunk_text(&section.body, max_chunk_chars) {
                let mut keywords = tokenize(&piece);
                keywords.extend(title_words.iter().cloned());
                chunks.push(DocumentChunk {
                    id: ChunkId(chunks.len()),
                    section: section.title.clone(),
                    text: piece,
                    keywords,
                });
            }
        }
        if chunks.is_empty() {
            return Err(ParlanceError::EmptyDocument);
        }

        Ok(Self {
            id,
            name: name.to_string(),
            sections,
            chunks,
            word_count: text.split_whitespace().count(),
        })
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chunks(&self) -> &[DocumentChunk] {
        &self.chunks
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&DocumentChunk> {
        self.chunks.get(id.0)
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    /// Ranks chunks by the number of distinct query keywords they contain.
    ///
    /// Chunks sharing no keyword are left out. Ties go to the earlier chunk.
    pub fn query(&self, text: &str, k: usize) -> Vec<ChunkId> {
        if k == 0 {
            return Vec::new();
        }
        let query = tokenize(text);
        if query.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, ChunkId)> = self
            .chunks
            .iter()
            .map(|chunk| (query.intersection(&chunk.keywords).count(), chunk.id))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);
        scored.into_iter().map(|(_, id)| id).collect()
    }

    /// Like [`Document::query`], returning the chunks themselves.
    pub fn retrieve(&self, text: &str, k: usize) -> Vec<&DocumentChunk> {
        self.query(text, k)
            .into_iter()
            .filter_map(|id| self.chunk(id))
            .collect()
    }

    /// Name, word count and a preview of the opening text.
    pub fn summary(&self) -> String {
        let opening = self
            .sections
            .iter()
            .find(|s| !s.body.is_empty())
            .map(|s| s.body.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        let preview: String = opening.chars().take(SUMMARY_PREVIEW_CHARS).collect();
        format!(
            "Document: {}\nWord count: {}\n\nPreview: {}...",
            self.name, self.word_count, preview
        )
    }

    /// Turns the first `n` section titles into questions answered by the
    /// section's first sentence. Untitled or empty sections are skipped.
    pub fn study_questions(&self, n: usize) -> Vec<StudyQuestion> {
        self.sections
            .iter()
            .take(n)
            .filter(|s| !s.title.is_empty() && !s.body.is_empty())
            .map(|s| StudyQuestion {
                question: title_to_question(&s.title),
                answer: first_sentence(&s.body),
            })
            .collect()
    }
}

fn title_to_question(title: &str) -> String {
    let title: String = title.chars().filter(|c| !c.is_ascii_punctuation()).collect();
    let title = title.trim();
    let Some(first) = title.split_whitespace().next() else {
        return "What is this section about?".to_string();
    };
    let first = first.to_lowercase();

    if ["what", "when", "where", "who", "why", "how"].contains(&first.as_str()) {
        format!("{title}?")
    } else if ["the", "a", "an"].contains(&first.as_str()) {
        format!("What is {title}?")
    } else {
        format!("Can you explain what {title} means?")
    }
}

fn first_sentence(body: &str) -> String {
    body.split('.')
        .next()
        .unwrap_or(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased keywords of `text`, without stop words and single letters.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() > 1)
        .map(str::to_lowercase)
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

/// Holds the active document. Single writer, many readers.
#[derive(Debug)]
pub struct DocumentIndex {
    current: RwLock<Option<Arc<Document>>>,
    next_id: AtomicU64,
    max_chunk_chars: usize,
}

impl DocumentIndex {
    pub fn new() -> Self {
        Self::with_max_chunk_chars(defaults::MAX_CHUNK_CHARS)
    }

    pub fn with_max_chunk_chars(max_chunk_chars: usize) -> Self {
        Self {
            current: RwLock::new(None),
            next_id: AtomicU64::new(1),
            max_chunk_chars: max_chunk_chars.max(1),
        }
    }

    /// Chunks `text` and makes it the active document.
    ///
    /// # Errors
    /// `EmptyDocument` if the text has no extractable chunks; the previous
    /// document then stays active.
    pub fn ingest(&self, name: &str, text: &str) -> Result<DocumentId> {
        let id = DocumentId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let document = Arc::new(Document::build(id, name, text, self.max_chunk_chars)?);
        let mut current = self
            .current
            .write()
            .map_err(|e| ParlanceError::Other(format!("document index poisoned: {e}")))?;
        *current = Some(document);
        Ok(id)
    }

    /// Ranks the active document's chunks. Empty when no document is loaded.
    pub fn query(&self, text: &str, k: usize) -> Vec<ChunkId> {
        self.snapshot()
            .map(|doc| doc.query(text, k))
            .unwrap_or_default()
    }

    /// The active document, if any.
    pub fn snapshot(&self) -> Option<Arc<Document>> {
        self.current.read().ok().and_then(|doc| doc.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Drops the active document.
    pub fn clear(&self) {
        if let Ok(mut current) = self.current.write() {
            *current = None;
        }
    }

    pub fn summary(&self) -> Option<String> {
        self.snapshot().map(|doc| doc.summary())
    }

    pub fn study_questions(&self, n: usize) -> Vec<StudyQuestion> {
        self.snapshot()
            .map(|doc| doc.study_questions(n))
            .unwrap_or_default()
    }
}

impl Default for DocumentIndex {
    fn default() -> Self {
        Self::new()
    }
}

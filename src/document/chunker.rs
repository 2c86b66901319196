//! Splits document text into heading sections and size-bounded chunks.

/// Title given to text that appears before any heading.
pub const DEFAULT_SECTION: &str = "Main Content";

/// A run of text under one heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub body: String,
}

/// Splits text at markdown `#` headings.
///
/// Text before the first heading becomes a [`DEFAULT_SECTION`] section.
/// Blank pre-heading text is dropped; titled sections are kept even when
/// their body is empty.
pub fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut title: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim_start().starts_with('#') {
            push_section(&mut sections, title.take(), &body);
            body.clear();
            title = Some(line.trim_start().trim_start_matches('#').trim().to_string());
        } else {
            body.push(line);
        }
    }
    push_section(&mut sections, title, &body);
    sections
}

fn push_section(sections: &mut Vec<Section>, title: Option<String>, body: &[&str]) {
    let joined = body.join("\n").trim().to_string();
    match title {
        Some(title) => sections.push(Section {
            title,
            body: joined,
        }),
        None if !joined.is_empty() => sections.push(Section {
            title: DEFAULT_SECTION.to_string(),
            body: joined,
        }),
        None => {}
    }
}

/// Packs the paragraphs of `body` into chunks of at most `max_chars`
/// characters.
///
/// Paragraphs are separated by blank lines and are never merged across a
/// section boundary. A paragraph longer than `max_chars` is split at
/// sentence ends, then at word boundaries.
pub fn chunk_text(body: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs(body) {
        let pieces = if char_len(&paragraph) > max_chars {
            split_long(&paragraph, max_chars)
        } else {
            vec![paragraph]
        };
        for piece in pieces {
            if current.is_empty() {
                current = piece;
            } else if char_len(&current) + 2 + char_len(&piece) <= max_chars {
                current.push_str("\n\n");
                current.push_str(&piece);
            } else {
                chunks.push(std::mem::replace(&mut current, piece));
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn paragraphs(body: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    for line in body.lines() {
        if line.trim().is_empty() {
            if !lines.is_empty() {
                paragraphs.push(lines.join(" "));
                lines.clear();
            }
        } else {
            lines.push(line.trim());
        }
    }
    if !lines.is_empty() {
        paragraphs.push(lines.join(" "));
    }
    paragraphs
}

fn split_long(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in paragraph.split_inclusive(['.', '!', '?']) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let parts = if char_len(sentence) > max_chars {
            split_words(sentence, max_chars)
        } else {
            vec![sentence.to_string()]
        };
        for part in parts {
            pack(&mut pieces, &mut current, part, max_chars);
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn split_words(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        if char_len(word) > max_chars {
            let chars: Vec<char> = word.chars().collect();
            for part in chars.chunks(max_chars) {
                pack(&mut pieces, &mut current, part.iter().collect(), max_chars);
            }
        } else {
            pack(&mut pieces, &mut current, word.to_string(), max_chars);
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn pack(pieces: &mut Vec<String>, current: &mut String, part: String, max_chars: usize) {
    if current.is_empty() {
        *current = part;
    } else if char_len(current) + 1 + char_len(&part) <= max_chars {
        current.push(' ');
        current.push_str(&part);
    } else {
        pieces.push(std::mem::replace(current, part));
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_follow_headings() {
        let text = "Intro line.\n\n# Photosynthesis\nPlants make sugar.\n## Light\nLight drives it.";
        let sections = split_sections(text);

        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].title, DEFAULT_SECTION);
        assert_eq!(sections[0].body, "Intro line.");
        assert_eq!(sections[1].title, "Photosynthesis");
        assert_eq!(sections[1].body, "Plants make sugar.");
        assert_eq!(sections[2].title, "Light");
    }

    #[test]
    fn text_without_headings_is_one_section() {
        let sections = split_sections("just some notes\nmore notes");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, DEFAULT_SECTION);
    }

    #[test]
    fn blank_text_has_no_sections() {
        assert!(split_sections("  \n\n \t\n").is_empty());
    }

    #[test]
    fn paragraphs_are_packed_up_to_limit() {
        let body = "aaaa\n\nbbbb\n\ncccc";
        assert_eq!(chunk_text(body, 10), vec!["aaaa\n\nbbbb", "cccc"]);
        assert_eq!(chunk_text(body, 4), vec!["aaaa", "bbbb", "cccc"]);
    }

    #[test]
    fn wrapped_lines_join_into_one_paragraph() {
        assert_eq!(chunk_text("one\ntwo\n\nthree", 100), vec!["one two\n\nthree"]);
    }

    #[test]
    fn long_paragraph_splits_at_sentences() {
        let body = "First sentence here. Second sentence here. Third one.";
        let chunks = chunk_text(body, 25);
        assert_eq!(
            chunks,
            vec!["First sentence here.", "Second sentence here.", "Third one."]
        );
    }

    #[test]
    fn no_chunk_exceeds_limit() {
        let body = "word ".repeat(200) + "\n\n" + &"x".repeat(95);
        for chunk in chunk_text(&body, 40) {
            assert!(chunk.chars().count() <= 40, "chunk too long: {chunk}");
        }
    }

    #[test]
    fn limit_counts_characters_not_bytes() {
        let body = "é".repeat(10);
        assert_eq!(chunk_text(&body, 10), vec![body.clone()]);
    }
}

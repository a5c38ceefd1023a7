use super::types::{Chunker, TextChunk};

/// Fixed-size character windows with overlap.
///
/// Windows start every `size - overlap` characters. Windows holding only
/// whitespace are dropped.
pub struct WindowChunker {
    size: usize,
    overlap: usize,
}

impl WindowChunker {
    /// `overlap` is clamped below `size`.
    pub fn new(size: usize, overlap: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            overlap: overlap.min(size - 1),
        }
    }

    fn step(&self) -> usize {
        self.size - self.overlap
    }
}

impl Default for WindowChunker {
    fn default() -> Self {
        Self::new(300, 100)
    }
}

impl Chunker for WindowChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.size).min(chars.len());
            let content: String = chars[start..end].iter().collect();
            if !content.trim().is_empty() {
                chunks.push(TextChunk {
                    content,
                    chunk_index: chunks.len(),
                    start_index: start,
                });
            }
            if end == chars.len() {
                break;
            }
            start += self.step();
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = WindowChunker::default().chunk("Short paragraph.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Short paragraph.");
        assert_eq!(chunks[0].start_index, 0);
    }

    #[test]
    fn windows_overlap() {
        let text: String = ('a'..='z').cycle().take(700).collect();
        let chunks = WindowChunker::default().chunk(&text);

        let starts: Vec<usize> = chunks.iter().map(|c| c.start_index).collect();
        assert_eq!(starts, vec![0, 200, 400]);
        assert_eq!(chunks[0].content.chars().count(), 300);
        assert_eq!(chunks[2].content.chars().count(), 300);
        // Last 100 chars of one window open the next
        assert_eq!(&chunks[0].content[200..], &chunks[1].content[..100]);
    }

    #[test]
    fn tail_window_is_shorter() {
        let text = "x".repeat(450);
        let chunks = WindowChunker::new(300, 100).chunk(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content.len(), 250);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "é".repeat(350);
        let chunks = WindowChunker::new(300, 100).chunk(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content.chars().count(), 300);
    }

    #[test]
    fn blank_input_has_no_chunks() {
        assert!(WindowChunker::default().chunk("").is_empty());
        assert!(WindowChunker::default().chunk("   \n\n ").is_empty());
    }

    #[test]
    fn degenerate_overlap_still_advances() {
        let chunks = WindowChunker::new(10, 50).chunk(&"y".repeat(25));
        assert_eq!(chunks.len(), 16);
        assert_eq!(chunks[1].start_index, 1);
    }
}

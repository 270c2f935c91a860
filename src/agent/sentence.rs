//! Sentence accumulation for streamed replies

/// Terminators that end a sentence only when followed by whitespace
const ASCII_TERMINATORS: [char; 4] = ['.', '?', '!', ':'];

/// Full-width terminators that end a sentence immediately
const WIDE_TERMINATORS: [char; 4] = ['。', '？', '！', '：'];

/// Collects streamed text deltas and yields complete sentences
///
/// ASCII punctuation needs trailing whitespace so decimals like `2.5` are not
/// split across deltas.
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    pending: String,
}

impl SentenceBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return every sentence it completed
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.pending.push_str(delta);

        let mut out = Vec::new();
        while let Some(end) = self.sentence_end() {
            let rest = self.pending.split_off(end);
            let sentence = std::mem::replace(&mut self.pending, rest);
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                out.push(sentence.to_string());
            }
        }
        out
    }

    /// Return whatever text is left at end of stream
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Byte index just past the first complete sentence
    fn sentence_end(&self) -> Option<usize> {
        let mut chars = self.pending.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if WIDE_TERMINATORS.contains(&c) {
                return Some(i + c.len_utf8());
            }
            if ASCII_TERMINATORS.contains(&c)
                && chars.peek().is_some_and(|(_, next)| next.is_whitespace())
            {
                return Some(i + c.len_utf8());
            }
        }
        None
    }
}

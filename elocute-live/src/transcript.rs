//! Rolling transcript assembled from incremental text fragments.

/// Concatenates text fragments in arrival order.
///
/// The transcript itself is unbounded; [`display`](Self::display) trims it
/// for presentation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    text: String,
    fragments: usize,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment.
    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments += 1;
    }

    /// Full text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of fragments received.
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Whether nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Forget everything (e.g. when moving to the next sentence).
    pub fn clear(&mut self) {
        self.text.clear();
        self.fragments = 0;
    }

    /// The last `max_chars` characters, prefixed with `...` when trimmed.
    pub fn display(&self, max_chars: usize) -> String {
        let total = self.text.chars().count();
        if total <= max_chars {
            return self.text.clone();
        }
        let skip = total - max_chars;
        let tail: String = self.text.chars().skip(skip).collect();
        format!("...{tail}")
    }
}

impl std::fmt::Display for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

use shared::domain::TaskKey;

/// Number of maximal non-whitespace runs in `text`.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Draft text for one task. The word count is cached and recomputed on
/// every content change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBuffer {
    key: TaskKey,
    content: String,
    word_count: usize,
}

impl TaskBuffer {
    pub fn new(key: TaskKey) -> Self {
        Self {
            key,
            content: String::new(),
            word_count: 0,
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    pub fn set_content(&mut self, text: impl Into<String>) {
        self.content = text.into();
        self.word_count = count_words(&self.content);
    }
}

#[cfg(test)]
#[path = "tests/buffer_tests.rs"]
mod tests;

//! Separate a model's reasoning from its answer.

use crate::session::partial_match_len;

/// Output of [`ResponseSplitter::split`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitResponse {
    pub answer: String,
    pub reasoning: String,
}

/// Splits raw model output on a reasoning marker and strips a literal
/// artifact from both halves.
#[derive(Debug, Clone)]
pub struct ResponseSplitter {
    marker: String,
    artifact: String,
}

impl Default for ResponseSplitter {
    fn default() -> Self {
        Self::new("</think>", "undefined")
    }
}

impl ResponseSplitter {
    pub fn new(marker: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            artifact: artifact.into(),
        }
    }

    /// Text before the first marker is reasoning, text after it the answer.
    /// Without a marker the whole text is the answer.
    pub fn split(&self, raw: &str) -> SplitResponse {
        let (reasoning, answer) = match raw.split_once(self.marker.as_str()) {
            Some((reasoning, answer)) if !self.marker.is_empty() => (reasoning, answer),
            _ => ("", raw),
        };
        SplitResponse {
            answer: self.strip(answer),
            reasoning: self.strip(reasoning),
        }
    }

    /// Split text incrementally as it streams in.
    pub fn stream(&self) -> StreamSplit<'_> {
        StreamSplit {
            splitter: self,
            pending: String::new(),
            past_marker: self.marker.is_empty(),
        }
    }

    fn strip(&self, text: &str) -> String {
        if self.artifact.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.artifact, "")
        }
    }
}

/// One piece of streamed output, labelled by which side of the marker it
/// fell on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitFragment {
    Reasoning(String),
    Answer(String),
}

/// Incremental form of [`ResponseSplitter::split`].
///
/// Text counts as reasoning until the marker appears and as answer after
/// it. A tail that could still grow into the marker or the artifact is held
/// back, so neither ever reaches the output. When the marker never appears
/// everything streamed is reasoning, while [`ResponseSplitter::split`] on the
/// full text calls it the answer.
pub struct StreamSplit<'s> {
    splitter: &'s ResponseSplitter,
    pending: String,
    past_marker: bool,
}

impl StreamSplit<'_> {
    pub fn push(&mut self, text: &str) -> Vec<SplitFragment> {
        self.pending.push_str(text);
        let mut out = Vec::new();

        let marker = self.splitter.marker.as_str();
        if !self.past_marker && !marker.is_empty() {
            if let Some(at) = self.pending.find(marker) {
                let answer = self.pending.split_off(at + marker.len());
                self.pending.truncate(at);
                let reasoning = std::mem::replace(&mut self.pending, answer);
                out.extend(self.label(&reasoning));
                self.past_marker = true;
            }
        }

        self.pending = self.splitter.strip(&self.pending);
        let mut watched = vec![self.splitter.artifact.as_str()];
        if !self.past_marker {
            watched.push(marker);
        }
        let ready_end = self.pending.len() - partial_match_len(&self.pending, watched);
        let held = self.pending.split_off(ready_end);
        let ready = std::mem::replace(&mut self.pending, held);
        out.extend(self.label(&ready));
        out
    }

    /// Whatever was still held back once the stream has ended.
    pub fn finish(mut self) -> Option<SplitFragment> {
        let rest = std::mem::take(&mut self.pending);
        self.label(&self.splitter.strip(&rest))
    }

    fn label(&self, text: &str) -> Option<SplitFragment> {
        if text.is_empty() {
            None
        } else if self.past_marker {
            Some(SplitFragment::Answer(text.to_string()))
        } else {
            Some(SplitFragment::Reasoning(text.to_string()))
        }
    }
}

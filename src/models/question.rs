//! Interview question model.

use serde::{Deserialize, Serialize};

/// Which input list a question came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionSource {
    /// Job-specific prompts.
    Primary,
    /// Supplementary prompts such as culture-fit probes.
    Secondary,
}

/// One prompt in the merged, ordered sequence. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Question {
    /// Prompt text.
    pub text: String,
    /// Zero-based position in the merged sequence.
    pub sequence_index: u32,
    /// Origin list.
    pub source_set: QuestionSource,
}

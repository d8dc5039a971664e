//! Vision chat analysis: the boundary to the remote model.
//!
//! The pipeline depends only on the [`AnalysisClient`] trait;
//! [`OpenRouterClient`] is the HTTP implementation.

mod openrouter;
pub mod prompts;
mod transcript;

pub use openrouter::{classify_status, parse_completion, OpenRouterClient};
pub use transcript::{ConversationTurn, Origin, Transcript};

use crate::encode::EncodedImage;
use async_trait::async_trait;

/// Every failure is terminal for the call that produced it. Nothing here
/// retries; a resend by the user is a new call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("API key missing or rejected. Add a valid key in settings.")]
    Unauthenticated,

    #[error("Could not reach the analysis service: {0}")]
    Unreachable(String),

    #[error("The analysis service sent an unexpected response: {0}")]
    Malformed(String),

    #[error("Analysis failed: {0}")]
    Unknown(String),
}

#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Describes the image, or answers `question` about it.
    async fn analyze(
        &self,
        image: EncodedImage,
        question: Option<&str>,
    ) -> Result<String, AnalysisError>;

    /// Replies to the transcript, replayed in order.
    async fn continue_chat(&self, transcript: &[ConversationTurn])
        -> Result<String, AnalysisError>;
}

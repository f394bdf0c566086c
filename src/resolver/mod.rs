//! Link resolution for files selected from a shared listing.
//!
//! The queue only depends on the object-safe [`LinkResolver`] trait; the
//! production implementation is [`ShareApiResolver`], which asks the share
//! API for a direct download link.

use async_trait::async_trait;
use thiserror::Error;

use crate::item::ResolutionParams;

mod share_api;

pub use share_api::ShareApiResolver;

/// Fallback message for rejections that carry no reason.
const DEFAULT_REJECTION_MESSAGE: &str = "Link resolution failed";

/// Errors that can occur while resolving a download link.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The resolver answered but declined to produce a link.
    #[error("link resolution rejected: {reason}")]
    Rejected {
        /// Server-provided reason, or a default when none was supplied.
        reason: String,
    },

    /// The resolver endpoint could not be reached or answered garbage.
    #[error("link resolver transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The resolver answered successfully but the payload was not usable.
    #[error("unexpected link resolver response: {reason}")]
    InvalidResponse {
        /// What was wrong with the payload.
        reason: String,
    },
}

impl ResolveError {
    /// Creates a `Rejected` error, falling back to a default message.
    #[must_use]
    pub fn rejected(reason: Option<String>) -> Self {
        Self::Rejected {
            reason: reason.unwrap_or_else(|| DEFAULT_REJECTION_MESSAGE.to_string()),
        }
    }

    /// Creates an `InvalidResponse` error.
    #[must_use]
    pub fn invalid_response(reason: &str) -> Self {
        Self::InvalidResponse {
            reason: reason.to_string(),
        }
    }

    /// Returns the message to surface on a failed queue item.
    ///
    /// Rejections surface the server reason verbatim; other errors surface
    /// their full description.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// A successfully resolved download link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
    /// Direct download URL to hand to the engine.
    pub url: String,
}

impl ResolvedLink {
    /// Creates a resolved link.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Resolves selection parameters into a direct download link.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Resolves one file's parameters into a downloadable URL.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Rejected`] when the share API declines the
    /// request, [`ResolveError::Transport`] when it cannot be reached, and
    /// [`ResolveError::InvalidResponse`] when its answer is unusable.
    async fn resolve(&self, params: &ResolutionParams) -> Result<ResolvedLink, ResolveError>;
}

//! # DomainError
//!
//! Centralized error handling for the admission pipeline.
//! Every check either passes or fails with exactly one of these variants.

use thiserror::Error;

/// The primary error type for all admission and moderation operations.
#[derive(Error, Debug)]
pub enum DomainError {
    /// Malformed IP or CIDR input. Rejects the single request only.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Removal of a ban, blacklist or hash that does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The named limiter has no attempts left for this key.
    #[error("too many attempts ({limiter}), try again later")]
    RateLimited { limiter: &'static str },

    #[error("{ip} is banned")]
    Banned { ip: String },

    #[error("{ip} is blacklisted on {list}")]
    Blacklisted { ip: String, list: String },

    /// The submitted image is a near-duplicate of a banned one.
    #[error("image is banned (distance {distance})")]
    ImageBanned { distance: u32 },

    /// The upload could not be decoded into an image. Fails closed.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Infrastructure failure from a storage collaborator.
    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl DomainError {
    /// True for deny-the-request outcomes, false for faults and bad admin input.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Banned { .. }
                | Self::Blacklisted { .. }
                | Self::ImageBanned { .. }
                | Self::InvalidAddress(_)
                | Self::InvalidImage(_)
        )
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "invalid_address",
            Self::NotFound { .. } => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::Banned { .. } => "banned",
            Self::Blacklisted { .. } => "blacklisted",
            Self::ImageBanned { .. } => "image_banned",
            Self::InvalidImage(_) => "invalid_image",
            Self::Storage(_) => "storage",
        }
    }
}

/// A specialized Result type for admission logic.
pub type Result<T> = std::result::Result<T, DomainError>;

//! # Doctalk Core
//!
//! Core library for Doctalk - streaming document question answering.
//!
//! This crate provides:
//! - Configuration management
//! - Streaming chat turn session (client side of the answer stream)
//! - Inline citation extraction and grouping
//! - Tiered usage limit checks
//! - Shared data models
//!
//! Persistence, authentication, billing, and answer generation are
//! external collaborators; this crate only defines the wire contract
//! and control flow between them.

pub mod citations;
pub mod config;
pub mod limits;
pub mod model;
pub mod session;

pub use citations::{
    group_citations_by_document, parse_inline_citations, remove_inline_citations, DocumentSource,
    InlineCitation,
};
pub use config::{Config, ConfigError, LoggingConfig, ServiceConfig};
pub use limits::{
    approaching_limit, check_limit, check_limit_one, format_bytes, usage_percent, LimitCheckResult,
    LimitErrorCode, LimitMetric, Tier, TierLimits,
};
pub use model::*;
pub use session::{EventLineBuffer, SessionError, TurnPhase, TurnSession};

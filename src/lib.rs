//! Investment Agent Orchestrator
//!
//! A conversational investment advisor that:
//! - Turns banking and trading documents into a validated financial profile
//! - Picks market-cap tiers from the amount to invest
//! - Shortlists and scores instruments from live or simulated market data
//! - Allocates a capped, share-count-aware basket
//! - Enriches a local knowledge store with news in the background
//! - Answers follow-up questions from the session's profile, plan and news
//!
//! PIPELINE:
//! PROFILE → STRATEGY → SHORTLIST → ALLOCATE → ENRICH (background) → INDEX

pub mod agent;
pub mod allocation;
pub mod api;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod gemini;
pub mod index;
pub mod market;
pub mod memory;
pub mod models;
pub mod profile;
pub mod router;
pub mod shortlist;
pub mod state;
pub mod strategy;

pub use error::{AdvisorError, Result};

// Re-export common types
pub use agent::{Advisor, Recommendation};
pub use config::AdvisorConfig;
pub use models::*;
pub use router::{Intent, QueryRouter, TradingTopic};

//! # Novel Lens
//!
//! AI assessments for novel-listing pages.
//!
//! Novel Lens reads a listing page of the host site, resolves every card's
//! raw id to the canonical series id, gathers the most-liked community
//! reviews, and asks Gemini for a structured verdict per novel. Results are
//! cached durably so a novel is analyzed once and shown instantly on every
//! later visit.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────────┐   ┌────────────────┐
//! │ PageSource │──▶│ IdentifierMapper│──▶│ ReviewFetcher  │
//! │ (listing)  │   │ raw → canonical │   │ most liked     │
//! └────────────┘   └─────────────────┘   └───────┬────────┘
//!                                                ▼
//! ┌────────────┐   ┌─────────────────┐   ┌────────────────┐
//! │  Session   │◀──│  Orchestrator   │──▶│ AnalysisClient │
//! │ navigation │   │  batch + cache  │   │ Gemini, retry  │
//! └────────────┘   └────────┬────────┘   └────────────────┘
//!                           ▼
//!                  ┌─────────────────┐
//!                  │ AssessmentCache │
//!                  │  SQLite k/v     │
//!                  └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! nlens init
//! nlens settings set-key
//! nlens analyze https://wtr-lab.com/en/for-you --limit 3
//! nlens show https://wtr-lab.com/en/for-you
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`settings`] | Persisted runtime settings |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite key-value store |
//! | [`cache`] | Durable assessment cache |
//! | [`page`] | Page source and card scraping |
//! | [`mapper`] | Raw → canonical identifier map |
//! | [`reviews`] | Review fetching |
//! | [`gemini`] | Analysis client with retry |
//! | [`orchestrator`] | Batch analysis flow |
//! | [`session`] | View refresh and passive display |
//! | [`navigation`] | Route-change sources |
//! | [`traits`] | Presentation contracts |
//! | [`render`] | Terminal and recording presenters |
//! | [`commands`] | CLI command handlers |

pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod gemini;
pub mod mapper;
pub mod migrate;
pub mod navigation;
pub mod orchestrator;
pub mod page;
pub mod render;
pub mod reviews;
pub mod session;
pub mod settings;
pub mod sqlite_store;
pub mod traits;

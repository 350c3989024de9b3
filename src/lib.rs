//! # Gazette Harvest
//!
//! Monthly harvester for official municipal gazettes.
//!
//! Each run searches the municipal portal for the previous month's
//! publications, uploads every document to a public file host, and records
//! the resulting URL with its publication date through the Query Service,
//! which owns an idempotent SQLite store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐   ┌──────────┐
//! │   Portal    │──▶│ Worker pool  │──▶│ Query Service │──▶│  SQLite  │
//! │ (discovery) │   │ upload+create│   │  (HTTP/JSON)  │   │ gazettes │
//! └─────────────┘   └──────┬───────┘   └───────────────┘   └──────────┘
//!                          ▼
//!                    ┌───────────┐
//!                    │ File host │
//!                    └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gazette init                  # create database
//! gazette serve                 # start the Query Service
//! gazette run                   # harvest last month
//! gazette list --year 2025 --month 8
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`models`] | Records and request bodies |
//! | [`period`] | Calendar month arithmetic |
//! | [`source`] | Portal discovery and download |
//! | [`blob`] | Public file host upload |
//! | [`store`] | Idempotent SQLite record store |
//! | [`server`] | Query Service HTTP API |
//! | [`api_client`] | Query Service client |
//! | [`pipeline`] | Orchestrator and batch summary |
//! | [`traits`] | Collaborator seams |

pub mod api_client;
pub mod blob;
pub mod config;
pub mod db;
pub mod errors;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod period;
pub mod pipeline;
pub mod server;
pub mod source;
pub mod store;
pub mod traits;

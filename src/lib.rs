//! # codejson-harvester
//!
//! An adaptive harvesting engine for source-code inventories.
//!
//! For every configured scan target (a GitHub organization, a GitLab group,
//! an Azure DevOps project) the harvester lists repositories through a
//! connector, reuses cached records whose last commit has not changed,
//! fetches and analyzes the rest under pacing and retry, and writes a
//! per-target intermediate snapshot. A merge step folds all snapshots into
//! one deduplicated `code.json` catalog plus audit side-files.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────────┐   ┌─────────────────────┐
//! │ Connectors │──▶│ Target runner  │──▶│ intermediate_*.json │
//! │ manifest / │   │ + orchestrator │   └──────────┬──────────┘
//! │ http       │   └───────┬────────┘              │
//! └────────────┘           │                       ▼
//!                          ▼                 ┌──────────┐
//!                  Paced + Retrying          │  merge   │──▶ code.json
//!                  remote calls              └──────────┘    + side-files
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harvest sources                 # check connectors and targets
//! harvest scan                    # run every target
//! harvest scan --target github:CDCgov --limit 50
//! harvest merge                   # build code.json
//! harvest stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Remote and target error taxonomy |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`traits`] | `Connector` / `Analyzer` traits and the registry |
//! | [`connector_manifest`] | Offline JSON inventory connector |
//! | [`connector_http`] | JSON inventory service connector |
//! | [`analyzer`] | Rule-based exemption and organization inference |
//! | [`remote`] | `Paced` and `Retrying` call decorators |
//! | [`cache`] | File snapshot store and tolerant cache loading |
//! | [`orchestrator`] | Bounded worker pool for one target |
//! | [`runner`] | Target runner and whole-scan driver |
//! | [`merge`] | Catalog merge engine |
//! | [`audit`] | Private-ID map, exemption log, backups |
//! | [`progress`] | Scan progress on stderr |
//! | [`stats`] | Snapshot statistics |
//! | [`sources`] | Connector health listing |
//!
//! Pure logic (data model, delay math, retry schedule, freshness, merge)
//! lives in the `codejson-harvester-core` crate.

pub mod analyzer;
pub mod audit;
pub mod cache;
pub mod config;
pub mod connector_http;
pub mod connector_manifest;
pub mod error;
pub mod logging;
pub mod merge;
pub mod orchestrator;
pub mod progress;
pub mod remote;
pub mod runner;
pub mod sources;
pub mod stats;
pub mod traits;

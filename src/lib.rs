//! # Metadata Harness
//!
//! Fetches discovery metadata for geospatial datasets from remote catalogues
//! and normalizes it into one ISO 19115-shaped record, whatever the wire
//! encoding.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐
//! │  Fetcher   │──▶│  Factory   │──▶│ Extractor  │──▶│ Validator  │
//! │ HTTP+retry │   │ ext/token  │   │ XML/JSON/  │   │ strict or  │
//! │ temp file  │   │  registry  │   │ JSON-LD/TTL│   │  lenient   │
//! └────────────┘   └────────────┘   └────────────┘   └─────┬──────┘
//!                                                          ▼
//!                                              (Dataset, Metadata) pair
//! ```
//!
//! The [`pipeline`] module sequences the stages as a state machine; the
//! `mdh` binary is a thin CLI over it.
//!
//! ## Quick Start
//!
//! ```bash
//! mdh ingest 8f9a1b2c-0000-4000-8000-000000000001 --catalogue ceh
//! mdh ingest abc123 --format xml --strict --json
//! mdh ingest abc123 --data-files --max-files 50
//! mdh batch identifiers.txt --jobs 4
//! mdh extract ./records/
//! mdh catalogues
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and catalogue profiles |
//! | [`error`] | Error taxonomy and exit codes |
//! | [`models`] | Dataset, Metadata, BoundingBox |
//! | [`validation`] | Strict/lenient policy and cross-field checks |
//! | [`extract`] | The four format extractors |
//! | [`factory`] | Extension/token → extractor registry |
//! | [`fetcher`] | Candidate URLs, retry/backoff, temp-file storage |
//! | [`pipeline`] | Fetch → extract → validate state machine |
//! | [`batch`] | Concurrent multi-identifier ingestion |
//! | [`local`] | Offline extraction of files on disk |
//! | [`datafiles`] | Folder listing and archive unpacking for a dataset's files |

pub mod batch;
pub mod config;
pub mod datafiles;
pub mod error;
pub mod extract;
pub mod factory;
pub mod fetcher;
pub mod local;
pub mod models;
pub mod pipeline;
pub mod validation;

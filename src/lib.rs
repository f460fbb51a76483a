//! # starpilot
//!
//! Fetch a GitHub user's starred repositories, embed what they are about,
//! and search them by meaning.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │  GitHub  │──▶│ Normalize │──▶│ JSON cache │──▶│ Prepare  │
//! │ GraphQL  │   │           │   │ (per repo) │   │ documents│
//! └──────────┘   └───────────┘   └────────────┘   └────┬─────┘
//!                                                      ▼
//!                ┌──────────────────┐   ┌──────────────────────┐
//!                │ shoot / fortune- │◀──│ SQLite vector index  │
//!                │ teller/astrologer│   │ (embedding + meta)   │
//!                └──────────────────┘   └──────────────────────┘
//! ```
//!
//! Data flows strictly forward; each stage only reads what the previous
//! stage wrote.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credential lookup |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Repository records, documents, metadata |
//! | [`github`] | Paginated starred-repository fetcher |
//! | [`normalize`] | Raw record → persisted schema |
//! | [`cache`] | One-JSON-file-per-repo snapshot |
//! | [`prepare`] | Cached records → embeddable documents |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Persisted vector index |
//! | [`retriever`] | Similarity, threshold and MMR retrieval |
//! | [`llm`] | Chat-completion backends |
//! | [`search`] | `shoot` command |
//! | [`answer`] | `fortuneteller` command |
//! | [`astrologer`] | Self-querying `astrologer` command |
//! | [`ingest`] | `read` command |
//! | [`setup`] | `setup` command |
//! | [`progress`] | Progress reporting on stderr |
//! | [`db`] | Database connection |
//! | [`migrate`] | Index schema |

pub mod answer;
pub mod astrologer;
pub mod cache;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod github;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod prepare;
pub mod progress;
pub mod retriever;
pub mod search;
pub mod setup;

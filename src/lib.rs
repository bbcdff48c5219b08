//! # Annal
//!
//! An incremental pipeline that turns free-form personal log files into a
//! structured, de-duplicated, year-bucketed event archive, using an LLM
//! extraction engine for the text-to-structure step.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌───────────┐   ┌────────────┐
//! │  Corpus   │──▶│ Classifier │──▶│  Chunker  │──▶│ Work Queue │
//! │ raw notes │   │  manifest  │   │  buckets  │   │ hash-gated │
//! └───────────┘   └────────────┘   └───────────┘   └─────┬──────┘
//!                                                        ▼
//!                 ┌────────────┐   ┌───────────┐   ┌────────────┐
//!                 │ Year files │◀──│ Aggregator│◀──│   Worker   │
//!                 │ YYYY.json  │   │  merge    │   │ LLM extract│
//!                 └────────────┘   └───────────┘   └────────────┘
//! ```
//!
//! Data flows strictly downstream: raw documents → manifest → queue →
//! bucket files + state map → year files. Every stage is independently
//! re-runnable and idempotent; re-running a stage with unchanged inputs
//! produces no new work.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | JSON persistence with atomic writes |
//! | [`corpus`] | Raw document discovery |
//! | [`classify`] | Document classification into the manifest |
//! | [`chunker`] | Date-bucketed chunking |
//! | [`queue`] | Hash-gated work queue |
//! | [`engine`] | Extraction engine backends |
//! | [`reply`] | Tolerant engine-reply parsing |
//! | [`worker`] | Extraction, de-duplication, bucket writes |
//! | [`aggregate`] | Year-file consolidation |
//! | [`gate`] | Politeness gate for shared hosts |
//! | [`status`] | Status snapshot for dashboards |

pub mod aggregate;
pub mod chunker;
pub mod classify;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod gate;
pub mod models;
pub mod queue;
pub mod reply;
pub mod status;
pub mod store;
pub mod worker;

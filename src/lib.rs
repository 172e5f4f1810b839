//! # PB Catalog
//!
//! A versioned ingestion pipeline and catalog for participatory-budgeting
//! datasets.
//!
//! PB Catalog parses the semicolon-delimited PB file format (META,
//! PROJECTS, VOTES sections) into derived catalog tiles, and maintains a
//! multi-version store with exactly one current version per dataset
//! identity. Superseded files move into timestamped archives; read-side
//! caches invalidate through a single refresh signature.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────┐
//! │ .pb file  │──▶│   Parser    │──▶│ Tile        │──▶│ Ingestion │
//! │ (META/    │   │ (sections,  │   │ Deriver     │   │ +Version- │
//! │ PROJECTS/ │   │  headers)   │   │ (+comments, │   │  ing      │
//! │ VOTES)    │   └─────────────┘   │  identity)  │   └────┬─────┘
//! └───────────┘                     └────────────┘        │
//!                                          ┌──────────────┤
//!                                          ▼              ▼
//!                                    ┌──────────┐   ┌───────────┐
//!                                    │  SQLite   │   │ canonical │
//!                                    │ versions  │   │ + archive │
//!                                    │ +signal   │   │   store   │
//!                                    └──────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pbcat init                          # create database
//! pbcat check city_2024.pb            # validate without persisting
//! pbcat ingest city_2024.pb           # ingest (conflict-checked)
//! pbcat ingest city_2024.pb --confirm # supersede the current version
//! pbcat refresh --full                # batch-sweep the store
//! pbcat list                          # current catalog
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`parser`] | Line-record parser for the PB format |
//! | [`comments`] | `#n:` marker comment extraction |
//! | [`tile`] | Tile derivation (facets, quality, k-bounds labels) |
//! | [`identity`] | Dataset identity and bounded group key |
//! | [`store`] | Canonical file store and archive layout |
//! | [`ingest`] | Interactive ingestion and versioning |
//! | [`refresh`] | Batch refresh and invariant repair |
//! | [`signal`] | Refresh signature and signed caches |
//! | [`tiles`] | Read-side catalog tiles |
//! | [`stats`] | Statistics and comment aggregation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod check;
pub mod comments;
pub mod config;
pub mod db;
pub mod format;
pub mod identity;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod refresh;
pub mod signal;
pub mod stats;
pub mod store;
pub mod tile;
pub mod tiles;

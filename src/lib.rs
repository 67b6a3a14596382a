//! # Product Recon
//!
//! A product reconciliation engine for vendor quotes and marketplace listings.
//!
//! Product Recon matches incoming product references (part numbers, free-text
//! descriptions, marketplace identifiers, listing URLs) against an internal
//! supplier catalog, dispatches asynchronous lookups to an external worker for
//! affiliate link resolution and product search, and serves ranked results via
//! a CLI and an HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Imports  │──▶│   Catalog    │◀──│  Callbacks  │
//! │  (quotes) │   │   (SQLite)   │   │  (worker)   │
//! └───────────┘   └──────┬───────┘   └──────▲──────┘
//!                        │                  │
//!                 ┌──────▼───────┐   ┌──────┴──────┐
//!                 │ Match chain  │──▶│   Lookup    │
//!                 │ + waterfall  │   │ coordinator │
//!                 └──────┬───────┘   └─────────────┘
//!                        │
//!             ┌──────────┴─────────┐
//!             ▼                    ▼
//!        ┌─────────┐         ┌─────────┐
//!        │   CLI   │         │  HTTP   │
//!        │ (recon) │         │  (API)  │
//!        └─────────┘         └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! recon init                            # create database
//! recon import catalog.json            # load manufacturers, products, quotes
//! recon reconcile --part-number CF248A  # rank matches for a part number
//! recon match-quote <quote-id>          # match every line of a quote
//! recon serve                           # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`normalize`] | Identifier and text normalization |
//! | [`extract`] | Part number and marketplace id extraction |
//! | [`similarity`] | Word-overlap text similarity |
//! | [`matching`] | The internal match chain |
//! | [`reconcile`] | Request orchestration and result ranking |
//! | [`lookup`] | External lookup lifecycle (dispatch, callbacks, polling) |
//! | [`worker`] | HTTP client for the external worker |
//! | [`ingest`] | JSON catalog and quote imports |
//! | [`server`] | HTTP API server |
//! | [`store`] | Catalog persistence |
//! | [`cache`] | Short-lived lookup state |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod config;
pub mod db;
pub mod extract;
pub mod ingest;
pub mod lookup;
pub mod matching;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod server;
pub mod similarity;
pub mod stats;
pub mod store;
pub mod worker;

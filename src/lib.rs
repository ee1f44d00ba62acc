//! # sectbattle
//!
//! An embeddable, single-threaded, crash-recoverable state engine for a
//! territorial battle shared by up to eight sects over a fixed grid.
//! Clients join a sect, move across a 10x10 battlefield, contest fields
//! held by rival sects, and report fight outcomes back to the server —
//! this crate is the authoritative state machine behind that loop, not
//! the transport or matchmaking logic in front of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         Engine                            │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────┐                │
//! │  │  Fields   │ │   Sects   │ │Combatants │  (battlefield)  │
//! │  └─────┬─────┘ └─────┬─────┘ └─────┬─────┘                │
//! │        │ rebuilt from│              │                      │
//! │  ┌─────▼─────────────▼──────────────▼─────┐                │
//! │  │  owner_map / combatant_map / opponent_map│  (persist)   │
//! │  │        memory-mapped, CRC32-checked       │             │
//! │  └──────────────────┬────────────────────────┘             │
//! │                     │ snapshot bytes                        │
//! │              ┌──────▼───────┐                               │
//! │              │ backup::routine │ ── kv::RemoteKv ──► remote │
//! │              └──────────────┘                               │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`geometry`] | Grid positions, directions, and cell/sect enumerations |
//! | [`battlefield`] | Fields, sects, combatants, and opponent sampling |
//! | [`persist`] | Memory-mapped, CRC32-checked ordered maps |
//! | [`engine`] | The state machine: open, handle requests, reset seasons |
//! | [`wire`] | Typed request/response boundary a transport decodes into |
//! | [`kv`] | The narrow remote key-value trait backup/restore ship through |
//! | [`backup`] | Shipping the persistence maps to a remote store and back |
//! | [`season`] | Deciding when the battlefield's season has turned over |
//! | [`admin`] | Read/write operator surface (status, force-backup, evict) |
//! | [`config`] | `ServerConfig` loaded from a small key/value file |
//! | [`cli`] | Startup flags a `main.rs` binds to an argv parser |
//! | [`lockfile`] | Single-instance-per-data-directory advisory lock |
//! | [`encoding`] | Deterministic binary encoding every persisted type uses |
//!
//! ## Key properties
//!
//! - **Single-threaded, no internal locking** — [`engine::Engine::handle`]
//!   takes `&mut self`; an embedder serializes concurrent transport
//!   connections onto one engine itself.
//! - **Crash-recoverable by construction** — every mutation that matters
//!   is written through a [`persist::OrderedMap`] before the in-memory
//!   state is considered final; [`engine::Engine::open`] rebuilds every
//!   runtime structure from the maps on restart.
//! - **Deterministic wire format** — [`encoding`] never changes shape
//!   because of a dependency upgrade, so a persisted map from one build
//!   is readable by the next.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sectbattle::engine::{Engine, EngineConfig};
//! use sectbattle::wire::{Request, Response};
//!
//! let config = EngineConfig {
//!     data_dir: "/tmp/sectbattle-data".into(),
//!     ..EngineConfig::default()
//! };
//! let mut engine = Engine::open(config).unwrap();
//!
//! let response = engine.handle(Request::Join { uin: 1001, level: 10 }).unwrap();
//! if let Response::Join { code, sect, .. } = response {
//!     assert!(code.is_ok());
//!     println!("joined {sect:?}");
//! }
//!
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod admin;
pub mod backup;
pub mod battlefield;
pub mod cli;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod geometry;
pub mod kv;
pub mod lockfile;
pub mod persist;
pub mod season;
pub mod wire;

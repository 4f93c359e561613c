//! # entgraph
//!
//! Entity-graph query and mutation engine over relational databases.
//!
//! Entities are described once by an [`schema::EntitySchema`] (table,
//! typed fields, edges to other entities) and mapped to Rust structs through
//! the [`Entity`] trait. A [`Client`] then offers, per entity:
//!
//! - composable predicates and a lazy [`Query`] builder with ordering,
//!   paging, row locks, edge traversal and projections;
//! - eager loading of any edge with one extra query per edge, never one per
//!   row;
//! - create, bulk create, update, delete and upsert builders with schema
//!   validation;
//! - mutation hooks and query interceptors registered on the client;
//! - transactions ([`Tx`]) that hand out a client bound to the transaction;
//! - offset pagination with accurate totals ([`Page`], [`PageResult`]).
//!
//! Everything runs synchronously and takes a [`Context`] carrying
//! cancellation and an optional deadline. SQLite (default feature) and
//! PostgreSQL (`postgres` feature) drivers are bundled; any other store can
//! implement [`driver::Driver`].
//!
//! ```no_run
//! use entgraph::{Client, Context, EngineConfig};
//!
//! # fn main() -> entgraph::Result<()> {
//! let config = EngineConfig::load()?;
//! let client = Client::open(&config)?;
//! let ctx = Context::background();
//! let tx = client.tx(&ctx)?;
//! // ... build queries and mutations on `tx` ...
//! tx.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod driver;
pub mod entity;
pub mod error;
pub mod hook;
pub mod intercept;
pub mod metrics;
pub mod mutation;
pub mod predicate;
pub mod query;
pub mod schema;
pub mod sql;
pub mod tx;
pub mod value;

pub use client::{Client, ClientBuilder, EntityClient};
pub use config::EngineConfig;
pub use context::{CancelHandle, Context};
pub use entity::{Edges, Entity};
pub use error::{Error, Result};
pub use query::{Page, PageResult, Query};
pub use tx::Tx;
pub use value::{FromValue, Row, Value, ValueMap};

//! The client: driver, hooks, interceptors and options in one handle.
//!
//! A [`Client`] is cheap to clone and shared across threads. Builders are
//! obtained per entity type through [`Client::entity`]; each builder keeps a
//! clone of the client, so hooks and interceptors registered at
//! construction apply to every operation.
//!
//! ```no_run
//! use entgraph::{Client, EngineConfig};
//!
//! # fn main() -> entgraph::Result<()> {
//! let config = EngineConfig::load()?;
//! let client = Client::open(&config)?;
//! # let _ = client;
//! # Ok(())
//! # }
//! ```

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::context::Context;
use crate::driver::{DebugDriver, Dialect, Driver};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::hook::{self, Hook};
use crate::intercept::{self, Interceptor};
use crate::mutation::{
    Create, CreateBulk, Delete, DeleteOne, Executor, Mutation, MutationOutput, Update, UpdateOne,
};
use crate::predicate as p;
use crate::query::{Page, PageResult, Query, QuerySpec};
use crate::tx::Tx;
use crate::value::{Row, Value};

#[derive(Debug, Clone, Copy, Default)]
struct Options {
    debug: bool,
    query_timeout: Option<Duration>,
}

/// Entry point for all queries and mutations.
#[derive(Clone)]
pub struct Client {
    driver: Arc<dyn Driver>,
    hooks: Arc<[Hook]>,
    interceptors: Arc<[Interceptor]>,
    options: Options,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("dialect", &self.driver.dialect())
            .field("in_tx", &self.driver.in_tx())
            .field("hooks", &self.hooks.len())
            .field("interceptors", &self.interceptors.len())
            .field("options", &self.options)
            .finish()
    }
}

/// Builds a [`Client`]; hooks and interceptors run in registration order.
pub struct ClientBuilder {
    driver: Arc<dyn Driver>,
    hooks: Vec<Hook>,
    interceptors: Vec<Interceptor>,
    options: Options,
}

impl ClientBuilder {
    pub fn hook(mut self, hook: Hook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn intercept(mut self, interceptor: Interceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Log every statement at debug level under `entgraph::sql`.
    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    /// Deadline for operations whose context has none.
    pub fn query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.query_timeout = timeout;
        self
    }

    pub fn build(self) -> Client {
        let driver: Arc<dyn Driver> = if self.options.debug {
            Arc::new(DebugDriver::new(self.driver))
        } else {
            self.driver
        };
        Client {
            driver,
            hooks: self.hooks.into(),
            interceptors: self.interceptors.into(),
            options: self.options,
        }
    }
}

impl Client {
    /// Client over `driver` with no hooks or interceptors.
    pub fn new(driver: impl Driver + 'static) -> Self {
        Self::from_driver(Arc::new(driver))
    }

    pub fn from_driver(driver: Arc<dyn Driver>) -> Self {
        Self::builder(driver).build()
    }

    pub fn builder(driver: Arc<dyn Driver>) -> ClientBuilder {
        ClientBuilder {
            driver,
            hooks: Vec::new(),
            interceptors: Vec::new(),
            options: Options::default(),
        }
    }

    /// Connect the driver named by `config.url` and apply the options.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let driver = open_driver(&config.url)?;
        log::info!(
            target: "entgraph::client",
            "opened {} driver (debug: {})",
            driver.dialect(),
            config.debug
        );
        Ok(Self::builder(driver)
            .debug(config.debug)
            .query_timeout(config.query_timeout())
            .build())
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    /// The client is bound to an open transaction.
    pub fn in_tx(&self) -> bool {
        self.driver.in_tx()
    }

    /// Same hooks, interceptors and options over another driver.
    fn with_driver(&self, driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            hooks: Arc::clone(&self.hooks),
            interceptors: Arc::clone(&self.interceptors),
            options: self.options,
        }
    }

    /// Builders for entity `E`.
    pub fn entity<E: Entity>(&self) -> EntityClient<E> {
        EntityClient {
            client: self.clone(),
            _entity: PhantomData,
        }
    }

    pub fn query<E: Entity>(&self) -> Query<E> {
        Query::new(self.clone())
    }

    /// Targets of `edge` for one loaded entity, as a query.
    pub fn query_edge_of<E: Entity, T: Entity>(&self, entity: &E, edge: &'static str) -> Query<T> {
        self.query::<E>()
            .filter(p::id_eq(entity.id()))
            .query_edge::<T>(edge)
    }

    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Fails when the client is already bound to a transaction.
    pub fn tx(&self, ctx: &Context) -> Result<Tx> {
        if self.in_tx() {
            return Err(Error::Other("cannot start a transaction within a transaction".into()));
        }
        let ctx = self.context(ctx);
        let tx = self.driver.begin(&ctx)?;
        let client = self.with_driver(Arc::clone(&tx).as_driver());
        Ok(Tx::new(client, tx))
    }

    /// Run `f` in a transaction, committing on success and rolling back on
    /// error.
    pub fn with_tx<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&Tx) -> Result<T>,
    {
        let tx = self.tx(ctx)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    log::warn!(target: "entgraph::tx", "rollback after \"{err}\" failed: {rollback}");
                }
                Err(err)
            }
        }
    }

    /// `ctx`, with the default timeout applied when it has no deadline.
    pub(crate) fn context(&self, ctx: &Context) -> Context {
        match self.options.query_timeout {
            Some(timeout) if ctx.deadline().is_none() => ctx.with_timeout(timeout),
            _ => ctx.clone(),
        }
    }

    pub(crate) fn run_query(&self, ctx: &Context, spec: &mut QuerySpec) -> Result<Vec<Row>> {
        intercept::run(&self.interceptors, &self.driver, ctx, spec)
    }

    pub(crate) fn mutate(&self, ctx: &Context, m: &mut Mutation) -> Result<MutationOutput> {
        let terminal = Arc::new(Executor {
            driver: Arc::clone(&self.driver),
        });
        hook::chain(&self.hooks, m, terminal).mutate(ctx, m)
    }

    pub(crate) fn hooks(&self) -> &[Hook] {
        &self.hooks
    }
}

fn open_driver(url: &str) -> Result<Arc<dyn Driver>> {
    let parsed = url::Url::parse(url)
        .map_err(|e| Error::Other(format!("invalid driver url {url:?}: {e}")))?;
    match parsed.scheme() {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            use crate::driver::sqlite::SqliteDriver;
            let path = parsed.path();
            let driver = if path.is_empty() || path == ":memory:" || path == "memory" {
                SqliteDriver::in_memory()?
            } else {
                SqliteDriver::open(path)?
            };
            Ok(Arc::new(driver))
        }
        #[cfg(feature = "postgres")]
        "postgres" | "postgresql" => {
            use crate::driver::postgres::PostgresDriver;
            Ok(Arc::new(PostgresDriver::connect(url)?))
        }
        scheme => Err(Error::Other(format!(
            "no driver for scheme {scheme:?} (is the feature enabled?)"
        ))),
    }
}

/// Typed builders for one entity type.
pub struct EntityClient<E> {
    client: Client,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for EntityClient<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> EntityClient<E> {
    pub fn query(&self) -> Query<E> {
        Query::new(self.client.clone())
    }

    pub fn create(&self) -> Create<E> {
        Create::new(self.client.clone())
    }

    /// Insert many rows with one statement.
    pub fn create_bulk(&self, builders: Vec<Create<E>>) -> CreateBulk<E> {
        CreateBulk::new(self.client.clone(), builders)
    }

    pub fn update(&self) -> Update<E> {
        Update::new(self.client.clone())
    }

    pub fn update_one(&self, entity: &E) -> UpdateOne<E> {
        UpdateOne::new(self.client.clone(), entity.id())
    }

    pub fn update_one_id(&self, id: impl Into<Value>) -> UpdateOne<E> {
        UpdateOne::new(self.client.clone(), id.into())
    }

    pub fn delete(&self) -> Delete<E> {
        Delete::new(self.client.clone())
    }

    pub fn delete_one(&self, entity: &E) -> DeleteOne<E> {
        DeleteOne::new(self.client.clone(), entity.id())
    }

    pub fn delete_one_id(&self, id: impl Into<Value>) -> DeleteOne<E> {
        DeleteOne::new(self.client.clone(), id.into())
    }

    /// Entity by id, [`Error::NotFound`] when absent.
    pub fn get(&self, ctx: &Context, id: impl Into<Value>) -> Result<E> {
        self.query().filter(p::id_eq(id)).only(ctx)
    }

    pub fn get_x(&self, ctx: &Context, id: impl Into<Value>) -> E {
        self.get(ctx, id).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn paginate(&self, ctx: &Context, page: Page) -> Result<PageResult<E>> {
        self.query().paginate(ctx, page)
    }

    /// Targets of `edge` for `entity`.
    pub fn query_edge<T: Entity>(&self, entity: &E, edge: &'static str) -> Query<T> {
        self.client.query_edge_of::<E, T>(entity, edge)
    }
}

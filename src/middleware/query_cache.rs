//! Per-exchange query caching.

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::stack::Interceptor;

const SNAPSHOT: &str = "strata.query_cache.snapshot";

/// The database connection side of [`QueryCache`].
///
/// Implementations are shared by concurrent exchanges and synchronize
/// internally.
pub trait QueryCacheConnection: Send + Sync + 'static {
    type Id: Clone + Send + Sync + 'static;

    fn enable_cache(&self);
    fn disable_cache(&self);
    fn clear_cache(&self);
    fn is_enabled(&self) -> bool;
    fn connection_id(&self) -> Self::Id;
    fn set_connection_id(&self, id: Self::Id);
}

struct Snapshot<Id> {
    was_enabled: bool,
    connection_id: Id,
}

/// Turns the query cache on for the duration of an exchange.
///
/// At the end of the exchange the connection identity is restored, the
/// cache is cleared, and it is switched off again unless it was already on
/// when the exchange started.
pub struct QueryCache<C> {
    connection: C,
}

impl<C: QueryCacheConnection> QueryCache<C> {
    pub fn new(connection: C) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }
}

impl<C: QueryCacheConnection> Interceptor for QueryCache<C> {
    fn on_start(&self, req: &mut Request, _res: &mut Response) -> Result<(), Error> {
        let snapshot = Snapshot {
            was_enabled: self.connection.is_enabled(),
            connection_id: self.connection.connection_id(),
        };
        req.env_mut().insert(SNAPSHOT, snapshot);
        self.connection.enable_cache();
        Ok(())
    }

    fn on_finish(&self, req: &mut Request, _res: &mut Response) -> Result<(), Error> {
        let Some(snapshot) = req.env_mut().remove::<Snapshot<C::Id>>(SNAPSHOT) else {
            return Ok(());
        };
        self.connection.set_connection_id(snapshot.connection_id);
        self.connection.clear_cache();
        if !snapshot.was_enabled {
            self.connection.disable_cache();
        }
        Ok(())
    }
}

use super::connection::OraConnection;
use crate::error::Result;
use crate::native::NativeDriver;
use crate::pool::{ConnectionPoolManager, PoolOptions};
use std::sync::Arc;

/// Entry point: owns the pool registry every connection it creates draws from.
///
/// Connections keep the registry alive, so dropping the environment does not
/// close pools still in use.
pub struct OraEnvironment {
    pools: Arc<ConnectionPoolManager>,
}

impl OraEnvironment {
    pub fn new(driver: Arc<dyn NativeDriver>) -> Self {
        Self::with_pool_options(driver, PoolOptions::default())
    }

    pub fn with_pool_options(driver: Arc<dyn NativeDriver>, options: PoolOptions) -> Self {
        Self {
            pools: Arc::new(ConnectionPoolManager::new(driver, options)),
        }
    }

    pub fn pools(&self) -> &Arc<ConnectionPoolManager> {
        &self.pools
    }

    /// A closed connection for `connection_string`. The string is parsed and
    /// validated here; no session is opened.
    pub fn create_connection(&self, connection_string: &str) -> Result<OraConnection> {
        OraConnection::new(Arc::clone(&self.pools), connection_string)
    }

    /// Disposes every pool. Connections opened afterwards fail.
    pub fn shutdown(&self) {
        self.pools.shutdown();
    }
}

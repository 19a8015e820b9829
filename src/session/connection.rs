// Connection
//
// Entry point for calling applications. A connection owns its configuration,
// the job-service collaborator, the credential and the session registry that
// every statement's executors register with.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use log::info;
use parking_lot::RwLock;

use crate::backend::{Credential, JobService};
use crate::config::{validate_labels, ConfigResult, ConnectionConfig, Labels};
use crate::query::{QueryError, QueryResult};
use crate::session::registry::SessionRegistry;
use crate::session::statement::Statement;

pub(crate) struct ConnectionShared {
    pub(crate) config: RwLock<ConnectionConfig>,
    pub(crate) service: Arc<dyn JobService>,
    pub(crate) credential: Credential,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) closed: AtomicBool,
}

impl ConnectionShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl Connection {
    /// Open a connection after validating `config`
    pub fn open(config: ConnectionConfig, service: Arc<dyn JobService>, credential: Credential) -> ConfigResult<Self> {
        config.validate()?;
        info!(
            "[SESSION] Opening connection to project {} (location {:?})",
            config.project_id, config.location
        );
        Ok(Connection {
            shared: Arc::new(ConnectionShared {
                config: RwLock::new(config),
                service,
                credential,
                registry: Arc::new(SessionRegistry::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn create_statement(&self) -> QueryResult<Statement> {
        if self.is_closed() {
            return Err(QueryError::Closed);
        }
        Ok(Statement::new(Arc::clone(&self.shared)))
    }

    /// Current configuration
    pub fn config(&self) -> ConnectionConfig {
        self.shared.config.read().clone()
    }

    /// Connection-level labels applied to every query
    pub fn labels(&self) -> Labels {
        self.shared.config.read().labels.clone()
    }

    pub fn set_labels(&self, labels: Labels) -> ConfigResult<()> {
        validate_labels(&labels)?;
        self.shared.config.write().labels = labels;
        Ok(())
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.shared.registry)
    }

    pub fn running_query_count(&self) -> usize {
        self.shared.registry.running_query_count()
    }

    /// Cancel every running query of this connection
    pub fn cancel_all(&self) -> usize {
        self.shared.registry.cancel_all()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Cancel running queries and refuse new statements; idempotent
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancelled = self.shared.registry.cancel_all();
        info!("[SESSION] Connection closed, {} running queries cancelled", cancelled);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

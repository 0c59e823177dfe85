//! Service wiring: the ledger, upstream adapters, workflow and reconciler
//! built from configuration.

use std::path::Path;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::conversation::{self, Workflow};
use crate::error::Result;
use crate::events::Reconciler;
use crate::routes::AppState;
use crate::scheduler::{self, ActionQueue, ActionReceiver};
use crate::store::{Database, LibSqlBackend, Lookup};
use crate::upstream::{ChatPlatform, DigisacClient, Directory, HttpDirectory};

/// Everything the server needs, before background tasks start.
pub struct Services {
    pub db: Arc<dyn Database>,
    pub workflow: Arc<Workflow>,
    pub reconciler: Arc<Reconciler>,
    pub queue: ActionQueue,
    receiver: ActionReceiver,
}

impl Services {
    /// Open the database and the HTTP clients described by `config`.
    pub async fn build(config: &AppConfig) -> Result<Self> {
        let db: Arc<dyn Database> =
            Arc::new(LibSqlBackend::new_local(Path::new(&config.db_path)).await?);
        let chat = Arc::new(DigisacClient::new(config.chat.clone())?);
        let directory = Arc::new(HttpDirectory::new(&config.directory_url, config.chat.timeout)?);
        if config.ops_channel_id.is_none() {
            tracing::warn!("OPS_GROUP_ID not set, transfer alerts and audit reports are disabled");
        }
        Ok(Self::wire(db, chat, directory, config))
    }

    /// Wire already-built adapters.
    pub fn wire(
        db: Arc<dyn Database>,
        chat: Arc<dyn ChatPlatform>,
        directory: Arc<dyn Directory>,
        config: &AppConfig,
    ) -> Self {
        let lookup = Lookup::new(Arc::clone(&db), config.lookup, config.ticket_poll);
        let (queue, receiver) = ActionQueue::channel();
        let workflow = Arc::new(Workflow::new(
            lookup.clone(),
            chat.clone(),
            directory.clone(),
            queue.clone(),
            config.ops_channel_id.clone(),
            config.utc_offset,
        ));
        let reconciler = Arc::new(Reconciler::new(
            lookup,
            chat,
            directory,
            queue.clone(),
            config.ignored_ids.clone(),
            config.utc_offset,
        ));
        Self {
            db,
            workflow,
            reconciler,
            queue,
            receiver,
        }
    }

    /// Start the action worker and the recheck ticker, returning the
    /// router state.
    pub fn start(self, config: &AppConfig) -> AppState {
        scheduler::spawn_worker(
            self.workflow.clone(),
            self.queue.clone(),
            self.receiver,
            config.scheduler.clone(),
        );
        conversation::spawn_recheck_ticker(self.db, self.queue, config.recheck_interval);
        AppState {
            reconciler: self.reconciler,
            workflow: self.workflow,
        }
    }
}

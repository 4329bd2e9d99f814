//! Coordinator process lifecycle

use crate::config::ServerConfig;
use crate::coordinator::Coordinator;
use crate::driver::BranchDriver;
use crate::error::Result;
use crate::handler::RequestHandler;
use crate::scheduler;
use std::sync::Arc;
use tc_common::ScheduledTask;
use tc_session::SessionHolder;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running coordinator: recovered sessions plus the recovery tasks
pub struct Server {
    coordinator: Arc<Coordinator>,
    tasks: Vec<(ScheduledTask, JoinHandle<()>)>,
}

impl Server {
    /// Open the store, recover sessions and start the recovery tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: ServerConfig, driver: Arc<dyn BranchDriver>) -> Result<Self> {
        config.validate()?;

        let holder = SessionHolder::init(&config.store)?;
        let recovered = match holder.reload() {
            Ok(recovered) => recovered,
            Err(e) => {
                if let Err(destroy) = holder.destroy() {
                    warn!(error = %destroy, "Failed to release the store after a failed reload");
                }
                return Err(e.into());
            }
        };

        let coordinator = Arc::new(Coordinator::new(Arc::new(holder), driver, &config));
        let tasks = ScheduledTask::ALL
            .into_iter()
            .map(|task| {
                let period = config.scheduler.period(task);
                (task, scheduler::start(coordinator.clone(), task, period))
            })
            .collect();

        info!(
            host = %config.node.host,
            port = config.node.port,
            store = %config.store.mode,
            recovered,
            "Transaction coordinator started"
        );
        Ok(Self { coordinator, tasks })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn handler(&self) -> RequestHandler {
        RequestHandler::new(self.coordinator.clone())
    }

    /// Stop the recovery tasks and release the store
    pub async fn shutdown(self) -> Result<()> {
        for (task, handle) in self.tasks {
            handle.abort();
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                warn!(%task, error = %e, "Scheduled task ended abnormally");
            }
        }

        // Handlers handed out earlier may still share the holder; flush the
        // backend through it instead of consuming it.
        match Arc::try_unwrap(self.coordinator) {
            Ok(coordinator) => match Arc::try_unwrap(coordinator.into_holder()) {
                Ok(holder) => holder.destroy()?,
                Err(holder) => holder.root().destroy()?,
            },
            Err(coordinator) => coordinator.holder().root().destroy()?,
        }
        info!("Transaction coordinator stopped");
        Ok(())
    }
}

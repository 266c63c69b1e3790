//! Gateway: the pipeline connecting chat providers, the store, and generators.
//!
//! Three topics carry work between stages:
//! `inbound-events` -> [`Gateway::handle_inbound`] (normalize, store, dispatch),
//! `generation-tasks` -> [`Gateway::handle_task`] (generate, parse, route),
//! `generation-results` -> [`Gateway::deliver`] (send, leave).
//! Every handler tolerates redelivery; the store's uniqueness constraints are
//! the correctness backstop.

mod admin;
mod delivery;
mod dispatch;
mod ingest;
mod router;
mod scheduler;
mod web;

#[cfg(test)]
pub(crate) mod tests;

pub use admin::{ChannelOverview, NewBot};
pub use router::{build_prompt, extract_block, parse_replies};
pub use web::WebEvents;

use chorus_core::{
    config::{Prompts, SchedulerConfig},
    error::ChorusError,
    message::InboundBatch,
    queue::{Subscription, Topic},
    registry::Registry,
    task::{GenerationResult, GenerationTask},
    traits::{ChannelProvider, Generator},
};
use chorus_memory::Store;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The central orchestrator shared by every pipeline stage.
pub struct Gateway {
    pub(crate) store: Store,
    pub(crate) generators: Registry<dyn Generator>,
    pub(crate) providers: Registry<dyn ChannelProvider>,
    pub(crate) prompts: Prompts,
    pub(crate) tasks: Topic<GenerationTask>,
    pub(crate) results: Topic<GenerationResult>,
    /// Messages of history attached to each generation task.
    pub(crate) history_limit: usize,
}

/// Consuming ends of the three pipeline topics.
pub struct Subscriptions {
    pub inbound: Subscription<InboundBatch>,
    pub tasks: Subscription<GenerationTask>,
    pub results: Subscription<GenerationResult>,
}

impl Gateway {
    pub fn new(
        store: Store,
        generators: Registry<dyn Generator>,
        providers: Registry<dyn ChannelProvider>,
        prompts: Prompts,
        tasks: Topic<GenerationTask>,
        results: Topic<GenerationResult>,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            generators,
            providers,
            prompts,
            tasks,
            results,
            history_limit,
        }
    }

    /// Run every pipeline stage until `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        subscriptions: Subscriptions,
        scheduler: SchedulerConfig,
        shutdown: CancellationToken,
    ) {
        info!(
            "Chorus gateway running | generators: {} | providers: {}",
            self.generators.names().join(", "),
            self.providers.names().join(", "),
        );

        self.init_channels().await;

        let Subscriptions {
            inbound,
            tasks,
            results,
        } = subscriptions;

        let gw = self.clone();
        let inbound_handle = tokio::spawn(inbound.run(
            move |batch| {
                let gw = gw.clone();
                async move { settle("inbound-events", gw.handle_inbound(batch)).await }
            },
            shutdown.clone(),
        ));

        let gw = self.clone();
        let task_handle = tokio::spawn(tasks.run(
            move |task| {
                let gw = gw.clone();
                async move { settle("generation-tasks", gw.handle_task(task)).await }
            },
            shutdown.clone(),
        ));

        let gw = self.clone();
        let result_handle = tokio::spawn(results.run(
            move |result| {
                let gw = gw.clone();
                async move { settle("generation-results", gw.deliver(result)).await }
            },
            shutdown.clone(),
        ));

        let sched_handle = if scheduler.enabled {
            let gw = self.clone();
            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                gw.scheduler_loop(scheduler, token).await;
            }))
        } else {
            None
        };

        shutdown.cancelled().await;
        info!("Shutting down gateway...");

        for handle in [inbound_handle, task_handle, result_handle] {
            let _ = handle.await;
        }
        if let Some(h) = sched_handle {
            let _ = h.await;
        }
        info!("Gateway stopped.");
    }
}

/// Unknown backends are a configuration problem: redelivering will not fix
/// them, so the unit of work is dropped here. Anything else goes back to the
/// queue for redelivery.
async fn settle(
    topic: &str,
    work: impl Future<Output = Result<(), ChorusError>>,
) -> Result<(), ChorusError> {
    match work.await {
        Err(ChorusError::UnknownBackend(name)) => {
            error!("{topic}: dropping work for unknown backend {name}");
            Ok(())
        }
        other => other,
    }
}

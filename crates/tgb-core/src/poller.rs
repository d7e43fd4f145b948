//! Check-message task: fetch pending updates and hand them to the control loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{
    domain::{InboundMessage, UpdateBatch, UpdateId},
    pool::AsyncPool,
    ports::BotApi,
    promise::Promise,
};

pub struct Poller {
    api: Arc<dyn BotApi>,
    pool: AsyncPool,
    inbox: mpsc::UnboundedSender<UpdateBatch>,
    in_flight: Option<Promise<UpdateBatch>>,
    checkpoint: Option<UpdateId>,
}

impl Poller {
    /// `checkpoint` is the last update id dispatched before the restart, if any.
    pub fn new(
        api: Arc<dyn BotApi>,
        pool: AsyncPool,
        checkpoint: Option<i64>,
    ) -> (Self, mpsc::UnboundedReceiver<UpdateBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poller = Self {
            api,
            pool,
            inbox: tx,
            in_flight: None,
            checkpoint: checkpoint.map(UpdateId),
        };
        (poller, rx)
    }

    /// `getUpdates` offset acknowledging everything up to the checkpoint.
    pub fn offset(&self) -> i64 {
        self.checkpoint.map(UpdateId::next).unwrap_or(0)
    }

    pub fn checkpoint(&self) -> Option<i64> {
        self.checkpoint.map(|id| id.0)
    }

    /// Submit one fetch. Skipped (returns `false`) while the previous fetch is
    /// still unsettled.
    pub fn poll(&mut self) -> bool {
        if self.in_flight.as_ref().is_some_and(Promise::is_pending) {
            trace!("previous getUpdates still in flight");
            return false;
        }

        let api = self.api.clone();
        let offset = self.offset();
        let promise = self
            .pool
            .submit(async move { api.get_updates(offset).await.map_err(|e| e.to_string()) });

        let inbox = self.inbox.clone();
        promise
            .on_success(move |batch: &UpdateBatch| {
                if !batch.is_empty() && inbox.send(batch.clone()).is_err() {
                    debug!("control loop gone; dropping update batch");
                }
            })
            .on_failure(|reason| debug!(error = reason, "failed to check messages"));

        self.in_flight = Some(promise);
        true
    }

    /// Order a fetched batch by update id, drop anything at or below the
    /// checkpoint, and advance the checkpoint past everything fetched, text or not.
    pub fn accept(&mut self, batch: UpdateBatch) -> Vec<InboundMessage> {
        let UpdateBatch {
            last_update_id,
            mut messages,
        } = batch;

        messages.sort_by_key(|m| m.update_id);
        messages.dedup_by_key(|m| m.update_id);
        if let Some(seen) = self.checkpoint {
            messages.retain(|m| m.update_id > seen);
        }

        let newest = messages.last().map(|m| m.update_id).max(last_update_id);
        if newest > self.checkpoint {
            self.checkpoint = newest;
        }
        messages
    }
}

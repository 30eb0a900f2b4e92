//! Fan-out/fan-in batch jobs for guest create, delete and stop.
//!
//! The authority creates the batch record first. Every item then becomes a
//! sub-request tagged with its index as transaction id and runs as a
//! concurrent sub-task of this orchestrator; its reply comes back into this
//! session. The caller gets the batch id right away and polls
//! `QueryBatchStatusRequest` for item outcomes.
//!
//! Aggregation ends when every item reported back, when no reply arrived for
//! the stall window, or when the session is cancelled. Items still pending at
//! that point stay pending in the batch record.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::create_guest::parse_config;
use crate::application::orchestrator::{OperationHandler, SessionContext};
use crate::domain::address::SELF_DESTINATION;
use crate::domain::envelope::{keys, Envelope, MessageKind, TransactionId};
use crate::domain::records::{BatchId, BatchItemStatus, BatchKind};
use crate::error::{CoreError, OperationError};

/// Handler for the three batch request kinds
pub struct BatchWorkflow {
    kind: BatchKind,
}

impl BatchWorkflow {
    /// Handler for `BatchCreateGuestRequest`
    pub fn create_guests() -> Self {
        Self { kind: BatchKind::CreateGuest }
    }

    /// Handler for `BatchDeleteGuestRequest`
    pub fn delete_guests() -> Self {
        Self { kind: BatchKind::DeleteGuest }
    }

    /// Handler for `BatchStopGuestRequest`
    pub fn stop_guests() -> Self {
        Self { kind: BatchKind::StopGuest }
    }

    fn response_kind(&self) -> MessageKind {
        match self.kind {
            BatchKind::CreateGuest => MessageKind::BatchCreateGuestResponse,
            BatchKind::DeleteGuest => MessageKind::BatchDeleteGuestResponse,
            BatchKind::StopGuest => MessageKind::BatchStopGuestResponse,
        }
    }

    /// Request and reply kinds of one sub-operation
    fn sub_kinds(&self) -> (MessageKind, MessageKind) {
        match self.kind {
            BatchKind::CreateGuest => {
                (MessageKind::CreateGuestRequest, MessageKind::CreateGuestResponse)
            }
            BatchKind::DeleteGuest => {
                (MessageKind::DeleteGuestRequest, MessageKind::DeleteGuestResponse)
            }
            BatchKind::StopGuest => {
                (MessageKind::StopInstanceRequest, MessageKind::StopInstanceResponse)
            }
        }
    }

    /// Check the request and return the item names
    fn parse_items(&self, request: &Envelope) -> Result<Vec<String>, OperationError> {
        let items = request.strings(keys::ITEMS)?.to_vec();
        if items.is_empty() {
            return Err(OperationError::Malformed("empty field 'items'".to_string()));
        }
        if u32::try_from(items.len()).is_err() {
            return Err(OperationError::Malformed("too many items".to_string()));
        }

        match self.kind {
            BatchKind::CreateGuest => {
                for name in &items {
                    parse_config(&self.template(request).with(keys::NAME, name.clone()))?;
                }
            }
            BatchKind::DeleteGuest | BatchKind::StopGuest => {
                if items.iter().any(String::is_empty) {
                    return Err(OperationError::Malformed(
                        "empty instance id in 'items'".to_string(),
                    ));
                }
            }
        }
        Ok(items)
    }

    /// Shared part of every sub-request
    fn template(&self, request: &Envelope) -> Envelope {
        let (sub_kind, _) = self.sub_kinds();
        let mut template = Envelope::request(sub_kind, SELF_DESTINATION);
        if self.kind == BatchKind::CreateGuest {
            template.fields = request.fields.clone();
            template.fields.remove(keys::ITEMS);
        }
        template
    }

    fn sub_request(
        &self,
        template: &Envelope,
        ctx: &SessionContext,
        index: u32,
        item: &str,
    ) -> Envelope {
        let key = match self.kind {
            BatchKind::CreateGuest => keys::NAME,
            BatchKind::DeleteGuest | BatchKind::StopGuest => keys::INSTANCE,
        };
        template
            .clone()
            .from_session(ctx.id())
            .with_transaction(TransactionId(index))
            .with(key, item)
    }

    async fn start(
        &self,
        ctx: &mut SessionContext,
        request: &Envelope,
    ) -> Result<(BatchId, BTreeMap<TransactionId, PendingItem>), OperationError> {
        let items = self.parse_items(request)?;
        let batch = ctx.authority().create_batch_job(self.kind, items.clone()).await?;

        let template = self.template(request);
        let mut pending = BTreeMap::new();
        for (index, item) in items.into_iter().enumerate() {
            let transaction = index as u32;
            let sub = self.sub_request(&template, ctx, transaction, &item);
            match ctx.spawn_subtask(sub) {
                Ok(()) => {
                    pending.insert(TransactionId(transaction), PendingItem { index, name: item });
                }
                Err(e) => {
                    error!(
                        session = %ctx.id(),
                        batch = %batch,
                        item = %item,
                        error = %e,
                        "Dispatch batch item failed"
                    );
                    let status = BatchItemStatus::Failed(e.to_string());
                    if let Err(e) = ctx.authority().update_batch_item(&batch, index, status).await {
                        warn!(
                            session = %ctx.id(),
                            batch = %batch,
                            item = %item,
                            error = %e,
                            "Update batch item failed"
                        );
                    }
                }
            }
        }

        info!(
            session = %ctx.id(),
            batch = %batch,
            kind = ?self.kind,
            dispatched = pending.len(),
            "Batch dispatched"
        );
        Ok((batch, pending))
    }
}

#[async_trait]
impl OperationHandler for BatchWorkflow {
    async fn execute(&self, ctx: &mut SessionContext, request: Envelope) -> Result<(), CoreError> {
        let response = self.response_kind();
        let started = self.start(ctx, &request).await;

        let (batch, pending) = match started {
            Ok(started) => started,
            Err(e) => return ctx.finish(&request, response, Err(e)).await,
        };

        let accepted = ctx
            .reply_for(&request, response)
            .with(keys::BATCH, batch.0.clone());
        ctx.finish(&request, response, Ok(accepted)).await?;

        let (_, expected) = self.sub_kinds();
        let outcome = BatchAggregator::new(batch.clone(), pending, expected).run(ctx).await;
        info!(session = %ctx.id(), batch = %batch, outcome = ?outcome, "Batch aggregation ended");
        Ok(())
    }
}

/// Item awaiting its sub-operation reply
#[derive(Debug, Clone)]
pub struct PendingItem {
    /// Position in the batch record
    pub index: usize,
    /// Guest name or instance id
    pub name: String,
}

/// How an aggregation loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationOutcome {
    /// Every dispatched item reported back
    Completed,
    /// No reply within the stall window
    Stalled {
        /// Items left pending
        remaining: usize,
    },
    /// The session was cancelled
    Cancelled {
        /// Items left pending
        remaining: usize,
    },
    /// The session inbox closed
    Closed {
        /// Items left pending
        remaining: usize,
    },
}

/// Fan-in loop over correlated sub-operation replies
pub struct BatchAggregator {
    batch: BatchId,
    pending: BTreeMap<TransactionId, PendingItem>,
    expected: MessageKind,
}

impl BatchAggregator {
    /// Aggregate replies of kind `expected` for the given pending set
    pub fn new(
        batch: BatchId,
        pending: BTreeMap<TransactionId, PendingItem>,
        expected: MessageKind,
    ) -> Self {
        Self {
            batch,
            pending,
            expected,
        }
    }

    /// Items still waiting for a reply
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Consume replies until the pending set empties or the loop gives up
    pub async fn run(mut self, ctx: &mut SessionContext) -> AggregationOutcome {
        let stall_window = ctx.config().batch_stall_window();
        let mut ticker = tokio::time::interval(ctx.config().batch_check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();

        while !self.pending.is_empty() {
            tokio::select! {
                received = ctx.session_mut().recv() => match received {
                    Some(reply) => {
                        last_activity = Instant::now();
                        self.apply(ctx, reply).await;
                    }
                    None => {
                        return AggregationOutcome::Closed { remaining: self.remaining() };
                    }
                },
                _ = ticker.tick() => {
                    if ctx.is_cancelled() {
                        warn!(
                            session = %ctx.id(),
                            batch = %self.batch,
                            remaining = self.remaining(),
                            "Batch aggregation cancelled"
                        );
                        return AggregationOutcome::Cancelled { remaining: self.remaining() };
                    }
                    if last_activity.elapsed() >= stall_window {
                        warn!(
                            session = %ctx.id(),
                            batch = %self.batch,
                            remaining = self.remaining(),
                            stall_secs = stall_window.as_secs(),
                            "Batch stalled, giving up"
                        );
                        return AggregationOutcome::Stalled { remaining: self.remaining() };
                    }
                }
            }
        }
        AggregationOutcome::Completed
    }

    async fn apply(&mut self, ctx: &SessionContext, reply: Envelope) {
        let Some(item) = self.pending.remove(&reply.transaction_id) else {
            warn!(
                session = %ctx.id(),
                batch = %self.batch,
                transaction = %reply.transaction_id,
                kind = %reply.kind,
                "Ignoring reply for unknown batch item"
            );
            return;
        };

        let status = if reply.kind != self.expected {
            warn!(
                session = %ctx.id(),
                batch = %self.batch,
                expected = %self.expected,
                received = %reply.kind,
                "Unexpected batch item reply"
            );
            BatchItemStatus::Failed(format!("unexpected reply {}", reply.kind))
        } else if reply.success {
            BatchItemStatus::Succeeded
        } else {
            BatchItemStatus::Failed(reply.error)
        };

        debug!(
            session = %ctx.id(),
            batch = %self.batch,
            item = %item.name,
            status = status.label(),
            "Batch item finished"
        );
        if let Err(e) = ctx.authority().update_batch_item(&self.batch, item.index, status).await {
            warn!(
                session = %ctx.id(),
                batch = %self.batch,
                item = %item.name,
                error = %e,
                "Update batch item failed"
            );
        }
    }
}

/// Handler for `QueryBatchStatusRequest`
pub struct QueryBatchStatusWorkflow;

#[async_trait]
impl OperationHandler for QueryBatchStatusWorkflow {
    async fn execute(&self, ctx: &mut SessionContext, request: Envelope) -> Result<(), CoreError> {
        let outcome = query(ctx, &request).await;
        ctx.finish(&request, MessageKind::QueryBatchStatusResponse, outcome).await
    }
}

async fn query(ctx: &mut SessionContext, request: &Envelope) -> Result<Envelope, OperationError> {
    let batch = BatchId(request.string(keys::BATCH)?.to_string());
    let job = ctx.authority().get_batch_job(&batch).await?;

    let mut names = Vec::with_capacity(job.items.len());
    let mut status = Vec::with_capacity(job.items.len());
    let mut reasons = Vec::with_capacity(job.items.len());
    for item in job.items {
        status.push(item.status.label().to_string());
        reasons.push(match item.status {
            BatchItemStatus::Failed(reason) => reason,
            _ => String::new(),
        });
        names.push(item.name);
    }

    Ok(ctx
        .reply_for(request, MessageKind::QueryBatchStatusResponse)
        .with(keys::BATCH, batch.0)
        .with(keys::ITEMS, names)
        .with(keys::STATUS, status)
        .with(keys::REASONS, reasons))
}

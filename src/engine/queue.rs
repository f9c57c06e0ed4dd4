//! Per-lane serialized event queue.
//!
//! Each character gets its own worker task fed by a bounded mpsc channel; scene
//! events (round advance, combat end, template placement) share one scene lane.
//! Events on a lane run strictly in order, lanes run concurrently.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info_span, warn, Instrument};

use super::{EngineError, EventReport, UpgradeEngine};
use crate::events::{GameEvent, Lane};

struct QueuedEvent {
    event: GameEvent,
    reply: oneshot::Sender<Result<EventReport, EngineError>>,
}

/// Lane router in front of an [`UpgradeEngine`]
#[derive(Clone)]
pub struct EventQueue {
    engine: Arc<UpgradeEngine>,
    lanes: Arc<Mutex<HashMap<Lane, mpsc::Sender<QueuedEvent>>>>,
    capacity: usize,
}

impl EventQueue {
    /// Must be called inside a tokio runtime; workers are spawned lazily
    pub fn new(engine: Arc<UpgradeEngine>) -> Self {
        let capacity = engine.settings().queue_capacity;
        Self {
            engine,
            lanes: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    pub fn engine(&self) -> &Arc<UpgradeEngine> {
        &self.engine
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.lock().len()
    }

    /// Enqueue on the event's lane and wait for its report
    pub async fn submit(&self, event: GameEvent) -> Result<EventReport, EngineError> {
        let lane = event.lane();
        let sender = self.sender_for(&lane);
        let (reply, response) = oneshot::channel();

        sender
            .send(QueuedEvent { event, reply })
            .await
            .map_err(|_| EngineError::QueueClosed(lane.to_string()))?;
        response
            .await
            .map_err(|_| EngineError::QueueClosed(lane.to_string()))?
    }

    fn sender_for(&self, lane: &Lane) -> mpsc::Sender<QueuedEvent> {
        let mut lanes = self.lanes.lock();
        if let Some(sender) = lanes.get(lane) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let engine = self.engine.clone();
        let worker_lane = lane.clone();
        tokio::spawn(async move {
            Self::worker_loop(worker_lane, rx, engine).await;
        });
        debug!(%lane, capacity = self.capacity, "lane opened");
        lanes.insert(lane.clone(), tx.clone());
        tx
    }

    async fn worker_loop(lane: Lane, mut rx: mpsc::Receiver<QueuedEvent>, engine: Arc<UpgradeEngine>) {
        while let Some(queued) = rx.recv().await {
            let span = info_span!("event", lane = %lane, kind = queued.event.kind());
            let result = engine.handle(queued.event).instrument(span).await;
            if let Err(err) = &result {
                warn!(%lane, error = %err, "event handler failed");
            }
            // the submitter may have gone away
            let _ = queued.reply.send(result);
        }
        debug!(%lane, "lane closed");
    }
}

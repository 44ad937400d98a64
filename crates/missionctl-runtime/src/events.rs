//! Mission event stream (spec §6 "Event stream"): persists every event and
//! optionally broadcasts it to an external presenter (the CLI's streaming
//! front-end is out of scope here, spec §1, but needs a channel to listen
//! on).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::broadcast;

use missionctl_store::Store;
use missionctl_types::{Event, EventKind};

use crate::error::RuntimeError;

/// Emits, persists and broadcasts mission events. One per running
/// mission; cheap to clone (an `Arc`-backed sender plus a shared
/// sequence counter).
#[derive(Clone)]
pub struct EventBus {
    store: Store,
    mission_id: String,
    started_at: Instant,
    seq: std::sync::Arc<AtomicU64>,
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(store: Store, mission_id: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(1024);
        EventBus {
            store,
            mission_id: mission_id.into(),
            started_at: Instant::now(),
            seq: std::sync::Arc::new(AtomicU64::new(0)),
            sender,
        }
    }

    /// Subscribes an external presenter to the live event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub async fn emit(
        &self,
        task_name: Option<String>,
        index: Option<u32>,
        agent_id: Option<String>,
        kind: EventKind,
    ) -> Result<(), RuntimeError> {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            mission_relative_ms: self.started_at.elapsed().as_millis() as i64,
            mission_id: self.mission_id.clone(),
            task_name,
            index,
            agent_id,
            kind,
        };
        self.store.append_event(&event).await?;
        // A presenter may not be listening; a dropped receiver is not an
        // error condition for the mission.
        let _ = self.sender.send(event);
        Ok(())
    }
}

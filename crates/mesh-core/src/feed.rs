//! Multi-subscriber order event feed.
//!
//! Each subscriber owns a bounded queue of event batches. Publishing waits up
//! to the slow-subscriber timeout for room in a full queue; a subscriber that
//! stays full past the timeout is dropped and receives nothing further.

use dashmap::DashMap;
use mesh_types::OrderEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Receiving end of a feed subscription.
#[derive(Debug)]
pub struct Subscription {
	pub id: Uuid,
	receiver: mpsc::Receiver<Vec<OrderEvent>>,
}

impl Subscription {
	/// Next batch of events, or `None` once the subscription ended.
	pub async fn recv(&mut self) -> Option<Vec<OrderEvent>> {
		self.receiver.recv().await
	}

	pub fn try_recv(&mut self) -> Option<Vec<OrderEvent>> {
		self.receiver.try_recv().ok()
	}
}

pub struct EventFeed {
	subscribers: DashMap<Uuid, mpsc::Sender<Vec<OrderEvent>>>,
	buffer: usize,
	slow_subscriber_timeout: Duration,
}

impl EventFeed {
	pub fn new(buffer: usize, slow_subscriber_timeout: Duration) -> Self {
		Self {
			subscribers: DashMap::new(),
			buffer: buffer.max(1),
			slow_subscriber_timeout,
		}
	}

	pub fn subscribe(&self) -> Subscription {
		let (sender, receiver) = mpsc::channel(self.buffer);
		let id = Uuid::new_v4();
		self.subscribers.insert(id, sender);
		debug!(subscriber = %id, "Subscriber added");
		Subscription { id, receiver }
	}

	pub fn unsubscribe(&self, id: &Uuid) -> bool {
		self.subscribers.remove(id).is_some()
	}

	pub fn subscriber_count(&self) -> usize {
		self.subscribers.len()
	}

	/// Delivers `events` to every subscriber as one batch. Returns the number
	/// of subscribers dropped for being too slow.
	pub async fn publish(&self, events: Vec<OrderEvent>) -> usize {
		if events.is_empty() {
			return 0;
		}
		let targets: Vec<(Uuid, mpsc::Sender<Vec<OrderEvent>>)> = self
			.subscribers
			.iter()
			.map(|entry| (*entry.key(), entry.value().clone()))
			.collect();

		let mut dropped = 0;
		for (id, sender) in targets {
			match sender
				.send_timeout(events.clone(), self.slow_subscriber_timeout)
				.await
			{
				Ok(()) => {}
				Err(SendTimeoutError::Timeout(_)) => {
					warn!(subscriber = %id, "Dropping slow subscriber");
					self.subscribers.remove(&id);
					dropped += 1;
				}
				Err(SendTimeoutError::Closed(_)) => {
					debug!(subscriber = %id, "Subscriber went away");
					self.subscribers.remove(&id);
				}
			}
		}
		dropped
	}

	/// Ends every subscription.
	pub fn close(&self) {
		self.subscribers.clear();
	}
}

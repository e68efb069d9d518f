//! Queue partitioner (spec.md §4.5 "Queue"). Stateless forwarder around an
//! external durable list store; the core owns only the routing policy.

use std::sync::Arc;
use std::time::Duration;

use hashring::Ring;
use log::debug;

use crate::error::CoreError;
use crate::transport::{DurableListStore, PeerTransport};

pub fn processing_list_name(queue_name: &str) -> String {
    format!("{queue_name}:processing")
}

/// `responsible(queue_name) = all_nodes[stable_hash(queue_name) mod n]`
/// (spec.md §4.1), forwarding the queue's three verbs to whichever peer the
/// ring names responsible for a name other than `self`.
pub struct QueuePartitioner<S, T> {
    node_id: String,
    ring: Arc<Ring>,
    store: Arc<S>,
    transport: Arc<T>,
}

impl<S, T> QueuePartitioner<S, T>
where
    S: DurableListStore,
    T: PeerTransport,
{
    pub fn new(node_id: String, ring: Arc<Ring>, store: Arc<S>, transport: Arc<T>) -> Self {
        QueuePartitioner {
            node_id,
            ring,
            store,
            transport,
        }
    }

    fn responsible(&self, queue_name: &str) -> String {
        self.ring.responsible(queue_name).to_string()
    }

    pub fn produce(&self, queue_name: &str, message: Vec<u8>, deadline: Duration) -> Result<(), CoreError> {
        let owner = self.responsible(queue_name);
        if owner != self.node_id {
            debug!("forwarding produce({queue_name}) to {owner}");
            return self.transport.forward_produce(&owner, queue_name, message, deadline);
        }
        self.store.append(queue_name, message);
        Ok(())
    }

    pub fn consume(&self, queue_name: &str, deadline: Duration) -> Result<Option<Vec<u8>>, CoreError> {
        let owner = self.responsible(queue_name);
        if owner != self.node_id {
            debug!("forwarding consume({queue_name}) to {owner}");
            return self.transport.forward_consume(&owner, queue_name, deadline);
        }
        // consume returning empty is a normal, non-error outcome (spec.md §4.5)
        Ok(self.store.pop_to(queue_name, &processing_list_name(queue_name)))
    }

    /// `processing_key` names the queue whose processing list the message
    /// should be removed from (spec.md's `/queue/ack/{processing_key}`).
    pub fn ack(&self, processing_key: &str, message: Vec<u8>, deadline: Duration) -> Result<(), CoreError> {
        let owner = self.responsible(processing_key);
        if owner != self.node_id {
            debug!("forwarding ack({processing_key}) to {owner}");
            return self.transport.forward_ack(&owner, processing_key, message, deadline);
        }
        // A no-op on a never-consumed or already-acked message is fine (Q1).
        self.store.remove_value(&processing_list_name(processing_key), &message);
        Ok(())
    }
}

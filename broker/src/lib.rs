//! Multi-producer broadcast (N producers, 1 input, many subscribers), used
//! by the node wiring layer to fan outbound peer traffic — Raft RPCs, PBFT
//! messages, cache invalidations — out to one channel per peer.
//!
//! Adapted from the reference project's `mpb` crate: any number of senders
//! push onto a single internal channel, a background thread relays every
//! item it reads to every currently-registered subscriber.

use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Multi-Producer Broadcast: fans everything sent on any `tx()` handle out
/// to every `rx()` handle registered at the time of the send.
pub struct Broker<X>
where
    X: Clone + Send + Sync + 'static,
{
    sender: Sender<X>,
    subscribers: Arc<Mutex<Vec<Sender<X>>>>,
}

impl<X> Broker<X>
where
    X: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (tx, rx) = unbounded::<X>();
        let broker = Broker {
            sender: tx,
            subscribers: Arc::new(Mutex::new(Vec::new())),
        };
        broker.spawn_relay(rx);
        broker
    }

    fn spawn_relay(&self, rx: Receiver<X>) {
        let subscribers = self.subscribers.clone();
        thread::spawn(move || {
            for item in rx.iter() {
                match subscribers.lock() {
                    Ok(subs) => {
                        for sub in subs.iter() {
                            let _ = sub.send(item.clone());
                        }
                    }
                    Err(_) => break,
                }
            }
        });
    }

    /// A handle any caller can clone and send on.
    pub fn tx(&self) -> Sender<X> {
        self.sender.clone()
    }

    /// Register a new subscriber; it only observes items sent after this
    /// call, never anything broadcast before it subscribed.
    pub fn subscribe(&self) -> Receiver<X> {
        let (tx, rx) = unbounded();
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }
}

impl<X> Default for Broker<X>
where
    X: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

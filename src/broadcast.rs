//! The event bus: a single producer (the orchestrator) fanned out
//! to any number of subscribers, none of which may block the producer.
//! Built on `crossbeam-channel` with unbounded peer queues so a slow or
//! absent subscriber never stalls a cycle.

use crossbeam_channel::{self, Receiver, Sender};


/// Receive a message and fan it out to every current subscriber.
pub struct Broadcast<A: Clone> {
    rx: Receiver<A>,
    peers: Vec<Sender<A>>,
}

impl<A: Clone> Broadcast<A> {
    /// Instantiate a new broadcaster reading from `rx`.
    pub fn new(rx: Receiver<A>) -> Broadcast<A> {
        Broadcast { rx, peers: Vec::new() }
    }

    /// Forward every message received on `rx` to each subscriber in turn,
    /// until the sending half is dropped.
    pub fn start(&self) {
        while let Ok(msg) = self.rx.recv() {
            for peer in &self.peers {
                // An unbounded send only fails if the receiver was dropped;
                // a disinterested subscriber is not this producer's problem.
                let _ = peer.send(msg.clone());
            }
        }
    }

    /// Subscribe to all subsequent broadcast messages.
    pub fn subscribe(&mut self) -> Receiver<A> {
        let (tx, rx) = crossbeam_channel::unbounded::<A>();
        self.peers.push(tx);
        rx
    }
}

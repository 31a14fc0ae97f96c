use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use crate::dom::NodeId;
use crate::identifier::OrderedIdentifier;
use crate::item::ItemKind;
use crate::scroll::StopReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// An item finished processing (classified and, if applicable, checked).
    NewItem {
        id: OrderedIdentifier,
        element: NodeId,
        kind: ItemKind,
    },
    ScrollStarted,
    ScrollStopped { reason: StopReason },
}

/// In-process publish/subscribe channel scoped to one controller.
///
/// Every subscriber gets its own unbounded channel; dropping the receiver is
/// the unsubscribe, and the dead sender is pruned on the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Subscription {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        Subscription { rx }
    }

    pub fn publish(&mut self, event: Event) {
        log::debug!("bus: publish {:?}", event);
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<Event>,
}

impl Subscription {
    /// Everything published since the last drain, in publish order.
    pub fn drain(&self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }
}

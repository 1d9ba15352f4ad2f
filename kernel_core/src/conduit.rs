//! Conduit manager
//!
//! Conduits are two-endpoint channels with a bounded FIFO queue per
//! direction. The manager is a pure state machine: it never touches the
//! scheduler. Every operation returns an outcome describing who should
//! be woken or parked, and dispatch applies it.
//!
//! Blocking semantics: a blocking send completes when the receiver
//! dequeues the message, not when it is queued. A message that has
//! entered a queue stays there even if its sender later times out.

use ipc::{ConduitId, EndpointSide, Message, MessageId};
use kernel_api::{Instant, IpcMode, KernelError};
use core_types::QuantumId;
use std::collections::{HashMap, VecDeque};

/// A send accepted before the far endpoint was bound
///
/// Payload staging needs the receiver's address space, so the bytes are
/// held raw and the send is replayed once the peer connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredSend {
    pub sender: QuantumId,
    pub tag: u32,
    pub bytes: Vec<u8>,
    pub deadline: Option<Instant>,
}

/// State of the far endpoint, from a sender's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Bound(QuantumId),
    Unbound,
}

/// Result of placing a message into a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Message queued; wake this parked receiver if present
    Queued { wake_receiver: Option<QuantumId> },
    /// Queue full; the blocking sender is parked with its message
    ParkedFull,
}

/// Result of a receive attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// A message was dequeued; wake its sender if it was blocking
    Delivered {
        message: Message,
        wake_sender: Option<QuantumId>,
    },
    /// Nothing queued; the blocking receiver is parked
    Parked,
}

/// What a cancelled wait was waiting for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelledWait {
    Receiver,
    DeferredSend(DeferredSend),
    /// The parked message never entered the queue; the caller owns its
    /// cleanup (for shared payloads, the staged region)
    ParkedSend(Message),
    /// The message is already queued and stays there
    AwaitingConsume,
}

/// Everyone to wake, and with what error, after an endpoint closes
#[derive(Debug, Default)]
pub struct CloseEffects {
    pub woken: Vec<(QuantumId, KernelError)>,
    /// Messages discarded because their destination closed; shared
    /// payloads among them need their staging regions released
    pub discarded: Vec<Message>,
    /// Both endpoints are now closed and the conduit is gone
    pub removed: bool,
}

#[derive(Debug, Default)]
struct Endpoint {
    bound: Option<QuantumId>,
    closed: bool,
}

#[derive(Debug)]
struct Conduit {
    endpoints: [Endpoint; 2],
    /// `queues[side]` holds messages inbound to that side
    queues: [VecDeque<Message>; 2],
    waiting_receiver: [Option<QuantumId>; 2],
    /// Senders parked on a full queue, message in hand, per inbound side
    parked_senders: [VecDeque<(QuantumId, Message)>; 2],
    /// Sends accepted while the far endpoint was unbound
    deferred: Vec<DeferredSend>,
    /// Blocking senders waiting for their queued message to be consumed
    awaiting_consume: HashMap<MessageId, QuantumId>,
}

impl Conduit {
    fn new() -> Self {
        Self {
            endpoints: [Endpoint::default(), Endpoint::default()],
            queues: [VecDeque::new(), VecDeque::new()],
            waiting_receiver: [None, None],
            parked_senders: [VecDeque::new(), VecDeque::new()],
            deferred: Vec::new(),
            awaiting_consume: HashMap::new(),
        }
    }

    fn side_of(&self, quantum: QuantumId) -> Option<EndpointSide> {
        for side in [EndpointSide::A, EndpointSide::B] {
            if self.endpoints[side.index()].bound == Some(quantum) {
                return Some(side);
            }
        }
        None
    }
}

/// Audit trail of conduit activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcEvent {
    Created { conduit: ConduitId },
    Connected { conduit: ConduitId, quantum: QuantumId, side: EndpointSide },
    Queued { conduit: ConduitId, message: MessageId },
    Delivered { conduit: ConduitId, message: MessageId, receiver: QuantumId },
    SenderParked { conduit: ConduitId, sender: QuantumId },
    ReceiverParked { conduit: ConduitId, receiver: QuantumId },
    EndpointClosed { conduit: ConduitId, side: EndpointSide },
    Removed { conduit: ConduitId },
}

/// The conduit manager
#[derive(Debug)]
pub struct ConduitManager {
    conduits: HashMap<ConduitId, Conduit>,
    capacity: usize,
    events: Vec<IpcEvent>,
}

impl ConduitManager {
    /// `capacity` bounds each direction's queue
    pub fn new(capacity: usize) -> Self {
        Self {
            conduits: HashMap::new(),
            capacity: capacity.max(1),
            events: Vec::new(),
        }
    }

    pub fn create(&mut self) -> ConduitId {
        let id = ConduitId::new();
        self.conduits.insert(id, Conduit::new());
        self.events.push(IpcEvent::Created { conduit: id });
        id
    }

    pub fn conduit_count(&self) -> usize {
        self.conduits.len()
    }

    pub fn conduit_ids(&self) -> Vec<ConduitId> {
        self.conduits.keys().copied().collect()
    }

    /// Closes both endpoints of a conduit, merging the effects
    pub fn close_conduit(&mut self, conduit: ConduitId) -> CloseEffects {
        let mut effects = self.close_side(conduit, EndpointSide::A);
        let rest = self.close_side(conduit, EndpointSide::B);
        effects.woken.extend(rest.woken);
        effects.discarded.extend(rest.discarded);
        effects.removed |= rest.removed;
        effects
    }

    /// Binds a quantum to the first unbound endpoint
    ///
    /// Returns sends deferred while that endpoint was unbound; the
    /// caller replays them through the normal send path.
    pub fn connect(
        &mut self,
        conduit: ConduitId,
        quantum: QuantumId,
    ) -> Result<Vec<DeferredSend>, KernelError> {
        let entry = self.conduit_mut(conduit)?;
        let side = [EndpointSide::A, EndpointSide::B]
            .into_iter()
            .find(|side| {
                let endpoint = &entry.endpoints[side.index()];
                endpoint.bound.is_none() && !endpoint.closed
            })
            .ok_or(KernelError::ConduitFull(conduit))?;
        entry.endpoints[side.index()].bound = Some(quantum);
        let replay = std::mem::take(&mut entry.deferred);
        self.events.push(IpcEvent::Connected {
            conduit,
            quantum,
            side,
        });
        Ok(replay)
    }

    /// Endpoint side a quantum is bound to
    pub fn side_of(
        &self,
        conduit: ConduitId,
        quantum: QuantumId,
    ) -> Result<EndpointSide, KernelError> {
        let entry = self.conduit_ref(conduit)?;
        entry
            .side_of(quantum)
            .ok_or(KernelError::NotConnected(conduit, quantum))
    }

    /// State of the endpoint opposite a sender
    pub fn peer_of(
        &self,
        conduit: ConduitId,
        side: EndpointSide,
    ) -> Result<PeerStatus, KernelError> {
        let entry = self.conduit_ref(conduit)?;
        let peer = &entry.endpoints[side.opposite().index()];
        if peer.closed {
            return Err(KernelError::ConduitClosed(conduit));
        }
        match peer.bound {
            Some(quantum) => Ok(PeerStatus::Bound(quantum)),
            None => Ok(PeerStatus::Unbound),
        }
    }

    /// Records a send toward a not-yet-bound endpoint
    pub fn defer_send(
        &mut self,
        conduit: ConduitId,
        deferred: DeferredSend,
    ) -> Result<(), KernelError> {
        let sender = deferred.sender;
        let entry = self.conduit_mut(conduit)?;
        entry.deferred.push(deferred);
        self.events.push(IpcEvent::SenderParked { conduit, sender });
        Ok(())
    }

    /// Places a message into the queue toward the sender's peer
    pub fn enqueue(
        &mut self,
        conduit: ConduitId,
        side: EndpointSide,
        message: Message,
        mode: IpcMode,
    ) -> Result<EnqueueOutcome, KernelError> {
        let capacity = self.capacity;
        let entry = self.conduit_mut(conduit)?;
        let inbound = side.opposite().index();
        let sender = message.sender;
        let message_id = message.id;
        if entry.queues[inbound].len() >= capacity {
            match mode {
                // A full queue is a transient condition, unlike a
                // conduit whose endpoints are both taken.
                IpcMode::NonBlocking => return Err(KernelError::WouldBlock),
                IpcMode::Blocking => {
                    entry.awaiting_consume.insert(message_id, sender);
                    entry.parked_senders[inbound].push_back((sender, message));
                    self.events.push(IpcEvent::SenderParked { conduit, sender });
                    return Ok(EnqueueOutcome::ParkedFull);
                }
            }
        }
        if mode == IpcMode::Blocking {
            entry.awaiting_consume.insert(message_id, sender);
        }
        entry.queues[inbound].push_back(message);
        let wake_receiver = entry.waiting_receiver[inbound].take();
        self.events.push(IpcEvent::Queued {
            conduit,
            message: message_id,
        });
        Ok(EnqueueOutcome::Queued { wake_receiver })
    }

    /// Dequeues the next message toward a receiver
    pub fn receive(
        &mut self,
        conduit: ConduitId,
        receiver: QuantumId,
        mode: IpcMode,
    ) -> Result<ReceiveOutcome, KernelError> {
        let entry = self.conduit_mut(conduit)?;
        let side = entry
            .side_of(receiver)
            .ok_or(KernelError::NotConnected(conduit, receiver))?;
        let inbound = side.index();
        if let Some(message) = entry.queues[inbound].pop_front() {
            let wake_sender = entry.awaiting_consume.remove(&message.id);
            // A parked sender's message takes the freed slot, keeping
            // arrival order.
            if let Some((_, parked)) = entry.parked_senders[inbound].pop_front() {
                entry.queues[inbound].push_back(parked);
            }
            self.events.push(IpcEvent::Delivered {
                conduit,
                message: message.id,
                receiver,
            });
            return Ok(ReceiveOutcome::Delivered {
                message,
                wake_sender,
            });
        }
        // Queue empty. A closed peer means nothing more will arrive.
        if entry.endpoints[side.opposite().index()].closed {
            return Err(KernelError::ConduitClosed(conduit));
        }
        match mode {
            IpcMode::NonBlocking => Err(KernelError::WouldBlock),
            IpcMode::Blocking => {
                entry.waiting_receiver[inbound] = Some(receiver);
                self.events
                    .push(IpcEvent::ReceiverParked { conduit, receiver });
                Ok(ReceiveOutcome::Parked)
            }
        }
    }

    /// Drops a quantum's registered wait on a conduit, if any
    ///
    /// Used when a deadline expires. The distinction in the return value
    /// tells the caller what cleanup the cancelled wait needs.
    pub fn cancel_wait(
        &mut self,
        conduit: ConduitId,
        quantum: QuantumId,
    ) -> Option<CancelledWait> {
        let entry = self.conduits.get_mut(&conduit)?;
        for slot in entry.waiting_receiver.iter_mut() {
            if *slot == Some(quantum) {
                *slot = None;
                return Some(CancelledWait::Receiver);
            }
        }
        if let Some(position) = entry.deferred.iter().position(|d| d.sender == quantum) {
            return Some(CancelledWait::DeferredSend(entry.deferred.remove(position)));
        }
        for parked in entry.parked_senders.iter_mut() {
            if let Some(position) = parked.iter().position(|(sender, _)| *sender == quantum) {
                let (_, message) = parked.remove(position)?;
                entry.awaiting_consume.remove(&message.id);
                return Some(CancelledWait::ParkedSend(message));
            }
        }
        let queued: Vec<MessageId> = entry
            .awaiting_consume
            .iter()
            .filter(|(_, sender)| **sender == quantum)
            .map(|(id, _)| *id)
            .collect();
        if !queued.is_empty() {
            for id in queued {
                entry.awaiting_consume.remove(&id);
            }
            return Some(CancelledWait::AwaitingConsume);
        }
        None
    }

    /// Closes the endpoint a quantum is bound to
    pub fn close_endpoint(
        &mut self,
        conduit: ConduitId,
        quantum: QuantumId,
    ) -> Result<CloseEffects, KernelError> {
        let entry = self.conduit_mut(conduit)?;
        let side = entry
            .side_of(quantum)
            .ok_or(KernelError::NotConnected(conduit, quantum))?;
        Ok(self.close_side(conduit, side))
    }

    /// Closes every endpoint bound to a quantum, across all conduits
    ///
    /// Called on quantum exit. Returns effects per conduit.
    pub fn close_all_for(&mut self, quantum: QuantumId) -> Vec<(ConduitId, CloseEffects)> {
        let bound: Vec<(ConduitId, EndpointSide)> = self
            .conduits
            .iter()
            .filter_map(|(id, conduit)| conduit.side_of(quantum).map(|side| (*id, side)))
            .collect();
        bound
            .into_iter()
            .map(|(id, side)| (id, self.close_side(id, side)))
            .collect()
    }

    fn close_side(&mut self, conduit: ConduitId, side: EndpointSide) -> CloseEffects {
        let mut effects = CloseEffects::default();
        let Some(entry) = self.conduits.get_mut(&conduit) else {
            return effects;
        };
        let index = side.index();
        entry.endpoints[index].closed = true;
        entry.endpoints[index].bound = None;

        // Traffic toward the closed side is going nowhere.
        for message in entry.queues[index].drain(..) {
            if let Some(sender) = entry.awaiting_consume.remove(&message.id) {
                effects
                    .woken
                    .push((sender, KernelError::ConduitClosed(conduit)));
            }
            effects.discarded.push(message);
        }
        for (sender, message) in entry.parked_senders[index].drain(..) {
            entry.awaiting_consume.remove(&message.id);
            effects
                .woken
                .push((sender, KernelError::ConduitClosed(conduit)));
            effects.discarded.push(message);
        }
        for deferred in entry.deferred.drain(..) {
            effects
                .woken
                .push((deferred.sender, KernelError::ConduitClosed(conduit)));
        }
        if let Some(receiver) = entry.waiting_receiver[index].take() {
            effects
                .woken
                .push((receiver, KernelError::ConduitClosed(conduit)));
        }
        // The peer's parked receiver only learns of the close once its
        // queue is drained; with an empty queue that is immediately.
        let peer = side.opposite().index();
        if entry.queues[peer].is_empty() {
            if let Some(receiver) = entry.waiting_receiver[peer].take() {
                effects
                    .woken
                    .push((receiver, KernelError::ConduitClosed(conduit)));
            }
        }
        self.events.push(IpcEvent::EndpointClosed { conduit, side });

        if entry.endpoints[0].closed && entry.endpoints[1].closed {
            if let Some(removed) = self.conduits.remove(&conduit) {
                for queue in removed.queues {
                    effects.discarded.extend(queue);
                }
            }
            effects.removed = true;
            self.events.push(IpcEvent::Removed { conduit });
        }
        effects
    }

    /// Whether any quantum still has a message or wait pending that
    /// references the given quantum as a sender
    pub fn has_pending_from(&self, quantum: QuantumId) -> bool {
        self.conduits.values().any(|conduit| {
            conduit
                .awaiting_consume
                .values()
                .any(|sender| *sender == quantum)
                || conduit.deferred.iter().any(|d| d.sender == quantum)
                || conduit
                    .parked_senders
                    .iter()
                    .any(|parked| parked.iter().any(|(sender, _)| *sender == quantum))
                || conduit
                    .queues
                    .iter()
                    .any(|queue| queue.iter().any(|m| m.sender == quantum))
        })
    }

    fn conduit_ref(&self, conduit: ConduitId) -> Result<&Conduit, KernelError> {
        self.conduits
            .get(&conduit)
            .ok_or(KernelError::ConduitOrphaned(conduit))
    }

    fn conduit_mut(&mut self, conduit: ConduitId) -> Result<&mut Conduit, KernelError> {
        self.conduits
            .get_mut(&conduit)
            .ok_or(KernelError::ConduitOrphaned(conduit))
    }

    pub fn events(&self) -> &[IpcEvent] {
        &self.events
    }

    pub fn has_event(&self, predicate: impl Fn(&IpcEvent) -> bool) -> bool {
        self.events.iter().any(predicate)
    }

    pub fn count_events(&self, predicate: impl Fn(&IpcEvent) -> bool) -> usize {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (ConduitManager, ConduitId, QuantumId, QuantumId) {
        let mut manager = ConduitManager::new(4);
        let conduit = manager.create();
        let sender = QuantumId::new();
        let receiver = QuantumId::new();
        manager.connect(conduit, sender).unwrap();
        manager.connect(conduit, receiver).unwrap();
        (manager, conduit, sender, receiver)
    }

    fn send(
        manager: &mut ConduitManager,
        conduit: ConduitId,
        sender: QuantumId,
        bytes: &[u8],
        mode: IpcMode,
    ) -> Result<EnqueueOutcome, KernelError> {
        let side = manager.side_of(conduit, sender)?;
        let message = Message::inline(sender, 0, bytes.to_vec());
        manager.enqueue(conduit, side, message, mode)
    }

    #[test]
    fn test_fifo_order_per_direction() {
        let (mut manager, conduit, sender, receiver) = setup();
        for byte in [1u8, 2, 3] {
            send(&mut manager, conduit, sender, &[byte], IpcMode::NonBlocking).unwrap();
        }
        for expected in [1u8, 2, 3] {
            match manager.receive(conduit, receiver, IpcMode::NonBlocking).unwrap() {
                ReceiveOutcome::Delivered { message, .. } => {
                    assert_eq!(message.inline_bytes(), Some([expected].as_slice()));
                }
                ReceiveOutcome::Parked => panic!("expected a message"),
            }
        }
    }

    #[test]
    fn test_third_endpoint_rejected() {
        let (mut manager, conduit, _, _) = setup();
        let err = manager.connect(conduit, QuantumId::new()).unwrap_err();
        assert!(matches!(err, KernelError::ConduitFull(_)));
    }

    #[test]
    fn test_nonblocking_receive_on_empty_would_block() {
        let (mut manager, conduit, _, receiver) = setup();
        let err = manager
            .receive(conduit, receiver, IpcMode::NonBlocking)
            .unwrap_err();
        assert!(matches!(err, KernelError::WouldBlock));
    }

    #[test]
    fn test_nonblocking_send_on_full_queue_would_block() {
        let (mut manager, conduit, sender, receiver) = setup();
        for _ in 0..4 {
            send(&mut manager, conduit, sender, b"x", IpcMode::NonBlocking).unwrap();
        }
        let err = send(&mut manager, conduit, sender, b"x", IpcMode::NonBlocking).unwrap_err();
        assert!(matches!(err, KernelError::WouldBlock));
        // Draining one slot makes the same send succeed.
        manager
            .receive(conduit, receiver, IpcMode::NonBlocking)
            .unwrap();
        send(&mut manager, conduit, sender, b"x", IpcMode::NonBlocking).unwrap();
    }

    #[test]
    fn test_blocking_send_parks_on_full_and_preserves_order() {
        let (mut manager, conduit, sender, receiver) = setup();
        for byte in 0..4u8 {
            send(&mut manager, conduit, sender, &[byte], IpcMode::NonBlocking).unwrap();
        }
        let outcome = send(&mut manager, conduit, sender, &[9], IpcMode::Blocking).unwrap();
        assert_eq!(outcome, EnqueueOutcome::ParkedFull);

        // Draining the queue pulls the parked message in behind.
        let mut seen = Vec::new();
        for _ in 0..5 {
            match manager.receive(conduit, receiver, IpcMode::NonBlocking).unwrap() {
                ReceiveOutcome::Delivered { message, .. } => {
                    seen.push(message.inline_bytes().unwrap()[0])
                }
                ReceiveOutcome::Parked => panic!("expected a message"),
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 9]);
    }

    #[test]
    fn test_blocking_sender_woken_on_consume() {
        let (mut manager, conduit, sender, receiver) = setup();
        send(&mut manager, conduit, sender, b"PING", IpcMode::Blocking).unwrap();
        match manager.receive(conduit, receiver, IpcMode::NonBlocking).unwrap() {
            ReceiveOutcome::Delivered { wake_sender, .. } => {
                assert_eq!(wake_sender, Some(sender));
            }
            ReceiveOutcome::Parked => panic!("expected a message"),
        }
    }

    #[test]
    fn test_parked_receiver_woken_on_send() {
        let (mut manager, conduit, sender, receiver) = setup();
        assert_eq!(
            manager.receive(conduit, receiver, IpcMode::Blocking).unwrap(),
            ReceiveOutcome::Parked
        );
        match send(&mut manager, conduit, sender, b"hi", IpcMode::NonBlocking).unwrap() {
            EnqueueOutcome::Queued { wake_receiver } => {
                assert_eq!(wake_receiver, Some(receiver));
            }
            EnqueueOutcome::ParkedFull => panic!("queue is not full"),
        }
    }

    #[test]
    fn test_deferred_send_replayed_on_connect() {
        let mut manager = ConduitManager::new(4);
        let conduit = manager.create();
        let sender = QuantumId::new();
        manager.connect(conduit, sender).unwrap();
        manager
            .defer_send(
                conduit,
                DeferredSend {
                    sender,
                    tag: 7,
                    bytes: b"early".to_vec(),
                    deadline: None,
                },
            )
            .unwrap();
        let receiver = QuantumId::new();
        let replay = manager.connect(conduit, receiver).unwrap();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].tag, 7);
        assert_eq!(replay[0].bytes, b"early");
    }

    #[test]
    fn test_close_wakes_parked_peer_receiver() {
        let (mut manager, conduit, sender, receiver) = setup();
        manager.receive(conduit, receiver, IpcMode::Blocking).unwrap();
        let effects = manager.close_endpoint(conduit, sender).unwrap();
        assert!(effects
            .woken
            .iter()
            .any(|(q, e)| *q == receiver && matches!(e, KernelError::ConduitClosed(_))));
        assert!(!effects.removed);
    }

    #[test]
    fn test_close_drains_before_reporting_closed() {
        let (mut manager, conduit, sender, receiver) = setup();
        send(&mut manager, conduit, sender, b"last", IpcMode::NonBlocking).unwrap();
        manager.close_endpoint(conduit, sender).unwrap();
        // The queued message is still deliverable.
        match manager.receive(conduit, receiver, IpcMode::NonBlocking).unwrap() {
            ReceiveOutcome::Delivered { message, .. } => {
                assert_eq!(message.inline_bytes(), Some(b"last".as_slice()));
            }
            ReceiveOutcome::Parked => panic!("expected a message"),
        }
        let err = manager
            .receive(conduit, receiver, IpcMode::Blocking)
            .unwrap_err();
        assert!(matches!(err, KernelError::ConduitClosed(_)));
    }

    #[test]
    fn test_send_toward_closed_peer_fails() {
        let (mut manager, conduit, sender, receiver) = setup();
        manager.close_endpoint(conduit, receiver).unwrap();
        let side = manager.side_of(conduit, sender).unwrap();
        let err = manager.peer_of(conduit, side).unwrap_err();
        assert!(matches!(err, KernelError::ConduitClosed(_)));
    }

    #[test]
    fn test_both_closed_removes_conduit() {
        let (mut manager, conduit, sender, receiver) = setup();
        manager.close_endpoint(conduit, sender).unwrap();
        let effects = manager.close_endpoint(conduit, receiver).unwrap();
        assert!(effects.removed);
        let err = manager
            .receive(conduit, receiver, IpcMode::NonBlocking)
            .unwrap_err();
        assert!(matches!(err, KernelError::ConduitOrphaned(_)));
    }

    #[test]
    fn test_unconnected_quantum_cannot_receive() {
        let (mut manager, conduit, _, _) = setup();
        let stranger = QuantumId::new();
        let err = manager
            .receive(conduit, stranger, IpcMode::Blocking)
            .unwrap_err();
        assert!(matches!(err, KernelError::NotConnected(_, q) if q == stranger));
    }

    #[test]
    fn test_cancel_wait_for_parked_receiver() {
        let (mut manager, conduit, sender, receiver) = setup();
        manager.receive(conduit, receiver, IpcMode::Blocking).unwrap();
        assert_eq!(
            manager.cancel_wait(conduit, receiver),
            Some(CancelledWait::Receiver)
        );
        // A later send finds no one waiting.
        match send(&mut manager, conduit, sender, b"x", IpcMode::NonBlocking).unwrap() {
            EnqueueOutcome::Queued { wake_receiver } => assert_eq!(wake_receiver, None),
            EnqueueOutcome::ParkedFull => panic!("queue is not full"),
        }
    }

    #[test]
    fn test_cancel_wait_for_parked_sender_returns_message() {
        let (mut manager, conduit, sender, _) = setup();
        for _ in 0..4 {
            send(&mut manager, conduit, sender, b"x", IpcMode::NonBlocking).unwrap();
        }
        send(&mut manager, conduit, sender, b"late", IpcMode::Blocking).unwrap();
        match manager.cancel_wait(conduit, sender) {
            Some(CancelledWait::ParkedSend(message)) => {
                assert_eq!(message.inline_bytes(), Some(b"late".as_slice()));
            }
            other => panic!("unexpected cancel result: {:?}", other),
        }
    }

    #[test]
    fn test_close_all_for_covers_every_conduit() {
        let mut manager = ConduitManager::new(4);
        let q = QuantumId::new();
        let c1 = manager.create();
        let c2 = manager.create();
        manager.connect(c1, q).unwrap();
        manager.connect(c2, q).unwrap();
        let effects = manager.close_all_for(q);
        assert_eq!(effects.len(), 2);
    }

    #[test]
    fn test_has_pending_from_tracks_queued_messages() {
        let (mut manager, conduit, sender, receiver) = setup();
        assert!(!manager.has_pending_from(sender));
        send(&mut manager, conduit, sender, b"x", IpcMode::NonBlocking).unwrap();
        assert!(manager.has_pending_from(sender));
        manager.receive(conduit, receiver, IpcMode::NonBlocking).unwrap();
        assert!(!manager.has_pending_from(sender));
    }
}

//! # Packet Dispatcher
//!
//! Routes inbound packets to one-shot awaiters (optionally predicated) or to
//! registered default handlers, with bounded latency under backpressure.
//!
//! ## Concurrency design
//! Producers never touch the routing tables directly. Each of the four kinds
//! of input (packets, plain awaiters, filtered awaiters, handler
//! registrations) is staged through its own single-consumer channel paired
//! with an "updated" flag. One background task drains the staged entries into
//! committed maps and then runs a matching pass, so all table access is
//! single-threaded and lock-free.
//!
//! ## Delivery order, per packet id
//! 1. First filtered awaiter whose predicate matches (registration order).
//! 2. Front of the plain-awaiter FIFO.
//! 3. Default handlers in registration order, gated on packet age reaching
//!    the handler's delay; too-young packets schedule a wake-up instead.
//! 4. TTL expiry: packets that outlive `ttl_seconds` are silently dropped.
//!
//! Unmatched packets stay in the pending map until delivered or expired.
//! Across different ids, no ordering is guaranteed.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, trace, warn};

use crate::core::packet::{monotonic_seconds, Envelope, PacketId, PacketKind};
use crate::utils::backoff::ExponentialBackoff;

type BoxedPredicate = Box<dyn Fn(&Envelope) -> bool + Send>;
type BoxedHandler = Box<dyn FnMut(Envelope) + Send>;

struct FilteredAwaiter {
    predicate: BoxedPredicate,
    sender: oneshot::Sender<Envelope>,
}

struct HandlerEntry {
    delay_seconds: f32,
    predicate: Option<BoxedPredicate>,
    handler: BoxedHandler,
}

/// Staging input: an unbounded single-consumer channel plus an updated flag
/// the dispatch loop uses to skip draining untouched stages.
struct Stage<T> {
    tx: mpsc::UnboundedSender<T>,
    updated: Arc<AtomicBool>,
}

impl<T> Stage<T> {
    fn channel() -> (Self, mpsc::UnboundedReceiver<T>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let updated = Arc::new(AtomicBool::new(false));
        (
            Self {
                tx,
                updated: updated.clone(),
            },
            rx,
            updated,
        )
    }

    fn push(&self, item: T) {
        if self.tx.send(item).is_ok() {
            self.updated.store(true, Ordering::Release);
        }
    }
}

/// Asynchronous packet routing for one connection or one process.
///
/// Create with [`PacketDispatcher::start`], feed it with
/// [`enqueue_packet`](Self::enqueue_packet) (typically from a session's
/// receiver callback), and consume with [`await_packet`](Self::await_packet)
/// or long-lived default handlers.
pub struct PacketDispatcher {
    packets: Stage<Envelope>,
    awaiters: Stage<(PacketId, oneshot::Sender<Envelope>)>,
    filtered: Stage<(PacketId, FilteredAwaiter)>,
    handlers: Stage<(PacketId, HandlerEntry)>,
    shutdown: Arc<AtomicBool>,
}

impl PacketDispatcher {
    /// Create a dispatcher and spawn its delivery loop on the current
    /// runtime.
    pub fn start() -> Arc<Self> {
        let (packets, packet_rx, packet_updated) = Stage::channel();
        let (awaiters, awaiter_rx, awaiter_updated) = Stage::channel();
        let (filtered, filtered_rx, filtered_updated) = Stage::channel();
        let (handlers, handler_rx, handler_updated) = Stage::channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let dispatch = DispatchLoop {
            packet_rx,
            packet_updated,
            awaiter_rx,
            awaiter_updated,
            filtered_rx,
            filtered_updated,
            handler_rx,
            handler_updated,
            shutdown: shutdown.clone(),
            pending: HashMap::new(),
            awaiters: HashMap::new(),
            filtered: HashMap::new(),
            handlers: HashMap::new(),
        };
        tokio::spawn(dispatch.run());

        Arc::new(Self {
            packets,
            awaiters,
            filtered,
            handlers,
            shutdown,
        })
    }

    /// Stage an envelope for the next delivery pass. Non-blocking.
    pub fn enqueue_packet(&self, envelope: Envelope) {
        trace!(packet_id = %envelope.id(), "enqueuing packet");
        self.packets.push(envelope);
    }

    /// Wait for the next packet of type `T`.
    ///
    /// `timeout` of `None` (or zero) waits indefinitely; otherwise the call
    /// resolves to `None` once the deadline passes.
    pub async fn await_packet<T: PacketKind>(&self, timeout: Option<Duration>) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.awaiters.push((T::ID, tx));
        debug!(packet_id = %T::ID, "waiting for packet");
        Self::resolve::<T>(rx, timeout).await
    }

    /// Wait for the next packet of type `T` that satisfies `predicate`.
    ///
    /// Filtered awaiters take precedence over plain awaiters for the same
    /// packet id.
    pub async fn await_packet_filtered<T, P>(
        &self,
        predicate: P,
        timeout: Option<Duration>,
    ) -> Option<T>
    where
        T: PacketKind,
        P: Fn(&T) -> bool + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let predicate: BoxedPredicate =
            Box::new(move |env| env.body_ref::<T>().map(&predicate).unwrap_or(false));
        self.filtered.push((
            T::ID,
            FilteredAwaiter {
                predicate,
                sender: tx,
            },
        ));
        debug!(packet_id = %T::ID, "waiting for filtered packet");
        Self::resolve::<T>(rx, timeout).await
    }

    /// Register a long-lived sink for packets of type `T` that no awaiter
    /// claims.
    pub fn register_default_handler<T, F>(&self, handler: F)
    where
        T: PacketKind,
        F: FnMut(T) + Send + 'static,
    {
        self.register_handler_entry::<T>(Self::wrap_handler(handler), None, 0.0);
    }

    /// Register a default handler with a predicate and a minimum packet age.
    ///
    /// `delay_seconds` is how old a packet must be before the handler may
    /// fire, which gives racing awaiter registrations a head start.
    pub fn register_default_handler_with<T, F, P>(
        &self,
        handler: F,
        predicate: P,
        delay_seconds: f32,
    ) where
        T: PacketKind,
        F: FnMut(T) + Send + 'static,
        P: Fn(&T) -> bool + Send + 'static,
    {
        let predicate: BoxedPredicate =
            Box::new(move |env| env.body_ref::<T>().map(&predicate).unwrap_or(false));
        self.register_handler_entry::<T>(
            Self::wrap_handler(handler),
            Some(predicate),
            delay_seconds,
        );
    }

    fn wrap_handler<T, F>(mut handler: F) -> BoxedHandler
    where
        T: PacketKind,
        F: FnMut(T) + Send + 'static,
    {
        Box::new(move |env: Envelope| match env.downcast::<T>() {
            Ok(packet) => handler(packet),
            Err(env) => warn!(packet_id = %env.id(), "handler offered mismatched packet type"),
        })
    }

    fn register_handler_entry<T: PacketKind>(
        &self,
        handler: BoxedHandler,
        predicate: Option<BoxedPredicate>,
        delay_seconds: f32,
    ) {
        trace!(packet_id = %T::ID, delay_seconds, "registering default handler");
        self.handlers.push((
            T::ID,
            HandlerEntry {
                delay_seconds,
                predicate,
                handler,
            },
        ));
    }

    async fn resolve<T: PacketKind>(
        rx: oneshot::Receiver<Envelope>,
        timeout: Option<Duration>,
    ) -> Option<T> {
        let envelope = match timeout {
            Some(deadline) if deadline > Duration::ZERO => {
                match tokio::time::timeout(deadline, rx).await {
                    Ok(Ok(env)) => env,
                    Ok(Err(_)) => return None,
                    Err(_) => {
                        warn!(packet_id = %T::ID, "timed out waiting for packet");
                        return None;
                    }
                }
            }
            _ => rx.await.ok()?,
        };
        match envelope.downcast::<T>() {
            Ok(packet) => Some(packet),
            Err(env) => {
                warn!(packet_id = %env.id(), "awaiter resolved with mismatched packet type");
                None
            }
        }
    }
}

impl Drop for PacketDispatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

struct DispatchLoop {
    packet_rx: mpsc::UnboundedReceiver<Envelope>,
    packet_updated: Arc<AtomicBool>,
    awaiter_rx: mpsc::UnboundedReceiver<(PacketId, oneshot::Sender<Envelope>)>,
    awaiter_updated: Arc<AtomicBool>,
    filtered_rx: mpsc::UnboundedReceiver<(PacketId, FilteredAwaiter)>,
    filtered_updated: Arc<AtomicBool>,
    handler_rx: mpsc::UnboundedReceiver<(PacketId, HandlerEntry)>,
    handler_updated: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,

    pending: HashMap<PacketId, Vec<Envelope>>,
    awaiters: HashMap<PacketId, VecDeque<oneshot::Sender<Envelope>>>,
    filtered: HashMap<PacketId, Vec<FilteredAwaiter>>,
    handlers: HashMap<PacketId, Vec<HandlerEntry>>,
}

impl DispatchLoop {
    #[instrument(name = "dispatcher", skip_all)]
    async fn run(mut self) {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_micros(1),
            Duration::from_micros(500),
            2.0,
            32.0,
            0.1,
        );
        // Absolute monotonic instant of the earliest pending handler delay
        // or TTL expiry; infinity when nothing is scheduled.
        let mut next_wake = f32::INFINITY;

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                debug!("dispatcher shutting down");
                break;
            }

            let updated = self.drain_inputs();

            if !updated {
                if next_wake <= monotonic_seconds() {
                    next_wake = f32::INFINITY;
                    self.pass(false, &mut next_wake);
                }

                let mut delay = backoff.delay();
                if next_wake.is_finite() {
                    let until = Duration::from_secs_f32(
                        (next_wake - monotonic_seconds()).max(1e-6),
                    );
                    delay = delay.min(until);
                }
                tokio::time::sleep(delay).await;
                backoff.increase();
                continue;
            }

            next_wake = f32::INFINITY;
            self.pass(true, &mut next_wake);
            backoff.decrease();
        }
    }

    /// Move staged entries into the committed maps. Returns whether anything
    /// changed.
    fn drain_inputs(&mut self) -> bool {
        let mut any = false;

        if self.packet_updated.swap(false, Ordering::AcqRel) {
            while let Ok(env) = self.packet_rx.try_recv() {
                self.pending.entry(env.id()).or_default().push(env);
                any = true;
            }
        }
        if self.awaiter_updated.swap(false, Ordering::AcqRel) {
            while let Ok((id, sender)) = self.awaiter_rx.try_recv() {
                self.awaiters.entry(id).or_default().push_back(sender);
                any = true;
            }
        }
        if self.filtered_updated.swap(false, Ordering::AcqRel) {
            while let Ok((id, awaiter)) = self.filtered_rx.try_recv() {
                self.filtered.entry(id).or_default().push(awaiter);
                any = true;
            }
        }
        if self.handler_updated.swap(false, Ordering::AcqRel) {
            while let Ok((id, entry)) = self.handler_rx.try_recv() {
                self.handlers.entry(id).or_default().push(entry);
                any = true;
            }
        }

        any
    }

    /// One matching pass over every pending packet.
    ///
    /// `offer_to_awaiters` is false on wake-up passes, which exist only to
    /// fire age-gated handlers and expire packets; awaiter registration
    /// always triggers a full pass through the updated flags.
    fn pass(&mut self, offer_to_awaiters: bool, next_wake: &mut f32) {
        let ids: Vec<PacketId> = self.pending.keys().copied().collect();
        for id in ids {
            let Some(queue) = self.pending.get_mut(&id) else {
                continue;
            };
            let packets = std::mem::take(queue);
            for envelope in packets {
                if let Some(kept) = self.offer(id, envelope, offer_to_awaiters, next_wake) {
                    // Delivery order within an id is arrival order, so kept
                    // packets go back in sequence.
                    self.pending.entry(id).or_default().push(kept);
                }
            }
        }
        self.pending.retain(|_, v| !v.is_empty());
        self.awaiters.retain(|_, v| !v.is_empty());
        self.filtered.retain(|_, v| !v.is_empty());
    }

    /// Try to deliver one envelope. Returns the envelope back when no
    /// destination consumed it and it has not expired.
    fn offer(
        &mut self,
        id: PacketId,
        mut envelope: Envelope,
        offer_to_awaiters: bool,
        next_wake: &mut f32,
    ) -> Option<Envelope> {
        if offer_to_awaiters {
            // Filtered awaiters: first matching predicate wins.
            if let Some(list) = self.filtered.get_mut(&id) {
                let mut i = 0;
                while i < list.len() {
                    if list[i].sender.is_closed() {
                        list.remove(i);
                        continue;
                    }
                    if !check_predicate(&list[i].predicate, &envelope) {
                        i += 1;
                        continue;
                    }
                    let awaiter = list.remove(i);
                    match awaiter.sender.send(envelope) {
                        Ok(()) => {
                            trace!(packet_id = %id, "fulfilled filtered awaiter");
                            return None;
                        }
                        // The future was dropped between the check and the
                        // send; reclaim the packet and keep looking.
                        Err(returned) => envelope = returned,
                    }
                }
            }

            // Plain awaiters: FIFO in registration order.
            if let Some(queue) = self.awaiters.get_mut(&id) {
                while let Some(sender) = queue.pop_front() {
                    match sender.send(envelope) {
                        Ok(()) => {
                            trace!(packet_id = %id, "fulfilled awaiter");
                            return None;
                        }
                        Err(returned) => envelope = returned,
                    }
                }
            }
        }

        // Default handlers in registration order, age-gated.
        if let Some(entries) = self.handlers.get_mut(&id) {
            let age = envelope.age();
            for entry in entries.iter_mut() {
                if entry.delay_seconds > age {
                    let wake = monotonic_seconds() + (entry.delay_seconds - age);
                    *next_wake = next_wake.min(wake);
                    continue;
                }
                if let Some(predicate) = &entry.predicate {
                    if !check_predicate(predicate, &envelope) {
                        continue;
                    }
                }
                invoke_handler(&mut entry.handler, envelope);
                trace!(packet_id = %id, "fulfilled default handler");
                return None;
            }
        }

        if envelope.expired() {
            trace!(packet_id = %id, age = envelope.age(), "dropping expired packet");
            return None;
        }

        // Schedule a wake for this packet's expiry so it does not linger
        // once its TTL runs out.
        *next_wake = next_wake.min(envelope.created_at() + envelope.ttl_seconds());
        Some(envelope)
    }
}

/// Run a user predicate, treating a panic as "no match".
fn check_predicate(predicate: &BoxedPredicate, envelope: &Envelope) -> bool {
    catch_unwind(AssertUnwindSafe(|| predicate(envelope))).unwrap_or_else(|_| {
        warn!(packet_id = %envelope.id(), "packet predicate panicked; treating as no match");
        false
    })
}

/// Run a user handler, treating a panic as a completed delivery.
fn invoke_handler(handler: &mut BoxedHandler, envelope: Envelope) {
    let id = envelope.id();
    if catch_unwind(AssertUnwindSafe(|| handler(envelope))).is_err() {
        warn!(packet_id = %id, "packet handler panicked; packet counted as delivered");
    }
}

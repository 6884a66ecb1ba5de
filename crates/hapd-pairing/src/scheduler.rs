//! Cooperative single-threaded event scheduler.
//!
//! Events wait in a FIFO queue. Each [`Scheduler::tick`] takes exactly one
//! event, hands it to every listener subscribed to its kind in registration
//! order, then runs the completion attached at emission time. Listeners may
//! emit further events; those go to the back of the queue.

use std::collections::VecDeque;

use crate::event::{Event, EventKind};

/// Callback invoked for each dispatched event of a subscribed kind.
pub type Listener<C> = Box<dyn FnMut(&mut C, &Event, &mut EventQueue<C>)>;

/// One-shot callback run after all listeners saw its event.
pub type Completion<C> = Box<dyn FnOnce(&mut C, &Event)>;

/// Registration handle returned by [`Scheduler::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Envelope<C> {
    event: Event,
    completion: Option<Completion<C>>,
}

/// Pending events. Listeners receive it to emit follow-up events.
pub struct EventQueue<C> {
    pending: VecDeque<Envelope<C>>,
}

impl<C> Default for EventQueue<C> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }
}

impl<C> EventQueue<C> {
    pub fn emit(&mut self, event: Event) {
        self.pending.push_back(Envelope {
            event,
            completion: None,
        });
    }

    pub fn emit_with<F>(&mut self, event: Event, completion: F)
    where
        F: FnOnce(&mut C, &Event) + 'static,
    {
        self.pending.push_back(Envelope {
            event,
            completion: Some(Box::new(completion)),
        });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Events waiting, front first.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.pending.iter().map(|envelope| &envelope.event)
    }

    fn pop(&mut self) -> Option<Envelope<C>> {
        self.pending.pop_front()
    }
}

/// FIFO event loop over a context `C`.
pub struct Scheduler<C> {
    listeners: Vec<(ListenerId, EventKind, Listener<C>)>,
    queue: EventQueue<C>,
    next_listener: u64,
    dispatched: u64,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            queue: EventQueue::default(),
            next_listener: 0,
            dispatched: 0,
        }
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `listener` to events of `kind`.
    pub fn on<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&mut C, &Event, &mut EventQueue<C>) + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, kind, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false when it was not registered.
    pub fn off(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn emit(&mut self, event: Event) {
        self.queue.emit(event);
    }

    pub fn emit_with<F>(&mut self, event: Event, completion: F)
    where
        F: FnOnce(&mut C, &Event) + 'static,
    {
        self.queue.emit_with(event, completion);
    }

    /// Dispatch one event. Returns false when the queue was empty.
    pub fn tick(&mut self, ctx: &mut C) -> bool {
        let Some(envelope) = self.queue.pop() else {
            return false;
        };

        let kind = envelope.event.kind();
        let Self {
            listeners, queue, ..
        } = self;
        for (_, listener_kind, listener) in listeners.iter_mut() {
            if *listener_kind == kind {
                listener(ctx, &envelope.event, queue);
            }
        }
        if let Some(completion) = envelope.completion {
            completion(ctx, &envelope.event);
        }

        self.dispatched += 1;
        true
    }

    /// Tick until the queue drains. Returns the number of events dispatched.
    pub fn run_until_idle(&mut self, ctx: &mut C) -> usize {
        let mut count = 0;
        while self.tick(ctx) {
            count += 1;
        }
        count
    }

    /// Tick at most `max` times.
    pub fn run_for(&mut self, ctx: &mut C, max: usize) -> usize {
        let mut count = 0;
        while count < max && self.tick(ctx) {
            count += 1;
        }
        count
    }

    /// Drop every pending event without dispatching it.
    ///
    /// Completions still run so their owners learn the event is gone.
    pub fn clear(&mut self, ctx: &mut C) -> usize {
        let mut dropped = 0;
        while let Some(envelope) = self.queue.pop() {
            if let Some(completion) = envelope.completion {
                completion(ctx, &envelope.event);
            }
            dropped += 1;
        }
        dropped
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn queue(&self) -> &EventQueue<C> {
        &self.queue
    }

    /// Total events dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ConnectionId, JobId};

    type Log = Vec<String>;

    fn conn(n: u64) -> ConnectionId {
        ConnectionId(n)
    }

    mod dispatch {
        use super::*;

        #[test]
        fn tick_on_empty_queue_is_noop() {
            let mut scheduler: Scheduler<Log> = Scheduler::new();
            let mut log = Log::new();
            assert!(!scheduler.tick(&mut log));
            assert_eq!(scheduler.dispatched(), 0);
        }

        #[test]
        fn one_event_per_tick_in_fifo_order() {
            let mut scheduler: Scheduler<Log> = Scheduler::new();
            scheduler.on(EventKind::Connected, |log: &mut Log, event, _| {
                log.push(format!("{:?}", event.connection()));
            });
            scheduler.emit(Event::Connected(conn(1)));
            scheduler.emit(Event::Connected(conn(2)));

            let mut log = Log::new();
            assert!(scheduler.tick(&mut log));
            assert_eq!(log.len(), 1);
            assert_eq!(scheduler.pending(), 1);
            scheduler.tick(&mut log);
            assert_eq!(
                log,
                vec!["Some(ConnectionId(1))", "Some(ConnectionId(2))"]
            );
        }

        #[test]
        fn listeners_run_in_registration_order_then_completion() {
            let mut scheduler: Scheduler<Log> = Scheduler::new();
            scheduler.on(EventKind::KeypairNeeded, |log: &mut Log, _, _| log.push("first".into()));
            scheduler.on(EventKind::KeypairNeeded, |log: &mut Log, _, _| log.push("second".into()));
            scheduler.on(EventKind::Connected, |log: &mut Log, _, _| log.push("other".into()));
            scheduler.emit_with(Event::KeypairNeeded, |log: &mut Log, _| {
                log.push("done".into())
            });

            let mut log = Log::new();
            scheduler.run_until_idle(&mut log);
            assert_eq!(log, vec!["first", "second", "done"]);
        }

        #[test]
        fn emitted_events_go_to_the_back() {
            let mut scheduler: Scheduler<Log> = Scheduler::new();
            scheduler.on(EventKind::ExpModStep, |log: &mut Log, event, queue| {
                if let Event::ExpModStep(JobId(n)) = event {
                    log.push(format!("step {}", n));
                    if *n < 3 {
                        queue.emit(Event::ExpModStep(JobId(n + 1)));
                    }
                }
            });
            scheduler.on(EventKind::Connected, |log: &mut Log, _, _| log.push("connected".into()));
            scheduler.emit(Event::ExpModStep(JobId(1)));
            scheduler.emit(Event::Connected(conn(5)));

            let mut log = Log::new();
            assert_eq!(scheduler.run_until_idle(&mut log), 4);
            assert_eq!(log, vec!["step 1", "connected", "step 2", "step 3"]);
        }

        #[test]
        fn run_for_limits_ticks() {
            let mut scheduler: Scheduler<Log> = Scheduler::new();
            for n in 0..5 {
                scheduler.emit(Event::Connected(conn(n)));
            }
            let mut log = Log::new();
            assert_eq!(scheduler.run_for(&mut log, 3), 3);
            assert_eq!(scheduler.pending(), 2);
        }
    }

    mod registration {
        use super::*;

        #[test]
        fn off_removes_listener() {
            let mut scheduler: Scheduler<Log> = Scheduler::new();
            let id = scheduler.on(EventKind::Connected, |log: &mut Log, _, _| log.push("x".into()));
            assert!(scheduler.off(id));
            assert!(!scheduler.off(id));

            scheduler.emit(Event::Connected(conn(1)));
            let mut log = Log::new();
            scheduler.run_until_idle(&mut log);
            assert!(log.is_empty());
        }
    }

    mod clearing {
        use super::*;

        #[test]
        fn clear_runs_completions_without_listeners() {
            let mut scheduler: Scheduler<Log> = Scheduler::new();
            scheduler.on(EventKind::Disconnected, |log: &mut Log, _, _| log.push("listener".into()));
            scheduler.emit_with(Event::Disconnected(conn(1)), |log: &mut Log, _| {
                log.push("completion".into())
            });
            scheduler.emit(Event::Disconnected(conn(2)));

            let mut log = Log::new();
            assert_eq!(scheduler.clear(&mut log), 2);
            assert_eq!(log, vec!["completion"]);
            assert_eq!(scheduler.pending(), 0);
        }
    }
}

//! Accessory context: one scheduler driving one pairing manager.

use hapd_core::config::AccessoryConfig;
use hapd_core::error::Result;
use hapd_pairing::{
    flush, ConnectionId, Event, EventKind, EventQueue, FileStore, ListenerId, MemoryStore,
    Outbound, PairSession, PairingManager, PairingStore, Route, Scheduler, Transport,
};

/// Pairing core of a single accessory.
///
/// The transport feeds connections, requests and frames in; [`Accessory::handle`]
/// or [`Accessory::run_until_idle`] drives the resulting events; queued
/// responses and frames leave through [`Accessory::flush`].
pub struct Accessory {
    scheduler: Scheduler<PairingManager>,
    manager: PairingManager,
}

impl Accessory {
    /// Create an accessory over `store`.
    ///
    /// When the store holds no long-term keys, generating them is the first
    /// queued event.
    pub fn new(config: AccessoryConfig, store: Box<dyn PairingStore>) -> Result<Self> {
        config.validate()?;
        let manager = PairingManager::new(config, store)?;

        let mut scheduler = Scheduler::new();
        for kind in EventKind::ALL {
            scheduler.on(kind, |manager: &mut PairingManager, event, queue| {
                manager.handle_event(event, queue)
            });
        }
        if manager.needs_keypair() {
            scheduler.emit(Event::KeypairNeeded);
        }

        tracing::info!(
            accessory_id = %manager.config().accessory_id,
            name = %manager.config().device_name,
            pairings = manager.store().peer_count(),
            "Accessory ready"
        );
        Ok(Self { scheduler, manager })
    }

    /// Create an accessory with the store `config` asks for: a file image at
    /// `storage_path`, or memory when unset.
    pub fn open(config: AccessoryConfig) -> Result<Self> {
        let store: Box<dyn PairingStore> = match &config.storage_path {
            Some(path) => Box::new(FileStore::open(path)?.with_capacity(config.max_peers)),
            None => Box::new(MemoryStore::with_capacity(config.max_peers)),
        };
        Self::new(config, store)
    }

    /// Observe events of `kind` after the pairing manager has handled them.
    pub fn on<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&mut PairingManager, &Event, &mut EventQueue<PairingManager>) + 'static,
    {
        self.scheduler.on(kind, listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.scheduler.off(id)
    }

    /// Track a new connection.
    pub fn connect(&mut self, conn: ConnectionId) {
        self.manager.connect(conn);
        self.scheduler.emit(Event::Connected(conn));
    }

    /// Queue a handshake request posted to `route`.
    pub fn receive(&mut self, conn: ConnectionId, route: Route, body: impl Into<Vec<u8>>) {
        self.scheduler.emit(Event::RequestReceived {
            conn,
            route,
            body: body.into(),
        });
    }

    /// Drop a connection immediately, with its pending work and output.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        self.manager.disconnect(conn);
        self.scheduler.emit(Event::Disconnected(conn));
    }

    /// Queue application bytes for encryption to a verified controller.
    pub fn send_frame(&mut self, conn: ConnectionId, plaintext: impl Into<Vec<u8>>) -> Result<()> {
        if let Some(event) = self.manager.send_frame(conn, plaintext.into())? {
            self.scheduler.emit(event);
        }
        Ok(())
    }

    /// Queue bytes read from a verified connection for decryption.
    pub fn receive_frame(&mut self, conn: ConnectionId, bytes: impl Into<Vec<u8>>) -> Result<()> {
        if let Some(event) = self.manager.receive_frame(conn, bytes.into())? {
            self.scheduler.emit(event);
        }
        Ok(())
    }

    /// Plaintext decrypted from `conn` so far.
    pub fn take_inbound(&mut self, conn: ConnectionId) -> Vec<u8> {
        self.manager.take_inbound(conn)
    }

    /// Dispatch one event. Returns false when nothing was queued.
    pub fn handle(&mut self) -> bool {
        self.scheduler.tick(&mut self.manager)
    }

    /// Dispatch events until the queue is empty.
    pub fn run_until_idle(&mut self) -> usize {
        self.scheduler.run_until_idle(&mut self.manager)
    }

    /// Events waiting for dispatch.
    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    /// Take every queued response, frame and close.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        self.manager.outbox_mut().drain()
    }

    /// Hand queued output to `transport`, in order.
    pub async fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<usize> {
        flush(self.manager.outbox_mut(), transport).await
    }

    /// Forget a paired controller; its verified connections are closed.
    pub fn remove_pairing(&mut self, peer_id: &[u8]) -> Result<bool> {
        self.manager.remove_pairing(peer_id)
    }

    pub fn session(&self, conn: ConnectionId) -> Option<&PairSession> {
        self.manager.session(conn)
    }

    pub fn manager(&self) -> &PairingManager {
        &self.manager
    }

    pub fn config(&self) -> &AccessoryConfig {
        self.manager.config()
    }

    /// Drop queued events, running their completions, and every session.
    pub fn shutdown(&mut self) -> usize {
        let dropped = self.scheduler.clear(&mut self.manager);
        self.manager.disconnect_all();
        tracing::info!(dropped, "Accessory shut down");
        dropped
    }
}

impl std::fmt::Debug for Accessory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessory")
            .field("accessory_id", &self.manager.config().accessory_id)
            .field("sessions", &self.manager.session_count())
            .field("pending", &self.scheduler.pending())
            .finish()
    }
}

//! # hapd
//!
//! Accessory-side pairing and session encryption core.
//!
//! An [`Accessory`] owns the cooperative scheduler and the pairing manager.
//! The transport layer reports connections, pair-setup and pair-verify
//! requests and encrypted frames; the accessory answers through an outbox
//! that is flushed to a [`Transport`].
//!
//! ```no_run
//! use hapd::{Accessory, AccessoryConfig, ConnectionId, Route};
//!
//! # fn main() -> hapd::Result<()> {
//! let mut accessory = Accessory::open(AccessoryConfig::default())?;
//! accessory.run_until_idle();
//!
//! let conn = ConnectionId(1);
//! accessory.connect(conn);
//! accessory.receive(conn, Route::PairSetup, vec![0x06, 0x01, 0x01, 0x00, 0x01, 0x00]);
//! accessory.run_until_idle();
//! for action in accessory.drain_outbound() {
//!     println!("{:?}", action);
//! }
//! # Ok(())
//! # }
//! ```

mod accessory;

pub use accessory::Accessory;
pub use hapd_core::{AccessoryConfig, Error, PairingError, Result};
pub use hapd_crypto::tlv::{Tlv8, TlvError, TlvType};
pub use hapd_pairing::{
    ConnectionId, Event, EventKind, FileStore, MemoryStore, Outbound, PairSession,
    PairingStore, PeerRecord, Route, SessionCipher, Transport,
};

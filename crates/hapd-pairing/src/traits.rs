//! Traits for pairing persistence and transport.

use async_trait::async_trait;
use hapd_core::error::Result;
use hapd_crypto::ed25519::IdentityKeyPair;

use crate::event::ConnectionId;

/// Length of a controller pairing identifier.
pub const PEER_ID_LEN: usize = 36;

/// A paired controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: [u8; PEER_ID_LEN],
    pub public_key: [u8; 32],
    pub flags: u32,
}

impl PeerRecord {
    pub fn new(id: [u8; PEER_ID_LEN], public_key: [u8; 32]) -> Self {
        Self {
            id,
            public_key,
            flags: 0,
        }
    }

    /// Identifier as text, for logs.
    pub fn id_lossy(&self) -> String {
        String::from_utf8_lossy(&self.id).into_owned()
    }
}

/// Persistent storage for the accessory identity and paired controllers.
///
/// Every call is a whole-record operation.
#[cfg_attr(test, mockall::automock)]
pub trait PairingStore {
    fn have_long_term_keys(&self) -> bool;

    fn long_term_keys(&self) -> Result<Option<IdentityKeyPair>>;

    fn set_long_term_keys(&mut self, keys: &IdentityKeyPair) -> Result<()>;

    /// Insert a record, replacing any record with the same identifier.
    fn add_peer(&mut self, peer: &PeerRecord) -> Result<()>;

    fn retrieve_peer(&self, id: &[u8]) -> Result<Option<PeerRecord>>;

    /// Returns false when no record had this identifier.
    fn remove_peer(&mut self, id: &[u8]) -> Result<bool>;

    fn peer_count(&self) -> usize;
}

/// Outbound half of the connection layer.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Send a handshake response body on `conn`.
    async fn respond(&mut self, conn: ConnectionId, body: &[u8]) -> Result<()>;

    /// Send already-encrypted frames on `conn`.
    async fn send(&mut self, conn: ConnectionId, bytes: &[u8]) -> Result<()>;

    /// Tear down `conn`.
    async fn close(&mut self, conn: ConnectionId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    mod mock_transport {
        use super::*;

        #[tokio::test]
        async fn mock_respond_receives_body() {
            let mut mock = MockTransport::new();

            mock.expect_respond()
                .withf(|conn, body| *conn == ConnectionId(1) && body == [0x06u8, 0x01, 0x02].as_slice())
                .times(1)
                .returning(|_, _| Box::pin(async { Ok(()) }));

            mock.respond(ConnectionId(1), &[0x06, 0x01, 0x02]).await.unwrap();
        }

        #[tokio::test]
        async fn mock_close_can_fail() {
            let mut mock = MockTransport::new();

            mock.expect_close().returning(|_| {
                Box::pin(async {
                    Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into())
                })
            });

            assert!(mock.close(ConnectionId(2)).await.is_err());
        }
    }

    mod mock_store {
        use super::*;

        #[test]
        fn mock_store_reports_peers() {
            let mut mock = MockPairingStore::new();
            let record = PeerRecord::new([b'A'; PEER_ID_LEN], [7; 32]);

            mock.expect_peer_count().return_const(1usize);
            mock.expect_retrieve_peer()
                .returning(move |_| Ok(Some(record)));

            assert_eq!(mock.peer_count(), 1);
            let found = mock.retrieve_peer(&[b'A'; PEER_ID_LEN]).unwrap().unwrap();
            assert_eq!(found.public_key, [7; 32]);
        }
    }

    mod peer_record {
        use super::*;

        #[test]
        fn new_record_has_no_flags() {
            let record = PeerRecord::new([b'x'; PEER_ID_LEN], [0; 32]);
            assert_eq!(record.flags, 0);
            assert_eq!(record.id_lossy(), "x".repeat(PEER_ID_LEN));
        }
    }
}

//! Events exchanged between the transport, the pairing manager and the
//! exponentiation engine.

use std::fmt;

use num_bigint::BigUint;

/// Transport-assigned connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Handle of an in-flight exponentiation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

/// Pairing endpoint a request was posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    PairSetup,
    PairVerify,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::PairSetup => "/pair-setup",
            Route::PairVerify => "/pair-verify",
        }
    }
}

/// Which SRP exponentiation a job computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpModStage {
    /// `v = g^x`
    Verifier,
    /// `g^b`, the random half of `B`
    PublicTerm,
    /// `v^u`
    VerifierPower,
    /// `S = (A * v^u)^b`
    Premaster,
}

/// Where an exponentiation result must be delivered.
///
/// `exchange` is the session's exchange generation at submission time; a
/// result whose generation no longer matches belongs to a superseded
/// exchange and is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpModTarget {
    pub conn: ConnectionId,
    pub exchange: u64,
    pub stage: ExpModStage,
}

/// Everything the scheduler can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected(ConnectionId),
    RequestReceived {
        conn: ConnectionId,
        route: Route,
        body: Vec<u8>,
    },
    Disconnected(ConnectionId),
    /// The store has no accessory long-term keys yet.
    KeypairNeeded,
    /// `B` is ready; M2 can be sent.
    SetupInitComplete(ConnectionId),
    /// `K`, `M1` and `M2` are ready; the controller proof can be checked.
    SetupProofComplete(ConnectionId),
    EncryptNeeded(ConnectionId),
    Encrypted(ConnectionId),
    DecryptNeeded(ConnectionId),
    Decrypted(ConnectionId),
    /// A controller proved the setup code and signed its long-term key.
    DevicePaired(ConnectionId),
    /// A paired controller passed pair-verify.
    DeviceVerified(ConnectionId),
    ExpModStep(JobId),
    ExpModFinal {
        job: JobId,
        target: ExpModTarget,
        value: BigUint,
    },
}

/// Payload-free discriminant of [`Event`], used to subscribe listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    RequestReceived,
    Disconnected,
    KeypairNeeded,
    SetupInitComplete,
    SetupProofComplete,
    EncryptNeeded,
    Encrypted,
    DecryptNeeded,
    Decrypted,
    DevicePaired,
    DeviceVerified,
    ExpModStep,
    ExpModFinal,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        EventKind::Connected,
        EventKind::RequestReceived,
        EventKind::Disconnected,
        EventKind::KeypairNeeded,
        EventKind::SetupInitComplete,
        EventKind::SetupProofComplete,
        EventKind::EncryptNeeded,
        EventKind::Encrypted,
        EventKind::DecryptNeeded,
        EventKind::Decrypted,
        EventKind::DevicePaired,
        EventKind::DeviceVerified,
        EventKind::ExpModStep,
        EventKind::ExpModFinal,
    ];
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected(_) => EventKind::Connected,
            Event::RequestReceived { .. } => EventKind::RequestReceived,
            Event::Disconnected(_) => EventKind::Disconnected,
            Event::KeypairNeeded => EventKind::KeypairNeeded,
            Event::SetupInitComplete(_) => EventKind::SetupInitComplete,
            Event::SetupProofComplete(_) => EventKind::SetupProofComplete,
            Event::EncryptNeeded(_) => EventKind::EncryptNeeded,
            Event::Encrypted(_) => EventKind::Encrypted,
            Event::DecryptNeeded(_) => EventKind::DecryptNeeded,
            Event::Decrypted(_) => EventKind::Decrypted,
            Event::DevicePaired(_) => EventKind::DevicePaired,
            Event::DeviceVerified(_) => EventKind::DeviceVerified,
            Event::ExpModStep(_) => EventKind::ExpModStep,
            Event::ExpModFinal { .. } => EventKind::ExpModFinal,
        }
    }

    /// Connection the event concerns, if any.
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            Event::Connected(conn)
            | Event::Disconnected(conn)
            | Event::SetupInitComplete(conn)
            | Event::SetupProofComplete(conn)
            | Event::EncryptNeeded(conn)
            | Event::Encrypted(conn)
            | Event::DecryptNeeded(conn)
            | Event::Decrypted(conn)
            | Event::DevicePaired(conn)
            | Event::DeviceVerified(conn) => Some(*conn),
            Event::RequestReceived { conn, .. } => Some(*conn),
            Event::ExpModFinal { target, .. } => Some(target.conn),
            Event::KeypairNeeded | Event::ExpModStep(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let conn = ConnectionId(3);
        assert_eq!(Event::Connected(conn).kind(), EventKind::Connected);
        assert_eq!(
            Event::RequestReceived {
                conn,
                route: Route::PairVerify,
                body: vec![],
            }
            .kind(),
            EventKind::RequestReceived
        );
        assert_eq!(Event::ExpModStep(JobId(1)).kind(), EventKind::ExpModStep);
    }

    #[test]
    fn all_kinds_are_distinct() {
        for (i, a) in EventKind::ALL.iter().enumerate() {
            for b in &EventKind::ALL[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn connection_is_reported() {
        let conn = ConnectionId(9);
        let target = ExpModTarget {
            conn,
            exchange: 1,
            stage: ExpModStage::Premaster,
        };
        let event = Event::ExpModFinal {
            job: JobId(4),
            target,
            value: BigUint::from(7u32),
        };
        assert_eq!(event.connection(), Some(conn));
        assert_eq!(Event::DeviceVerified(conn).connection(), Some(conn));
        assert_eq!(Event::KeypairNeeded.connection(), None);
    }

    #[test]
    fn display_and_paths() {
        assert_eq!(ConnectionId(12).to_string(), "conn#12");
        assert_eq!(Route::PairSetup.path(), "/pair-setup");
        assert_eq!(Route::PairVerify.path(), "/pair-verify");
    }
}

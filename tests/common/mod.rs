//! Shared helpers for end-to-end tests.

#![allow(dead_code)]

use async_trait::async_trait;
use hapd::{Accessory, AccessoryConfig, ConnectionId, Outbound, Route, SessionCipher, Transport};
use hapd_pairing::testing::Controller;

pub const SETUP_CODE: &str = "031-45-154";

pub fn config() -> AccessoryConfig {
    AccessoryConfig::default()
        .with_setup_code(SETUP_CODE)
        .with_chunked_math(false)
}

/// In-memory accessory with its keys already generated.
pub fn accessory(config: AccessoryConfig) -> Accessory {
    let mut accessory = Accessory::open(config).expect("accessory opens");
    accessory.run_until_idle();
    accessory
}

/// Post `body` to `route` and return the single response for `conn`.
pub fn exchange(accessory: &mut Accessory, conn: ConnectionId, route: Route, body: Vec<u8>) -> Vec<u8> {
    accessory.receive(conn, route, body);
    accessory.run_until_idle();
    let mut bodies: Vec<Vec<u8>> = accessory
        .drain_outbound()
        .into_iter()
        .filter_map(|action| match action {
            Outbound::Response { conn: to, body } if to == conn => Some(body),
            _ => None,
        })
        .collect();
    assert_eq!(bodies.len(), 1, "expected one response on {}", conn);
    bodies.remove(0)
}

/// Run pair-setup M1-M6 on `conn`.
pub fn pair(accessory: &mut Accessory, conn: ConnectionId, controller: &mut Controller) {
    let m2 = exchange(accessory, conn, Route::PairSetup, controller.setup_m1());
    let m4 = exchange(accessory, conn, Route::PairSetup, controller.setup_m3(&m2));
    let m6 = exchange(accessory, conn, Route::PairSetup, controller.setup_m5(&m4));
    controller.finish_setup(&m6);
}

/// Run pair-verify M1-M4 on `conn` and return the controller channel.
pub fn verify(accessory: &mut Accessory, conn: ConnectionId, controller: &mut Controller) -> SessionCipher {
    let m2 = exchange(accessory, conn, Route::PairVerify, controller.verify_m1());
    let m4 = exchange(accessory, conn, Route::PairVerify, controller.verify_m3(&m2));
    controller.finish_verify(&m4)
}

/// What a [`RecordingTransport`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    Response(ConnectionId, Vec<u8>),
    Frame(ConnectionId, Vec<u8>),
    Closed(ConnectionId),
}

/// Transport that records every call.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub delivered: Vec<Delivered>,
}

impl RecordingTransport {
    pub fn frames(&self, conn: ConnectionId) -> Vec<u8> {
        self.delivered
            .iter()
            .filter_map(|d| match d {
                Delivered::Frame(to, bytes) if *to == conn => Some(bytes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn closed(&self, conn: ConnectionId) -> bool {
        self.delivered.contains(&Delivered::Closed(conn))
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn respond(&mut self, conn: ConnectionId, body: &[u8]) -> hapd::Result<()> {
        self.delivered.push(Delivered::Response(conn, body.to_vec()));
        Ok(())
    }

    async fn send(&mut self, conn: ConnectionId, bytes: &[u8]) -> hapd::Result<()> {
        self.delivered.push(Delivered::Frame(conn, bytes.to_vec()));
        Ok(())
    }

    async fn close(&mut self, conn: ConnectionId) -> hapd::Result<()> {
        self.delivered.push(Delivered::Closed(conn));
        Ok(())
    }
}

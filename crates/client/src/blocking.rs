//! Thin blocking facade over the async session for callers without a
//! runtime of their own. The facade owns a multi-thread runtime, so
//! circuit and pipeline tasks keep running between calls.

use std::io;
use std::net::SocketAddr;

use sim_proto::login::{LoginReply, LoginRequest};

use crate::circuit::Circuit;
use crate::error::{DisconnectReason, LoginError, NetError};
use crate::login::{login, LoginTransport};
use crate::session::Session;
use crate::settings::Settings;

pub struct BlockingSession {
    runtime: tokio::runtime::Runtime,
    session: Session,
}

impl BlockingSession {
    pub fn new(settings: Settings) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let session = runtime.block_on(async { Session::new(settings) });
        Ok(Self { runtime, session })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn login<T: LoginTransport>(
        &self,
        transport: &T,
        login_url: &str,
        request: &LoginRequest,
    ) -> Result<LoginReply, LoginError> {
        self.runtime
            .block_on(login(&self.session, transport, login_url, request))
    }

    pub fn connect(
        &self,
        address: SocketAddr,
        region_handle: u64,
        set_current: bool,
        seed_capability: Option<String>,
    ) -> Result<Circuit, NetError> {
        self.runtime.block_on(self.session.connect(
            address,
            region_handle,
            set_current,
            seed_capability,
        ))
    }

    pub fn logout(&self) -> Result<(), NetError> {
        self.runtime.block_on(self.session.logout())
    }

    pub fn shutdown(&self, reason: DisconnectReason, message: &str) {
        self.runtime.block_on(self.session.shutdown(reason, message));
    }
}

//! Per-connection protocol handling.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::coordinator::Coordinator;
use crate::protocol::{Assignment, Handshake, Request, Response};
use crate::session::{SessionGuard, SessionId};

/// Capacity assumed when a handshake does not declare `useraccounts`.
const DEFAULT_DECLARED_CAPACITY: i64 = 1;

/// Protocol state for one worker connection.
///
/// Owns the session registration; dropping the dispatcher disconnects the
/// session and subtracts its capacity.
#[derive(Debug)]
pub struct Dispatcher {
    coordinator: Arc<Coordinator>,
    session: SessionGuard,
}

impl Dispatcher {
    pub fn new(coordinator: Arc<Coordinator>, peer: Option<SocketAddr>) -> Self {
        let session = coordinator.sessions().open(peer);
        Self {
            coordinator,
            session,
        }
    }

    pub const fn session_id(&self) -> SessionId {
        self.session.id()
    }

    /// Handle one request. `None` means nothing is sent back.
    pub fn handle(&self, request: Request) -> Option<Response> {
        match request {
            Request::Handshake(handshake) => self.handshake(&handshake),
            Request::RequestPixel { user } => Some(self.request_pixel(user)),
            Request::Ping => Some(Response::Pong),
            Request::GetBotCount { password } => self.bot_count(&password),
            Request::Unrecognized { operation } => {
                tracing::debug!(
                    operation = operation.as_deref().unwrap_or("<none>"),
                    "ignoring unrecognized operation"
                );
                None
            }
        }
    }

    fn handshake(&self, handshake: &Handshake) -> Option<Response> {
        let id = self.session_id();
        let sessions = self.coordinator.sessions();
        let version = handshake.version();
        sessions.record_handshake(id, handshake.platform.clone(), version);

        let declared = handshake.capacity().unwrap_or(DEFAULT_DECLARED_CAPACITY);
        match sessions.set_capacity(id, declared) {
            Some(capacity) => tracing::info!(
                platform = handshake.platform.as_deref().unwrap_or("<unknown>"),
                version,
                capacity,
                total = sessions.aggregate_capacity(),
                "worker handshake"
            ),
            None => tracing::warn!(declared, "rejected advertised capacity"),
        }

        let platform = handshake.platform.as_deref()?;
        let required = self.coordinator.template().min_version(platform)?;
        (version.unwrap_or(0) < required).then(|| {
            tracing::info!(platform, version, required, "worker is outdated");
            Response::NotifyUpdate { version: required }
        })
    }

    fn request_pixel(&self, user: String) -> Response {
        let assignment = self.coordinator.pop().map(Assignment::from);
        if let Some(a) = assignment {
            tracing::debug!(%user, x = a.x, y = a.y, color = a.color, "assigned pixel");
        }
        Response::PlacePixel { user, assignment }
    }

    fn bot_count(&self, password: &str) -> Option<Response> {
        if !self.coordinator.admin().verify(password) {
            return None;
        }
        Some(Response::BotCount {
            amount: self.coordinator.aggregate_advertised_capacity(),
        })
    }
}

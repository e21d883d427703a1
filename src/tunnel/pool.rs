//! Client-side session pool
//!
//! Reuses a bounded number of physical tunnel connections to carry many
//! logical streams. Sessions for one remote address are kept in creation
//! order; selection is first-fit under the per-session stream cap, which
//! is cheap and good enough because sessions are capacity-bounded and
//! physical connections are expensive.

use super::{TunnelError, TunnelSession, TunnelStream, MAX_STREAMS_PER_SESSION};
use crate::transport::Dialer;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Maps remote addresses to ordered session lists and serves dial
/// requests out of them
///
/// All of lookup, selection, eviction and session creation happen under
/// one pool-wide lock, so concurrent dials to the same address observe a
/// serialized view and never race to create duplicate sessions. The lock
/// guards list membership only; per-session stream counts and closed
/// flags are synchronized by the sessions themselves.
pub struct SessionPool {
    dialer: Arc<dyn Dialer>,
    /// Sessions per address, oldest first
    sessions: Mutex<HashMap<String, Vec<Arc<TunnelSession>>>>,
    max_streams_per_session: usize,
}

impl SessionPool {
    /// Create a pool with the default per-session stream cap
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self::with_stream_cap(dialer, MAX_STREAMS_PER_SESSION)
    }

    /// Create a pool with a custom per-session stream cap
    pub fn with_stream_cap(dialer: Arc<dyn Dialer>, max_streams_per_session: usize) -> Self {
        Self {
            dialer,
            sessions: Mutex::new(HashMap::new()),
            max_streams_per_session,
        }
    }

    /// Open a logical stream to `addr`, reusing a pooled session when one
    /// has spare capacity and establishing a new physical connection
    /// otherwise
    ///
    /// Establishment and stream-open failures surface to the caller
    /// unretried; retry policy belongs to the layer above.
    pub async fn dial(&self, addr: &str) -> Result<TunnelStream, TunnelError> {
        let mut sessions = self.sessions.lock().await;
        let list = sessions.entry(addr.to_string()).or_default();

        // Sweep out every session whose connection has died
        list.retain(|session| {
            if session.is_closed() {
                debug!(%addr, peer = %session.peer_addr(), "pruned closed session");
                false
            } else {
                true
            }
        });

        let first_fit = list
            .iter()
            .position(|s| s.num_streams() < self.max_streams_per_session);

        let selected = match first_fit {
            Some(idx) => {
                let session = Arc::clone(&list[idx]);
                // Reusing an older session: keep at most one idle spare,
                // close a newest session that carries no streams
                let newest_is_idle_spare = list.len() > 1
                    && list
                        .last()
                        .is_some_and(|last| last.num_streams() == 0 && !Arc::ptr_eq(last, &session));
                if newest_is_idle_spare {
                    if let Some(last) = list.pop() {
                        debug!(%addr, peer = %last.peer_addr(), "closing idle spare session");
                        last.close();
                    }
                }
                session
            }
            None => {
                let session =
                    Arc::new(TunnelSession::connect(self.dialer.as_ref(), addr).await?);
                list.push(Arc::clone(&session));
                session
            }
        };

        match selected.open_stream() {
            Ok(stream) => Ok(stream),
            Err(e) => {
                // A session that refuses streams is presumed broken
                selected.close();
                list.retain(|s| !Arc::ptr_eq(s, &selected));
                Err(e)
            }
        }
    }

    /// Number of pooled sessions for `addr`
    pub async fn session_count(&self, addr: &str) -> usize {
        self.sessions
            .lock()
            .await
            .get(addr)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Close every pooled session
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.lock().await;
        for list in sessions.values() {
            for session in list {
                session.close();
            }
        }
        sessions.clear();
    }

    #[cfg(test)]
    pub(crate) async fn sessions_for(&self, addr: &str) -> Vec<Arc<TunnelSession>> {
        self.sessions
            .lock()
            .await
            .get(addr)
            .cloned()
            .unwrap_or_default()
    }
}

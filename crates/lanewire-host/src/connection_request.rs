//! Connection requests surfaced to the application.

use std::{fmt, net::SocketAddr, sync::Arc};

use crossbeam_channel::Sender;
use lanewire_core::error::{ErrorKind, Result};

/// How the application answered a connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Accept,
    Reject(Arc<[u8]>),
    /// Reject and retransmit until the remote acknowledges it.
    RejectForce(Arc<[u8]>),
}

/// A decision on its way back to the session manager.
#[derive(Debug)]
pub(crate) struct RequestDecision {
    pub(crate) addr: SocketAddr,
    pub(crate) connection_id: u32,
    pub(crate) decision: Decision,
}

/// A remote endpoint asking to connect.
///
/// Decide with [`accept`](ConnectionRequest::accept),
/// [`reject`](ConnectionRequest::reject) or
/// [`reject_force`](ConnectionRequest::reject_force). The decision is applied on the
/// next poll of the host. Dropping an undecided request rejects it without a payload.
pub struct ConnectionRequest {
    addr: SocketAddr,
    connection_id: u32,
    key: Arc<[u8]>,
    /// Largest reject payload that fits in one datagram
    max_reject_len: usize,
    decisions: Option<Sender<RequestDecision>>,
}

impl ConnectionRequest {
    pub(crate) fn new(
        addr: SocketAddr,
        connection_id: u32,
        key: Arc<[u8]>,
        max_reject_len: usize,
        decisions: Sender<RequestDecision>,
    ) -> Self {
        Self { addr, connection_id, key, max_reject_len, decisions: Some(decisions) }
    }

    /// Endpoint the request came from.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Key the remote sent with its request.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Accepts the connection.
    pub fn accept(mut self) {
        self.decide(Decision::Accept);
    }

    /// Rejects the connection. `data` reaches the remote in its disconnect event, if the
    /// reject datagram is not lost.
    ///
    /// Fails with `PayloadTooLarge` when `data` does not fit in one datagram; the
    /// connection is then rejected without a payload.
    pub fn reject(mut self, data: &[u8]) -> Result<()> {
        self.check_reject_len(data)?;
        self.decide(Decision::Reject(Arc::from(data)));
        Ok(())
    }

    /// Rejects the connection and keeps retransmitting the reject until the remote
    /// acknowledges it, so the remote reliably learns about it.
    ///
    /// Fails like [`reject`](ConnectionRequest::reject) on an oversized payload.
    pub fn reject_force(mut self, data: &[u8]) -> Result<()> {
        self.check_reject_len(data)?;
        self.decide(Decision::RejectForce(Arc::from(data)));
        Ok(())
    }

    /// Largest payload [`reject`](ConnectionRequest::reject) accepts.
    pub fn max_reject_len(&self) -> usize {
        self.max_reject_len
    }

    /// Accepts when the remote sent `key`, otherwise rejects without a payload.
    /// Returns whether the request was accepted.
    pub fn accept_if_key(self, key: &[u8]) -> bool {
        if self.key.as_ref() == key {
            self.accept();
            true
        } else {
            tracing::debug!("Rejecting {}: key mismatch", self.addr);
            // Dropping rejects without a payload
            drop(self);
            false
        }
    }

    fn check_reject_len(&self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_reject_len {
            return Err(ErrorKind::PayloadTooLarge { size: data.len(), max: self.max_reject_len });
        }
        Ok(())
    }

    fn decide(&mut self, decision: Decision) {
        if let Some(decisions) = self.decisions.take() {
            let decision = RequestDecision { addr: self.addr, connection_id: self.connection_id, decision };
            if decisions.send(decision).is_err() {
                tracing::trace!("Host dropped before the request from {} was decided", self.addr);
            }
        }
    }
}

impl Drop for ConnectionRequest {
    fn drop(&mut self) {
        self.decide(Decision::Reject(Arc::from(Vec::new())));
    }
}

impl fmt::Debug for ConnectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("addr", &self.addr)
            .field("connection_id", &self.connection_id)
            .field("key_len", &self.key.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;

    use super::*;

    fn request(key: &[u8]) -> (ConnectionRequest, crossbeam_channel::Receiver<RequestDecision>) {
        let (sender, receiver) = unbounded();
        let addr = "127.0.0.1:4000".parse().unwrap();
        (ConnectionRequest::new(addr, 42, Arc::from(key), 16, sender), receiver)
    }

    #[test]
    fn test_accept_if_key() {
        let (req, decisions) = request(b"secret");
        assert!(req.accept_if_key(b"secret"));
        let decision = decisions.try_recv().unwrap();
        assert_eq!(decision.decision, Decision::Accept);
        assert_eq!(decision.connection_id, 42);

        let (req, decisions) = request(b"guess");
        assert!(!req.accept_if_key(b"secret"));
        assert_eq!(decisions.try_recv().unwrap().decision, Decision::Reject(Arc::from(Vec::new())));
    }

    #[test]
    fn test_only_the_first_decision_counts() {
        let (req, decisions) = request(b"");
        req.reject_force(b"full").unwrap();

        assert_eq!(
            decisions.try_iter().map(|d| d.decision).collect::<Vec<_>>(),
            vec![Decision::RejectForce(Arc::from(b"full".to_vec()))]
        );
    }

    #[test]
    fn test_oversized_reject_payload_is_refused() {
        let (req, decisions) = request(b"");
        assert_eq!(req.max_reject_len(), 16);

        let result = req.reject(&[7u8; 17]);

        assert!(matches!(result, Err(ErrorKind::PayloadTooLarge { size: 17, max: 16 })));
        assert_eq!(
            decisions.try_iter().map(|d| d.decision).collect::<Vec<_>>(),
            vec![Decision::Reject(Arc::from(Vec::new()))]
        );
    }

    #[test]
    fn test_dropping_undecided_request_rejects() {
        let (req, decisions) = request(b"");
        drop(req);

        assert!(matches!(decisions.try_recv().unwrap().decision, Decision::Reject(_)));
    }
}

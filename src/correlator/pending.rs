//! Wait handles for outstanding requests

use super::router::{CorrelatorState, Reply};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Handle returned by `issue_request`, consumed by `await_response`
///
/// `T` is the decoded response the request resolves to. Dropping the handle
/// without awaiting frees the request slot immediately.
pub struct PendingResponse<T: Reply> {
    pub(super) generation: u64,
    pub(super) rx: oneshot::Receiver<T>,
    pub(super) shared: Arc<Mutex<CorrelatorState>>,
}

impl<T: Reply> PendingResponse<T> {
    pub fn kind(&self) -> nomad_protocol::RequestKind {
        T::KIND
    }
}

impl<T: Reply> fmt::Debug for PendingResponse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse")
            .field("kind", &T::KIND)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

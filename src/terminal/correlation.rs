use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

/// Maps outstanding transaction ids to the datagram source that sent them
/// so that replies can be routed back over an unconnected socket.
///
/// Two in-flight requests carrying the same id overwrite each other and
/// the earlier requester never receives its reply. Masters avoid this by
/// drawing ids from a wrapping counter.
pub(crate) struct CorrelationMap {
    map: Mutex<HashMap<u16, SocketAddr>>,
}

impl CorrelationMap {
    pub(crate) fn new() -> Self {
        CorrelationMap {
            map: Mutex::new(HashMap::new()),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<u16, SocketAddr>> {
        match self.map.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn record(&self, tx_id: u16, source: SocketAddr) {
        self.guard().insert(tx_id, source);
    }

    pub(crate) fn take(&self, tx_id: u16) -> Option<SocketAddr> {
        self.guard().remove(&tx_id)
    }
}

//! Connectivity gate
//!
//! The engine never talks to platform network APIs directly; the embedding
//! surface supplies an implementation and transfers consult it before
//! starting and before every retry.

/// Connectivity state as seen by the embedding platform.
pub trait Connectivity: Send + Sync {
    /// Any usable network path exists.
    fn is_online(&self) -> bool;

    /// The current network path is Wi-Fi (or equivalent unmetered).
    fn is_wifi(&self) -> bool;

    /// Active reachability check. Defaults to the passive online flag;
    /// implementations may probe a well-known endpoint instead.
    fn is_reachable(&self) -> bool {
        self.is_online()
    }
}

/// Default gate for environments without connectivity signals.
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }

    fn is_wifi(&self) -> bool {
        true
    }
}

/// Decide which waiting status applies, if any.
///
/// Returns `None` when the gate is open and the transfer may proceed.
pub fn gate_status(conn: &dyn Connectivity, wifi_only: bool) -> Option<&'static str> {
    use crate::model::status_text;

    if !conn.is_online() {
        return Some(status_text::WAITING_FOR_NETWORK);
    }
    if wifi_only && !conn.is_wifi() {
        return Some(status_text::WAITING_FOR_WIFI);
    }
    if !conn.is_reachable() {
        return Some(status_text::WAITING_FOR_INTERNET);
    }
    None
}

/// Lifecycle state of an exchange session
/// One-way ring: Disconnected -> Connecting -> Open -> Disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection, reconnect pending or session shut down
    Disconnected,
    /// Connection attempt in flight
    Connecting,
    /// Feed live, messages flowing
    Open,
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_open_is_open() {
        assert!(!SessionState::Disconnected.is_open());
        assert!(!SessionState::Connecting.is_open());
        assert!(SessionState::Open.is_open());
    }
}

/// Lifecycle of one terminal connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Socket accepted, nothing known about the terminal yet
    ///
    /// action: accept registration, or authentication carrying registration fields
    ///         drop every other message without a reply
    /// transition: registration accepted => Registered
    ///             combined authentication accepted => Authenticated
    New,

    /// Terminal id known, not authenticated
    ///
    /// action: accept (re-)registration and authentication
    ///         drop every other message without a reply
    /// transition: authentication accepted => Authenticated
    Registered,

    /// Steady state, monitored by heartbeats
    ///
    /// action: dispatch every message
    ///         answer a repeated authentication with a heartbeat instruction
    /// transition: logout => Registered
    Authenticated,

    /// Socket gone; final
    Closed,
}

impl ConnectionState {
    pub const fn can_transition_to(current: ConnectionState, target: ConnectionState) -> bool {
        match (current, target) {
            (ConnectionState::Closed, _) => false,
            (_, ConnectionState::Closed) => true,
            (ConnectionState::New, ConnectionState::Registered) => true,
            (ConnectionState::New, ConnectionState::Authenticated) => true,
            (ConnectionState::Registered, ConnectionState::Registered) => true,
            (ConnectionState::Registered, ConnectionState::Authenticated) => true,
            (ConnectionState::Authenticated, ConnectionState::Registered) => true,
            _ => false,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(
            self,
            ConnectionState::Registered | ConnectionState::Authenticated
        )
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionState::Authenticated)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::ConnectionState::*;
    use super::*;

    #[rstest]
    #[case(New, Registered, true)]
    #[case(New, Authenticated, true)]
    #[case(Registered, Authenticated, true)]
    #[case(Authenticated, Registered, true)]
    #[case(Authenticated, Closed, true)]
    #[case(New, Closed, true)]
    #[case(Authenticated, New, false)]
    #[case(Registered, New, false)]
    #[case(Authenticated, Authenticated, false)]
    #[case(Closed, Registered, false)]
    fn test_transitions(
        #[case] from: ConnectionState,
        #[case] to: ConnectionState,
        #[case] allowed: bool,
    ) {
        assert_eq!(ConnectionState::can_transition_to(from, to), allowed);
    }
}

use crate::sock::SocketDescriptor;

/// Outcome of a server-side authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The provider fully authenticated the peer.
    Ok,
    /// The provider has no real handshake; fall back to the privileged-port
    /// pseudo-authentication (`CS_AUTH_CHECK_PORT` in `engage_authentication`).
    CheckPort,
    Fail,
}

/// Opaque handshake and teardown hooks the event loop drives without
/// understanding their internals, grounded on the three `CS_*` calls
/// `engage_authentication`/`close_conn` make into the security library in
/// `net_server.c`.
pub trait SecurityProvider {
    fn client_init(&mut self) -> Result<(), String>;
    fn server_auth(&mut self, sock: SocketDescriptor) -> AuthOutcome;
    fn close_socket(&mut self, sock: SocketDescriptor) -> Result<(), String>;
    fn close_app(&mut self);
}

/// The default provider: no real handshake, just the privileged-port
/// pseudo-authentication every `server_auth` call falls back to in the
/// original when the security library reports `CS_AUTH_CHECK_PORT`.
///
/// This is what `Core` uses unless a caller supplies a different provider;
/// it is deliberately permissive, matching the original's behaviour of
/// treating a connection from a privileged source port as good enough on
/// its own.
#[derive(Debug, Default)]
pub struct CheckPortAuthenticator;

impl SecurityProvider for CheckPortAuthenticator {
    fn client_init(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn server_auth(&mut self, _sock: SocketDescriptor) -> AuthOutcome {
        AuthOutcome::CheckPort
    }

    fn close_socket(&mut self, _sock: SocketDescriptor) -> Result<(), String> {
        Ok(())
    }

    fn close_app(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_port_authenticator_always_defers_to_privileged_port() {
        let mut auth = CheckPortAuthenticator;
        assert_eq!(auth.server_auth(SocketDescriptor::new(5)), AuthOutcome::CheckPort);
    }
}

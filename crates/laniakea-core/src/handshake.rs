use std::fmt;
use std::net::SocketAddr;

/// Plugin-manager handshake parameters shared by host and plugins.
///
/// The magic cookie is checked by the plugin manager before the process is
/// trusted; the bridge only advertises it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub core_protocol_version: u32,
    pub app_protocol_version: u32,
    pub magic_cookie_key: &'static str,
    pub magic_cookie_value: &'static str,
}

impl HandshakeConfig {
    pub const LANIAKEA: HandshakeConfig = HandshakeConfig {
        core_protocol_version: 1,
        app_protocol_version: 1,
        magic_cookie_key: "LANIAKEA_PLUGIN_MAGIC_COOKIE",
        magic_cookie_value: "a56e5daaa516e17d3d4b3d4685df9f8ca59c62c2d818cd5a7df13c039f134e16",
    };

    /// The line a plugin prints on stdout once it is listening, e.g.
    /// `1|1|tcp|127.0.0.1:1234|grpc`.
    pub fn announce(&self, addr: SocketAddr) -> HandshakeLine {
        HandshakeLine {
            core: self.core_protocol_version,
            app: self.app_protocol_version,
            addr,
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self::LANIAKEA
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeLine {
    core: u32,
    app: u32,
    addr: SocketAddr,
}

impl fmt::Display for HandshakeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|tcp|{}|grpc", self.core, self.app, self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_line_format() {
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        let line = HandshakeConfig::default().announce(addr).to_string();
        assert_eq!(line, "1|1|tcp|127.0.0.1:1234|grpc");
    }
}

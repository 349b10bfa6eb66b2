//! Backend configuration: which implementation to run and where each server
//! role lives.

use std::fmt;

/// Name of the reference backend implementation.
pub const DEFAULT_BACKEND: &str = "Revora";

pub const DEFAULT_LOGIN_HOST: &str = "gpcm.gamespy.com";
pub const DEFAULT_LOGIN_PORT: u16 = 29900;
pub const DEFAULT_CHAT_HOST: &str = "peerchat.gamespy.com";
pub const DEFAULT_CHAT_PORT: u16 = 6667;
pub const DEFAULT_MASTER_HOST: &str = "ccgenzh.ms6.gamespy.com";
pub const DEFAULT_MASTER_PORT: u16 = 28900;
pub const DEFAULT_NAT_HOST: &str = "natneg1.gamespy.com";
pub const DEFAULT_NAT_PORT: u16 = 27901;

/// The four server roles the legacy SDK talks to.
///
/// Each role has its own TCP connection slot in the backend.  The ordering of
/// [`Role::ALL`] matches [`Role::index`] and is used to lay out fixed-size
/// per-role tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Player authentication (`gpcm`).
    Login,
    /// Game listing and host registration.
    Master,
    /// Chat and invites (`peerchat`).
    Chat,
    /// NAT negotiation rendezvous.
    Nat,
}

impl Role {
    /// Every role, in index order.
    pub const ALL: [Role; 4] = [Role::Login, Role::Master, Role::Chat, Role::Nat];

    /// Number of roles, for sizing per-role arrays.
    pub const COUNT: usize = 4;

    /// Stable position of this role in per-role tables.
    pub const fn index(self) -> usize {
        match self {
            Role::Login => 0,
            Role::Master => 1,
            Role::Chat => 2,
            Role::Nat => 3,
        }
    }

    /// Lower-case name used in log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Login => "login",
            Role::Master => "master",
            Role::Chat => "chat",
            Role::Nat => "nat",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host name (or literal IP) and TCP port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything a backend needs to know before it can open connections.
///
/// Handed to the backend once at initialization.  Changing servers means
/// reloading the configuration file and initializing a fresh backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Backend selector, matched case-insensitively by the factory.
    pub backend: String,
    pub login: Endpoint,
    pub chat: Endpoint,
    pub master: Endpoint,
    pub nat: Endpoint,
}

impl BackendConfig {
    /// Returns the endpoint serving `role`.
    pub fn endpoint(&self, role: Role) -> &Endpoint {
        match role {
            Role::Login => &self.login,
            Role::Master => &self.master,
            Role::Chat => &self.chat,
            Role::Nat => &self.nat,
        }
    }

    /// Mutable access to the endpoint serving `role`.
    pub fn endpoint_mut(&mut self, role: Role) -> &mut Endpoint {
        match role {
            Role::Login => &mut self.login,
            Role::Master => &mut self.master,
            Role::Chat => &mut self.chat,
            Role::Nat => &mut self.nat,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            login: Endpoint::new(DEFAULT_LOGIN_HOST, DEFAULT_LOGIN_PORT),
            chat: Endpoint::new(DEFAULT_CHAT_HOST, DEFAULT_CHAT_PORT),
            master: Endpoint::new(DEFAULT_MASTER_HOST, DEFAULT_MASTER_PORT),
            nat: Endpoint::new(DEFAULT_NAT_HOST, DEFAULT_NAT_PORT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_index_matches_all_ordering() {
        for (position, role) in Role::ALL.iter().enumerate() {
            assert_eq!(role.index(), position, "{role} is out of order");
        }
        assert_eq!(Role::ALL.len(), Role::COUNT);
    }

    #[test]
    fn test_default_config_uses_revora_and_legacy_hosts() {
        // Arrange / Act
        let config = BackendConfig::default();

        // Assert
        assert_eq!(config.backend, "Revora");
        assert_eq!(config.endpoint(Role::Login).to_string(), "gpcm.gamespy.com:29900");
        assert_eq!(config.endpoint(Role::Chat).to_string(), "peerchat.gamespy.com:6667");
        assert_eq!(
            config.endpoint(Role::Master).to_string(),
            "ccgenzh.ms6.gamespy.com:28900"
        );
        assert_eq!(config.endpoint(Role::Nat).to_string(), "natneg1.gamespy.com:27901");
    }

    #[test]
    fn test_endpoint_mut_edits_the_selected_role_only() {
        // Arrange
        let mut config = BackendConfig::default();

        // Act
        config.endpoint_mut(Role::Master).port = 1;

        // Assert
        assert_eq!(config.master.port, 1);
        assert_eq!(config.login.port, DEFAULT_LOGIN_PORT);
    }
}

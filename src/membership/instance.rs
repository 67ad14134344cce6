use nanoid::nanoid;
use serde::Deserialize;
use serde::Serialize;

use crate::utils::IdGenerator;

const PASSWORD_LEN: usize = 32;
const PASSWORD_ALPHABET: [char; 62] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm',
    'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J',
    'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

/// Identity of one remote event server as published by discovery.
///
/// Observed instances are immutable; a refresh replaces them wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInstance {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl ServerInstance {
    /// Server known only by address, as configured for static discovery
    pub fn from_address(
        ip: &str,
        port: u16,
    ) -> Self {
        Self {
            ip: ip.to_string(),
            port: Some(port),
            device_id: None,
            account: format!("{ip}:{port}"),
            password: None,
        }
    }

    /// `ip:port`, when the port is known
    pub fn socket_addr(&self) -> Option<String> {
        self.port.map(|port| format!("{}:{}", self.ip, port))
    }
}

/// This process's identity towards the servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkInstance {
    pub device_id: String,
    pub account: String,
    pub password: String,
    pub ip: String,
    pub port: u16,
}

impl SdkInstance {
    /// Fresh identity: account `sdk{device_id}` with a random password.
    pub fn generate(
        ids: &IdGenerator,
        ip: String,
        port: u16,
    ) -> Self {
        let device_id = ids.next_id().to_string();
        Self {
            account: format!("sdk{device_id}"),
            password: nanoid!(PASSWORD_LEN, &PASSWORD_ALPHABET),
            device_id,
            ip,
            port,
        }
    }

    /// Identity with a preconfigured credential
    pub fn with_account(
        ids: &IdGenerator,
        account: &str,
        password: &str,
        ip: String,
        port: u16,
    ) -> Self {
        Self {
            device_id: ids.next_id().to_string(),
            account: account.to_string(),
            password: password.to_string(),
            ip,
            port,
        }
    }
}

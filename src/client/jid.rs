//! Account and chat addresses (`user[:device]@server`).

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";

/// A parsed address. Device ids only appear on own-identity addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    pub user: String,
    pub device: Option<u16>,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: None,
            server: server.into(),
        }
    }

    /// Personal chat address for a bare phone number. A leading `+` is dropped.
    pub fn personal(phone: &str) -> Self {
        Self::new(phone.trim().trim_start_matches('+'), USER_SERVER)
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    /// Broadcast lists and the status feed.
    pub fn is_broadcast(&self) -> bool {
        self.server == BROADCAST_SERVER
    }

    /// `+<user>`
    pub fn phone(&self) -> String {
        format!("+{}", self.user)
    }

    /// Same address without the device part.
    pub fn to_non_device(&self) -> Self {
        Self::new(self.user.clone(), self.server.clone())
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device {
            Some(device) => write!(f, "{}:{}@{}", self.user, device, self.server),
            None => write!(f, "{}@{}", self.user, self.server),
        }
    }
}

impl FromStr for Jid {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (local, server) = s
            .trim()
            .split_once('@')
            .ok_or_else(|| BridgeError::InvalidInput(format!("not a JID: {:?}", s)))?;

        if server.is_empty() || server.contains('@') {
            return Err(BridgeError::InvalidInput(format!("not a JID: {:?}", s)));
        }

        let (user, device) = match local.split_once(':') {
            Some((user, device)) => {
                let device = device
                    .parse()
                    .map_err(|_| BridgeError::InvalidInput(format!("bad device in JID: {:?}", s)))?;
                (user, Some(device))
            }
            None => (local, None),
        };

        if user.is_empty() {
            return Err(BridgeError::InvalidInput(format!("empty user in JID: {:?}", s)));
        }

        Ok(Self {
            user: user.to_string(),
            device,
            server: server.to_string(),
        })
    }
}

impl TryFrom<String> for Jid {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let jid: Jid = "15551234567@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "15551234567");
        assert_eq!(jid.device, None);
        assert_eq!(jid.to_string(), "15551234567@s.whatsapp.net");
        assert_eq!(jid.phone(), "+15551234567");

        let own: Jid = "15551234567:12@s.whatsapp.net".parse().unwrap();
        assert_eq!(own.device, Some(12));
        assert_eq!(own.to_string(), "15551234567:12@s.whatsapp.net");
        assert_eq!(own.to_non_device(), jid);
    }

    #[test]
    fn test_server_classification() {
        let group: Jid = "120363025246125486@g.us".parse().unwrap();
        assert!(group.is_group());
        assert!(!group.is_broadcast());

        let status: Jid = "status@broadcast".parse().unwrap();
        assert!(status.is_broadcast());
        assert!(!status.is_group());
    }

    #[test]
    fn test_personal_from_phone() {
        assert_eq!(
            Jid::personal("+15551234567").to_string(),
            "15551234567@s.whatsapp.net"
        );
    }

    #[test]
    fn test_rejects_malformed() {
        for input in ["", "no-at-sign", "@s.whatsapp.net", "user@", "user:x@s.whatsapp.net"] {
            assert!(input.parse::<Jid>().is_err(), "{:?} should not parse", input);
        }
    }
}

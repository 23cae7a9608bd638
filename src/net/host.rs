use std::{fmt, str::FromStr};

/// Host name/port of a store server.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Host {
    /// Host name or IP address of the store server.
    pub name: String,
    /// Port of the store server.
    pub port: u16,
}

impl Host {
    /// Default port of the backing list store.
    pub const DEFAULT_PORT: u16 = 6379;

    /// Create a new host instance given a hostname/IP and a port number.
    #[must_use]
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    /// Returns a string representation of the host's address.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseHostError {
    #[error("Invalid address string")]
    InvalidArgument,
    #[error("Invalid port number")]
    PortNumber(#[source] std::num::ParseIntError),
}

impl FromStr for Host {
    type Err = ParseHostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s.is_empty() => Err(ParseHostError::InvalidArgument),
            None => Ok(Self::new(s, Self::DEFAULT_PORT)),
            Some((name, _)) if name.is_empty() => Err(ParseHostError::InvalidArgument),
            Some((name, port)) => Ok(Self::new(
                name,
                port.parse().map_err(ParseHostError::PortNumber)?,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Host;

    #[test]
    fn parse() {
        assert_eq!("foo".parse::<Host>().unwrap(), Host::new("foo", 6379));
        assert_eq!(
            "foo:1234".parse::<Host>().unwrap(),
            Host::new("foo", 1234)
        );
        assert!("".parse::<Host>().is_err());
        assert!("foo:bar".parse::<Host>().is_err());
    }
}

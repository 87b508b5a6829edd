use ipnet::IpNet;
use std::net::IpAddr;

/// A network or a single address, as accepted by `remoteCidr` and the
/// static API server override.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(untagged)]
pub enum Cidr {
    Addr(IpAddr),
    Net(#[schemars(with = "String")] IpNet),
}

#[derive(Debug, thiserror::Error)]
#[error("not a valid CIDR or IP address: {0}")]
pub struct CidrParseError(String);

// === impl Cidr ===

impl Cidr {
    /// Formats the value as a network in prefix notation. Single addresses
    /// become host routes (`/32` or `/128`).
    pub fn to_block(&self) -> String {
        IpNet::from(*self).to_string()
    }

    #[inline]
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match self {
            Self::Net(net) => net.contains(addr),
            Self::Addr(this) => this == addr,
        }
    }
}

impl std::str::FromStr for Cidr {
    type Err = CidrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(net) = s.parse() {
            return Ok(Self::Net(net));
        }

        if let Ok(addr) = s.parse() {
            return Ok(Self::Addr(addr));
        }

        Err(CidrParseError(s.to_string()))
    }
}

impl From<Cidr> for IpNet {
    fn from(cidr: Cidr) -> IpNet {
        match cidr {
            Cidr::Net(net) => net,
            Cidr::Addr(addr) => IpNet::from(addr),
        }
    }
}

impl From<IpNet> for Cidr {
    fn from(net: IpNet) -> Self {
        Self::Net(net)
    }
}

impl From<IpAddr> for Cidr {
    fn from(addr: IpAddr) -> Self {
        Self::Addr(addr)
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Addr(addr) => addr.fmt(f),
            Self::Net(net) => net.fmt(f),
        }
    }
}

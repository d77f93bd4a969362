use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use log::warn;

const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const DEFAULT_PORT: u16 = 0;
const DEFAULT_HWM: usize = 1;

/// Where and how the broker listens for clients.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    addr: SocketAddr,
    hwm: usize,
}

impl BrokerConfig {
    /// Creates a new broker configuration with a high-water mark of one message.
    ///
    /// # Args
    /// * `addr` - The address to listen at, port zero picks an ephemeral one.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            hwm: DEFAULT_HWM,
        }
    }

    /// Reads the configuration from the `HOST`, `PORT` and `BROKER_HWM` variables.
    ///
    /// Missing or unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        let host = parse_var("HOST").unwrap_or(DEFAULT_HOST);
        let port = parse_var("PORT").unwrap_or(DEFAULT_PORT);
        let hwm = parse_var("BROKER_HWM").unwrap_or(DEFAULT_HWM);

        Self::new(SocketAddr::new(host, port)).with_hwm(hwm)
    }

    /// Sets how many client messages may queue before connections stop being read.
    pub fn with_hwm(mut self, hwm: usize) -> Self {
        self.hwm = hwm.max(1);
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn hwm(&self) -> usize {
        self.hwm
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = env::var(key).ok()?;

    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("ignoring {key}={value:?}, it can't be parsed");
            None
        }
    }
}

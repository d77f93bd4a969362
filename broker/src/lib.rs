mod broker;
pub mod capabilities;
pub mod config;
pub mod error;
mod service;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use error::{BrokerErr, Result};
pub use service::Service;

//! Resilient realtime channels.
//!
//! A channel is a [`machine::ChannelMachine`] (pure lifecycle rules) run by a
//! [`driver::ChannelClient`] (timers, transport tasks, fan-out). Transports
//! are pluggable through [`transport::Connector`].

pub mod driver;
pub mod endpoint;
pub mod env;
pub mod machine;
pub mod transport;

pub use driver::{ChannelClient, ChannelHandle};
pub use endpoint::{Concern, Endpoint};
pub use env::{EnvSignal, Environment};
pub use machine::{ConnectionStatus, InboundMessage};
pub use transport::{Connector, Transport, TransportError, WsConnector};

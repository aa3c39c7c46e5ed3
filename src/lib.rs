pub mod actors;
pub mod bus;
pub mod command;
pub mod config;
pub mod envelope;
pub mod error;
pub mod outputs;
pub mod sources;
pub mod util;

pub use actors::output::{OutputRunner, Sink};
pub use actors::source::{Source, SourceActor, SourceState};
pub use bus::{BusClient, BusMessage, MessageBus, Topics};
pub use command::{CommandRouter, StatusQuery, StatusRequest, parse_command};
pub use envelope::{Envelope, ErrorEnvelope, Status, StatusEnvelope, StatusRecord};
pub use error::{CommandParsingError, DeliveryError, FetchError, RouteError};

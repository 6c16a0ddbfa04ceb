pub mod backoff;
pub mod connection;
pub mod listener;
pub mod transport;

pub use backoff::Backoff;
pub use connection::Connection;
pub use listener::{LinkListener, ListenerRegistry};
pub use transport::{BoxedTransport, Connector, Endpoint, TcpConnector, Transport};

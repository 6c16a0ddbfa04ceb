pub mod connection;
pub mod pairing;

pub use connection::ConnectionState;
pub use pairing::PairingState;

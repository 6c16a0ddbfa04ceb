//! # classlink-device: Classroom Device Agent
//!
//! Foreground agent that pairs a classroom device with the teacher
//! server, then keeps the control channel alive: periodic status
//! updates, lock/unlock tracking and material/feedback notifications.
//!
//! The server is taken from the config file or found through its UDP
//! announcement when no host is configured.

pub mod agent;
pub mod config;

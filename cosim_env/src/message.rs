//! Discrete messages exchanged between endpoints.

use crate::types::SimTime;
use serde::{Deserialize, Serialize};

/// An addressed message travelling between endpoints.
///
/// `original_source` and `original_destination` are preserved when a
/// filter rewrites the route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Federation-unique sequence number (assigned at admission).
    pub id: u64,

    /// Endpoint name the message was sent from.
    pub source: String,

    /// Endpoint name the message is delivered to.
    pub destination: String,

    pub original_source: String,

    pub original_destination: String,

    /// Time the message entered the federation.
    pub send_time: SimTime,

    /// Delivery time (after filters).
    pub time: SimTime,

    pub payload: Vec<u8>,
}

impl Message {
    /// Payload interpreted as UTF-8, lossily.
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Transit delay between admission and delivery.
    pub fn delay(&self) -> SimTime {
        self.time - self.send_time
    }

    /// Returns true if a filter rerouted this message.
    pub fn was_rerouted(&self) -> bool {
        self.destination != self.original_destination
    }
}

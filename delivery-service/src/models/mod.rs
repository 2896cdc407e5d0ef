pub mod message;

pub use message::{CacheEntry, DeliveryRecord, DeliveryState, Message, MessageEnvelope};

pub mod coordinator;
pub mod dispatcher;
pub mod encryption;
pub mod inbox;
pub mod user_store;

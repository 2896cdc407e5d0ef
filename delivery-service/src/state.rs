use crate::{
    cache::CacheStore, services::coordinator::DeliveryCoordinator,
    services::encryption::EncryptionService,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DeliveryCoordinator>,
    pub cache: Arc<dyn CacheStore>,
    pub encryption: Arc<EncryptionService>,
}

use shared_types::{Address, Message, QueueName};
use std::sync::Arc;

use crate::adapters::memory::InMemoryPagingStoreFactory;
use crate::domain::config::PagingConfig;
use crate::domain::settings::{AddressSettings, AddressSettingsRepository};
use crate::ports::inbound::PagingApi;
use crate::service::manager::PagingManager;

pub fn addr(name: &str) -> Address {
    Address::new(name).unwrap()
}

pub fn queue(name: &str) -> QueueName {
    QueueName::new(name).unwrap()
}

/// Started manager over `factory`.
pub fn start_manager(
    factory: &Arc<InMemoryPagingStoreFactory>,
    config: PagingConfig,
    settings: AddressSettings,
) -> Arc<PagingManager> {
    let manager = PagingManager::new(
        config,
        factory.clone(),
        Arc::new(AddressSettingsRepository::new(settings)),
    )
    .unwrap();
    manager.start().unwrap();
    Arc::new(manager)
}

pub fn memory_manager(settings: AddressSettings) -> (Arc<InMemoryPagingStoreFactory>, Arc<PagingManager>) {
    let factory = Arc::new(InMemoryPagingStoreFactory::new());
    let manager = start_manager(&factory, PagingConfig::default(), settings);
    (factory, manager)
}

/// Message whose resident estimate is exactly `body` bytes.
pub fn message(manager: &PagingManager, address: &Address, body: usize) -> Message {
    Message::new(manager.next_message_id(), address.clone(), vec![7; body])
}

//! Networked backend: repositories that ship every call to the document
//! server as one JSON command.

pub mod client;
pub mod repository;
pub mod wire;

pub use client::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DocumentClient};
pub use repository::NetworkedRepository;

use crate::audit::Auditor;
use crate::entity::Entity;

#[derive(Debug, Clone)]
pub struct NetworkedBackend {
    client: DocumentClient,
    auditor: Auditor,
}

impl NetworkedBackend {
    pub fn new(client: DocumentClient, auditor: Auditor) -> Self {
        Self { client, auditor }
    }

    pub fn client(&self) -> &DocumentClient {
        &self.client
    }

    pub fn repository<T: Entity>(&self) -> NetworkedRepository<T> {
        NetworkedRepository::new(self.client.clone(), self.auditor.clone())
    }
}

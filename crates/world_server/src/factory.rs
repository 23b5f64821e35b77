//! # Client Factory
//!
//! Maps an incoming connection to a client entity. The default factory
//! resolves authenticated principals by display name and mints blank guests
//! for everyone else; deployments replace it to integrate their identity
//! provider or to resume interrupted sessions via the client-id session
//! attribute.

use async_trait::async_trait;

use crate::error::WorldError;
use crate::model::{Client, ClientKind};
use crate::session::ClientSession;
use crate::store::ObjectStore;

/// Session attribute holding the logged-in client's id, written at login so
/// a reconnecting transport can find its previous client.
pub const CLIENT_ID_ATTRIBUTE: &str = "client-id";

#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Name of the session attribute the client id is stored under.
    fn client_id_attribute(&self) -> &str {
        CLIENT_ID_ATTRIBUTE
    }

    /// Resolve an authenticated principal to an existing client. `None`
    /// rejects the login.
    async fn find_client(
        &self,
        kind: ClientKind,
        principal: &str,
        store: &dyn ObjectStore,
        _session: &dyn ClientSession,
    ) -> Result<Option<Client>, WorldError> {
        let found = store.get_client_by_name(principal).await?;
        Ok(found.filter(|client| client.client_kind == kind))
    }

    /// Produce a client for an unauthenticated connection when guest access
    /// is enabled. `None` rejects the login.
    async fn create_guest_client(
        &self,
        kind: ClientKind,
        _session: &dyn ClientSession,
    ) -> Result<Option<Client>, WorldError> {
        // Guests are always plain users; a remote server must identify.
        if kind != ClientKind::User {
            return Ok(None);
        }
        let mut client = Client::new();
        client.client_kind = kind;
        Ok(Some(client))
    }

    /// Last resort for unauthenticated connections when guest access is
    /// disabled. `None` rejects the login.
    async fn handle_unknown_client(
        &self,
        _kind: ClientKind,
        _session: &dyn ClientSession,
    ) -> Result<Option<Client>, WorldError> {
        Ok(None)
    }
}

/// The stock factory: principals by name, guests for the rest.
#[derive(Debug, Default)]
pub struct DefaultClientFactory;

#[async_trait]
impl ClientFactory for DefaultClientFactory {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;
    use crate::store::MemoryStore;
    use crate::testing::TestSession;

    #[tokio::test]
    async fn finds_principal_by_name_and_kind() {
        let store = MemoryStore::new();
        store
            .save(Entity::Client(Client::named("hana")))
            .await
            .unwrap();
        let session = TestSession::new();

        let found = DefaultClientFactory
            .find_client(ClientKind::User, "hana", &store, session.as_ref())
            .await
            .unwrap();
        assert!(found.is_some());

        // Same name, wrong kind: no match.
        let found = DefaultClientFactory
            .find_client(ClientKind::RemoteServer, "hana", &store, session.as_ref())
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn guests_are_users_only() {
        let session = TestSession::new();
        let guest = DefaultClientFactory
            .create_guest_client(ClientKind::User, session.as_ref())
            .await
            .unwrap();
        assert!(guest.is_some());

        let server_guest = DefaultClientFactory
            .create_guest_client(ClientKind::RemoteServer, session.as_ref())
            .await
            .unwrap();
        assert!(server_guest.is_none());
    }
}

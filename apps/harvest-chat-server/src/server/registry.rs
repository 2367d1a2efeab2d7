use std::collections::{HashMap, HashSet};

use harvest_core::UserId;
use uuid::Uuid;

/// Which live connections each identity currently holds open. Broadcast
/// membership lives with the room groups; this map answers presence
/// questions and keeps the disconnect path honest. Only the connection
/// event loop mutates it, so plain map access under the state lock is
/// all the discipline it needs.
#[derive(Debug, Default)]
pub(crate) struct ConnectionRegistry {
    entries: HashMap<UserId, HashSet<Uuid>>,
}

impl ConnectionRegistry {
    pub(crate) fn attach(&mut self, identity: &UserId, connection_id: Uuid) {
        self.entries
            .entry(identity.clone())
            .or_default()
            .insert(connection_id);
    }

    /// Remove one connection; an identity with no remaining connections
    /// is dropped entirely so no empty sets accumulate.
    pub(crate) fn detach(&mut self, identity: &UserId, connection_id: Uuid) {
        let Some(connections) = self.entries.get_mut(identity) else {
            return;
        };
        connections.remove(&connection_id);
        if connections.is_empty() {
            self.entries.remove(identity);
        }
    }

    pub(crate) fn connection_count(&self, identity: &UserId) -> usize {
        self.entries
            .get(identity)
            .map_or(0, std::collections::HashSet::len)
    }

    pub(crate) fn tracked_identities(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionRegistry;
    use harvest_core::UserId;
    use uuid::Uuid;

    fn user(value: &str) -> UserId {
        UserId::try_from(value.to_owned()).expect("valid user id")
    }

    #[test]
    fn attach_is_idempotent() {
        let mut registry = ConnectionRegistry::default();
        let identity = user("farmer-a");
        let connection_id = Uuid::new_v4();

        registry.attach(&identity, connection_id);
        registry.attach(&identity, connection_id);

        assert_eq!(registry.connection_count(&identity), 1);
    }

    #[test]
    fn supports_multiple_devices_per_identity() {
        let mut registry = ConnectionRegistry::default();
        let identity = user("farmer-a");

        registry.attach(&identity, Uuid::new_v4());
        registry.attach(&identity, Uuid::new_v4());

        assert_eq!(registry.connection_count(&identity), 2);
    }

    #[test]
    fn detach_prunes_empty_identity_entries() {
        let mut registry = ConnectionRegistry::default();
        let identity = user("farmer-a");
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        registry.attach(&identity, first);
        registry.attach(&identity, second);

        registry.detach(&identity, first);
        assert_eq!(registry.connection_count(&identity), 1);
        assert_eq!(registry.tracked_identities(), 1);

        registry.detach(&identity, second);
        assert_eq!(registry.connection_count(&identity), 0);
        assert_eq!(registry.tracked_identities(), 0);
    }

    #[test]
    fn detach_of_unknown_connection_is_a_no_op() {
        let mut registry = ConnectionRegistry::default();
        let identity = user("farmer-a");
        registry.detach(&identity, Uuid::new_v4());
        assert_eq!(registry.tracked_identities(), 0);
    }
}

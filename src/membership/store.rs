use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ServerInstance;
use crate::stream::ServerInstanceClient;
use crate::Result;

/// Server instances keyed by account
pub type InstanceMap = BTreeMap<String, ServerInstance>;

/// One accepted membership change.
#[derive(Clone)]
pub struct ServerChangeEvent {
    /// 0 for the first accepted change, +1 for each one after
    pub generation: u64,
    pub insert_list: Vec<Arc<ServerInstanceClient>>,
    pub delete_list: Vec<Arc<ServerInstanceClient>>,
}

pub trait ServerListener: Send + Sync {
    fn on_change(
        &self,
        event: &ServerChangeEvent,
    );
}

/// Read handle on a membership snapshot.
///
/// The snapshot never changes while the handle is held; the store swaps in
/// a new list instead. Dropping the handle releases it.
#[derive(Clone)]
pub struct ServerListRef {
    clients: Arc<Vec<Arc<ServerInstanceClient>>>,
}

impl Deref for ServerListRef {
    type Target = [Arc<ServerInstanceClient>];

    fn deref(&self) -> &Self::Target {
        &self.clients
    }
}

/// Copy-on-write set of live [`ServerInstanceClient`]s plus change listeners.
pub struct MembershipStore {
    clients: ArcSwap<Vec<Arc<ServerInstanceClient>>>,
    listeners: RwLock<Vec<Arc<dyn ServerListener>>>,
    known: Mutex<KnownState>,
}

#[derive(Default)]
struct KnownState {
    instances: InstanceMap,
    generation: u64,
}

impl Default for MembershipStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MembershipStore {
    pub fn new() -> Self {
        Self {
            clients: ArcSwap::from_pointee(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            known: Mutex::new(KnownState::default()),
        }
    }

    pub fn server_list_ref(&self) -> ServerListRef {
        ServerListRef {
            clients: self.clients.load_full(),
        }
    }

    pub fn add_listener(
        &self,
        listener: Arc<dyn ServerListener>,
    ) {
        self.listeners.write().push(listener);
    }

    pub fn generation(&self) -> u64 {
        self.known.lock().generation
    }

    /// Reconciles the live set with a freshly fetched instance map.
    ///
    /// `None` means the backend could not be read and keeps the current set.
    /// Accounts that disappeared are discovery-closed and dropped from the
    /// list, new accounts get a client from `factory`, surviving clients are
    /// kept as they are. Listeners see one event per non-empty change.
    pub fn apply<F>(
        &self,
        fetched: Option<InstanceMap>,
        mut factory: F,
    ) -> Option<ServerChangeEvent>
    where
        F: FnMut(&ServerInstance) -> Result<Arc<ServerInstanceClient>>,
    {
        let Some(mut fetched) = fetched else {
            warn!("membership source unavailable, keeping stale server list");
            return None;
        };

        let mut known = self.known.lock();
        let deleted: Vec<&ServerInstance> = known
            .instances
            .iter()
            .filter(|(account, _)| !fetched.contains_key(*account))
            .map(|(_, instance)| instance)
            .collect();
        let inserted: Vec<ServerInstance> = fetched
            .iter()
            .filter(|(account, _)| !known.instances.contains_key(*account))
            .map(|(_, instance)| instance.clone())
            .collect();
        if deleted.is_empty() && inserted.is_empty() {
            return None;
        }
        info!(insert = ?accounts(&inserted), delete = ?deleted.iter().map(|i| &i.account).collect::<Vec<_>>(), "server membership changed");

        let current = self.clients.load_full();
        let delete_list: Vec<Arc<ServerInstanceClient>> = current
            .iter()
            .filter(|c| deleted.iter().any(|d| d.account == c.account()))
            .cloned()
            .collect();
        for client in delete_list.iter() {
            client.discovery_close();
        }

        let mut insert_list = Vec::with_capacity(inserted.len());
        for instance in inserted.iter() {
            match factory(instance) {
                Ok(client) => insert_list.push(client),
                Err(e) => {
                    // Left out of the known set so the next refresh retries it.
                    error!(account = %instance.account, ip = %instance.ip, "new server instance client failed: {}", e);
                    fetched.remove(&instance.account);
                }
            }
        }

        if insert_list.is_empty() && delete_list.is_empty() {
            known.instances = fetched;
            return None;
        }

        let next: Vec<Arc<ServerInstanceClient>> = current
            .iter()
            .filter(|c| !delete_list.iter().any(|d| Arc::ptr_eq(c, d)))
            .chain(insert_list.iter())
            .cloned()
            .collect();
        self.clients.store(Arc::new(next));

        let event = ServerChangeEvent {
            generation: known.generation,
            insert_list,
            delete_list,
        };
        for listener in self.listeners.read().iter() {
            listener.on_change(&event);
        }
        known.instances = fetched;
        known.generation += 1;
        Some(event)
    }
}

fn accounts(instances: &[ServerInstance]) -> Vec<&str> {
    instances.iter().map(|i| i.account.as_str()).collect()
}

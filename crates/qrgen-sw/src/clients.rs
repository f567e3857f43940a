//! Page contexts the worker can control.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tracing::debug;
use url::{Origin, Url};

use crate::ServiceWorkerId;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// A client (open page or worker).
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub client_type: ClientType,
    pub focused: bool,
    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// Create an uncontrolled window client.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }
}

/// Options for `match_all`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Match clients by type and control status.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller.is_some())
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect()
    }

    /// Open and focus a new window client.
    pub fn open_window(&mut self, url: Url) -> Client {
        let mut client = Client::window(url);
        client.focused = true;
        debug!(client_id = %client.id, url = %client.url, "Opened window client");
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Take control of every client on `scope`. Returns the number claimed.
    pub fn claim(&mut self, worker: ServiceWorkerId, scope: &Origin) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.url.origin() == *scope && client.controller != Some(worker) {
                client.controller = Some(worker);
                claimed += 1;
            }
        }
        claimed
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

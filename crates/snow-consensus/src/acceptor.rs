//! Fan-out of accepted containers to external subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use snow_ids::Id;
use tracing::{error, warn};

use crate::{ConsensusError, Result};

/// A subscriber notified of every container a chain accepts.
pub trait Acceptor: Send + Sync {
    fn accept(&self, chain_id: Id, container_id: Id, container: &[u8]) -> Result<()>;
}

#[derive(Clone)]
struct Registered {
    acceptor: Arc<dyn Acceptor>,
    die_on_error: bool,
}

/// Acceptors registered per chain, by name.
///
/// Acceptors of one chain are called in no particular order. A failing
/// acceptor registered with `die_on_error` aborts the fan-out and its error
/// is returned; any other failure is logged and the fan-out continues.
#[derive(Default)]
pub struct AcceptorGroup {
    acceptors: RwLock<HashMap<Id, HashMap<String, Registered>>>,
}

impl AcceptorGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `acceptor` under `name` for `chain_id`.
    ///
    /// Fails with `AcceptorExists` if the name is taken for that chain, in
    /// which case the existing registration is left untouched.
    pub fn register_acceptor(
        &self,
        chain_id: Id,
        name: impl Into<String>,
        acceptor: Arc<dyn Acceptor>,
        die_on_error: bool,
    ) -> Result<()> {
        let name = name.into();
        let mut acceptors = self.acceptors.write();
        let chain = acceptors.entry(chain_id).or_default();
        if chain.contains_key(&name) {
            return Err(ConsensusError::AcceptorExists { chain_id, name });
        }
        chain.insert(
            name,
            Registered {
                acceptor,
                die_on_error,
            },
        );
        Ok(())
    }

    /// Removes a registration. Unknown names are ignored.
    pub fn deregister_acceptor(&self, chain_id: Id, name: &str) -> Result<()> {
        let mut acceptors = self.acceptors.write();
        if let Some(chain) = acceptors.get_mut(&chain_id) {
            chain.remove(name);
            if chain.is_empty() {
                acceptors.remove(&chain_id);
            }
        }
        Ok(())
    }

    /// Number of acceptors registered for `chain_id`.
    pub fn len(&self, chain_id: &Id) -> usize {
        self.acceptors.read().get(chain_id).map_or(0, HashMap::len)
    }

    /// Notifies every acceptor of `chain_id` that `container_id` was accepted.
    pub fn accept(&self, chain_id: Id, container_id: Id, container: &[u8]) -> Result<()> {
        // Acceptors run without the lock held so they may register others.
        let registered: Vec<(String, Registered)> = match self.acceptors.read().get(&chain_id) {
            Some(chain) => chain
                .iter()
                .map(|(name, entry)| (name.clone(), entry.clone()))
                .collect(),
            None => return Ok(()),
        };

        for (name, entry) in registered {
            let Err(err) = entry.acceptor.accept(chain_id, container_id, container) else {
                continue;
            };
            if entry.die_on_error {
                error!(%chain_id, %container_id, acceptor = %name, %err, "acceptor failed");
                return Err(ConsensusError::Acceptor {
                    chain_id,
                    name,
                    reason: err.to_string(),
                });
            }
            warn!(%chain_id, %container_id, acceptor = %name, %err, "acceptor failed");
        }
        Ok(())
    }
}

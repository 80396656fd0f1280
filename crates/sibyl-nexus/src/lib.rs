//! SIBYL Nexus - partition URI to authority endpoint resolution
//!
//! Pure lookup service. A partition URI's scheme selects the registered
//! plugin; the plugin maps it to the authority URI; one endpoint object
//! is lazily built per distinct authority URI and cached for process
//! lifetime. No retries and no conflict logic live here: failures are
//! immediate and fatal to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use sibyl_core::{Authority, AuthorityUri, PartitionUri, SibylError, SibylResult};

/// One registered scheme: resolves partition URIs to their authority and
/// constructs the endpoint for that authority.
pub trait AuthorityScheme: Send + Sync {
    fn authority_uri(&self, partition: &PartitionUri) -> SibylResult<AuthorityUri>;

    fn build(&self, authority: &AuthorityUri) -> SibylResult<Arc<dyn Authority>>;
}

#[derive(Default)]
pub struct AuthorityNexus {
    schemes: Mutex<HashMap<String, Arc<dyn AuthorityScheme>>>,
    endpoints: Mutex<HashMap<AuthorityUri, Arc<dyn Authority>>>,
}

impl AuthorityNexus {
    pub fn new() -> Self {
        AuthorityNexus::default()
    }

    pub fn register_scheme(&self, scheme: impl Into<String>, plugin: Arc<dyn AuthorityScheme>) {
        let scheme = scheme.into();
        tracing::debug!(%scheme, "registering authority scheme");
        self.schemes.lock().insert(scheme, plugin);
    }

    /// Map a partition URI to its authority URI.
    pub fn resolve_authority(&self, partition: &PartitionUri) -> SibylResult<AuthorityUri> {
        self.scheme_plugin(partition)?.authority_uri(partition)
    }

    /// The cached endpoint for a partition's authority, built on first use.
    pub fn obtain_authority(&self, partition: &PartitionUri) -> SibylResult<Arc<dyn Authority>> {
        let plugin = self.scheme_plugin(partition)?;
        let authority_uri = plugin.authority_uri(partition)?;

        let mut endpoints = self.endpoints.lock();
        if let Some(endpoint) = endpoints.get(&authority_uri) {
            return Ok(Arc::clone(endpoint));
        }
        let endpoint = plugin.build(&authority_uri)?;
        endpoints.insert(authority_uri, Arc::clone(&endpoint));
        Ok(endpoint)
    }

    fn scheme_plugin(&self, partition: &PartitionUri) -> SibylResult<Arc<dyn AuthorityScheme>> {
        let scheme = partition.scheme();
        self.schemes
            .lock()
            .get(scheme)
            .cloned()
            .ok_or_else(|| SibylError::UnknownScheme(scheme.to_string()))
    }
}

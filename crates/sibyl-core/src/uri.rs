//! Partition and authority URIs
//!
//! A partition URI names one partition of the object graph; its scheme
//! selects the resolver that maps it to the URI of the single authority
//! responsible for ordering that partition's events.

use std::fmt;

use crate::PartitionId;

/// URI of one partition, e.g. `valaa-memory:?id=abcd`
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionUri(String);

impl PartitionUri {
    pub fn new(uri: impl Into<String>) -> Self {
        PartitionUri(uri.into())
    }

    /// Derive the partition URI from its authority URI and partition id.
    pub fn derive(authority: &AuthorityUri, partition: PartitionId) -> Self {
        PartitionUri(format!("{}?id={}", authority.as_str(), partition))
    }

    /// The scheme prefix before the first `:`, or the whole string if none.
    pub fn scheme(&self) -> &str {
        match self.0.find(':') {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PartitionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionUri({})", self.0)
    }
}

impl fmt::Display for PartitionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartitionUri {
    fn from(s: &str) -> Self {
        PartitionUri(s.to_string())
    }
}

/// URI of the authority endpoint ordering one or more partitions
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AuthorityUri(String);

impl AuthorityUri {
    pub fn new(uri: impl Into<String>) -> Self {
        AuthorityUri(uri.into())
    }

    pub fn scheme(&self) -> &str {
        match self.0.find(':') {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for AuthorityUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorityUri({})", self.0)
    }
}

impl fmt::Display for AuthorityUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AuthorityUri {
    fn from(s: &str) -> Self {
        AuthorityUri(s.to_string())
    }
}

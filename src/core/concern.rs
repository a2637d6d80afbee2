use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Acknowledgement level requested for a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAcknowledgement {
    Majority,
    Nodes(u32),
    Tagged(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConcern {
    pub w: WriteAcknowledgement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wtimeout: Option<Duration>,
}

impl WriteConcern {
    pub fn majority() -> Self {
        Self {
            w: WriteAcknowledgement::Majority,
            journal: None,
            wtimeout: None,
        }
    }

    pub fn nodes(n: u32) -> Self {
        Self {
            w: WriteAcknowledgement::Nodes(n),
            journal: None,
            wtimeout: None,
        }
    }

    pub fn with_journal(mut self, journal: bool) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.wtimeout = Some(timeout);
        self
    }

    pub fn is_majority(&self) -> bool {
        self.w == WriteAcknowledgement::Majority
    }
}

/// Where the operation's write concern came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteConcernProvenance {
    /// Supplied explicitly by an external client.
    ClientSupplied,
    /// Filled in by the server, e.g. a cluster-wide default.
    Implicit,
    /// Set by internal machinery.
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadConcernLevel {
    Local,
    Majority,
    Snapshot,
    Linearizable,
    Available,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadConcern {
    pub level: ReadConcernLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_cluster_time: Option<u64>,
}

impl ReadConcern {
    pub fn new(level: ReadConcernLevel) -> Self {
        Self {
            level,
            after_cluster_time: None,
        }
    }
}

/// Write concern actually attached to an outgoing envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveWriteConcern {
    /// Caller's explicit write concern, forwarded verbatim.
    Explicit(WriteConcern),
    Majority,
    /// No write concern on the envelope; the enclosing transaction's applies.
    Transaction,
}

impl EffectiveWriteConcern {
    /// Value to serialize into the envelope, if any.
    pub fn to_write_concern(&self) -> Option<WriteConcern> {
        match self {
            EffectiveWriteConcern::Explicit(wc) => Some(wc.clone()),
            EffectiveWriteConcern::Majority => Some(WriteConcern::majority()),
            EffectiveWriteConcern::Transaction => None,
        }
    }
}

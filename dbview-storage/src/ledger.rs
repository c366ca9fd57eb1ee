//! Staleness ledger: the durable record of what has ever been fetched.
//!
//! A ledger entry is the fact "(entity, identity, aspect) was fetched from
//! the origin at least once". Entries are set once and never retracted.
//! A lookup may miss an entry another writer is committing concurrently;
//! that only costs a redundant origin round trip since merges are
//! idempotent. A lookup never reports an entry that was not committed.

use std::fmt;
use std::sync::Arc;

use dbview_core::{Identity, ViewResult};
use tracing::trace;

use crate::store::{DataStore, WriteBatch};

/// Aspect string for "the whole entity, by identity".
pub const ENTITY_ASPECT: &str = "-";

/// Separator used when a ledger key is flattened into a single byte key.
const KEY_SEPARATOR: char = '\0';

/// Escape prefix for separators and itself inside a flattened part.
const KEY_ESCAPE: char = '\\';

/// What part of an entity a ledger entry covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Aspect {
    /// The row itself, loaded by identity.
    Entity,
    /// A named relation on the row.
    Field(String),
    /// A caller-tagged bulk query scoped to a context identity.
    Query(String),
}

impl Aspect {
    pub fn field(name: &str) -> Self {
        Aspect::Field(name.to_string())
    }

    pub fn query(tag: &str) -> Self {
        Aspect::Query(tag.to_string())
    }

    /// The tag stored in the ledger's aspect column.
    ///
    /// Field names and query tags share one namespace per entity.
    pub fn tag(&self) -> &str {
        match self {
            Aspect::Entity => ENTITY_ASPECT,
            Aspect::Field(name) => name,
            Aspect::Query(tag) => tag,
        }
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Primary key of a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LedgerKey {
    pub entity: String,
    /// Normalized identity text, see [`Identity::ledger_key`].
    pub identity: String,
    pub aspect: String,
}

impl LedgerKey {
    pub fn new(entity: &str, identity: &Identity, aspect: &Aspect) -> Self {
        Self {
            entity: entity.to_string(),
            identity: identity.ledger_key(),
            aspect: aspect.tag().to_string(),
        }
    }

    /// Flatten to `entity \0 identity \0 aspect`.
    ///
    /// NUL and backslash inside a part are escaped, so exactly two raw
    /// separators appear and every key decodes to itself.
    pub fn encode(&self) -> String {
        let len = self.entity.len() + self.identity.len() + self.aspect.len() + 2;
        let mut out = String::with_capacity(len);
        escape_into(&self.entity, &mut out);
        out.push(KEY_SEPARATOR);
        escape_into(&self.identity, &mut out);
        out.push(KEY_SEPARATOR);
        escape_into(&self.aspect, &mut out);
        out
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        let parts: Vec<&str> = encoded.split(KEY_SEPARATOR).collect();
        let [entity, identity, aspect] = parts.as_slice() else {
            return None;
        };
        Some(Self {
            entity: unescape(entity)?,
            identity: unescape(identity)?,
            aspect: unescape(aspect)?,
        })
    }
}

fn escape_into(part: &str, out: &mut String) {
    for c in part.chars() {
        match c {
            KEY_ESCAPE => {
                out.push(KEY_ESCAPE);
                out.push(KEY_ESCAPE);
            }
            KEY_SEPARATOR => {
                out.push(KEY_ESCAPE);
                out.push('0');
            }
            c => out.push(c),
        }
    }
}

fn unescape(part: &str) -> Option<String> {
    let mut out = String::with_capacity(part.len());
    let mut chars = part.chars();
    while let Some(c) = chars.next() {
        if c != KEY_ESCAPE {
            out.push(c);
            continue;
        }
        match chars.next()? {
            KEY_ESCAPE => out.push(KEY_ESCAPE),
            '0' => out.push(KEY_SEPARATOR),
            _ => return None,
        }
    }
    Some(out)
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}].{}", self.entity, self.identity, self.aspect)
    }
}

/// Ledger view over a cache store.
///
/// The ledger lives inside the cache store so that marks commit in the same
/// transaction as the rows they describe.
#[derive(Clone)]
pub struct StalenessLedger {
    store: Arc<dyn DataStore>,
}

impl StalenessLedger {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    pub async fn exists(&self, entity: &str, identity: &Identity, aspect: &Aspect) -> ViewResult<bool> {
        self.store
            .ledger_contains(&LedgerKey::new(entity, identity, aspect))
            .await
    }

    /// Stage a mark into a batch that will also carry the merged rows.
    pub fn stage(&self, batch: &mut WriteBatch, entity: &str, identity: &Identity, aspect: &Aspect) {
        let key = LedgerKey::new(entity, identity, aspect);
        trace!(ledger_key = %key, "Staging ledger mark");
        batch.mark(key);
    }

    /// Mark an aspect on its own. Returns true if the entry was newly inserted.
    pub async fn mark(&self, entity: &str, identity: &Identity, aspect: &Aspect) -> ViewResult<bool> {
        let mut batch = WriteBatch::new();
        self.stage(&mut batch, entity, identity, aspect);
        let summary = self.store.commit(batch).await?;
        Ok(summary.marks_inserted > 0)
    }
}

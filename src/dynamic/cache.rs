//! Resolved type and member cache.
//!
//! Entries are immutable once inserted and live until [`MemberCache::clear`]
//! at shutdown. Resolution runs outside the lock; if two threads race on a
//! cold key the first insert wins and both get the same token.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Constructor,
    Method,
    StaticMethod,
    Field,
    StaticField,
}

impl MemberKind {
    pub fn is_static(self) -> bool {
        matches!(self, MemberKind::StaticMethod | MemberKind::StaticField)
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemberKind::Constructor => "constructor",
            MemberKind::Method => "method",
            MemberKind::StaticMethod => "static method",
            MemberKind::Field => "field",
            MemberKind::StaticField => "static field",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct MemberKey {
    class: String,
    name: String,
    signature: String,
    kind: MemberKind,
}

struct Tables<C, M> {
    types: HashMap<String, C>,
    members: HashMap<MemberKey, M>,
}

pub struct MemberCache<C, M> {
    tables: Mutex<Tables<C, M>>,
    resolutions: AtomicUsize,
}

impl<C: Clone, M: Copy> MemberCache<C, M> {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                types: HashMap::new(),
                members: HashMap::new(),
            }),
            resolutions: AtomicUsize::new(0),
        }
    }

    /// Cached type for `name`, resolving (and pinning) it on first use.
    ///
    /// Failures are not cached; the next call resolves again.
    pub fn type_or_resolve<E>(&self, name: &str, resolve: impl FnOnce() -> Result<C, E>) -> Result<C, E> {
        if let Some(class) = self.tables().types.get(name) {
            return Ok(class.clone());
        }
        let resolved = resolve()?;
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        debug!(class = name, "resolved type");
        let mut tables = self.tables();
        Ok(tables.types.entry(name.to_owned()).or_insert(resolved).clone())
    }

    /// Cached member token, resolving it on first use.
    pub fn member_or_resolve<E>(
        &self,
        class: &str,
        name: &str,
        signature: &str,
        kind: MemberKind,
        resolve: impl FnOnce() -> Result<M, E>,
    ) -> Result<M, E> {
        let key = MemberKey {
            class: class.to_owned(),
            name: name.to_owned(),
            signature: signature.to_owned(),
            kind,
        };
        if let Some(member) = self.tables().members.get(&key) {
            return Ok(*member);
        }
        let resolved = resolve()?;
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        debug!(class, member = name, signature, %kind, "resolved member");
        Ok(*self.tables().members.entry(key).or_insert(resolved))
    }

    /// Number of successful host lookups performed so far.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        let tables = self.tables();
        tables.types.len() + tables.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, releasing pinned type references outside the lock.
    pub fn clear(&self) -> usize {
        let (types, members) = {
            let mut tables = self.tables();
            (std::mem::take(&mut tables.types), std::mem::take(&mut tables.members))
        };
        let cleared = types.len() + members.len();
        drop(types);
        cleared
    }

    fn tables(&self) -> MutexGuard<'_, Tables<C, M>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clone, M: Copy> Default for MemberCache<C, M> {
    fn default() -> Self {
        Self::new()
    }
}

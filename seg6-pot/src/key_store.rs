use std::{io, path::Path};

use aya::maps::{HashMap, Map, MapData, MapError, MapType};
use tracing::debug;

use seg6_pot_common::{KEY_MAP_CAPACITY, SecretValue, SidKey};

use crate::{error::Seg6Error, validation::format_sid};

pub type KeyEntry = (SidKey, SecretValue);

/// CRUD over the SID → secret map shared with the data plane.
///
/// Every call is a single kernel map operation, so implementations need no
/// locking of their own; other control-plane invocations and the running
/// data plane may touch the same entries concurrently.
pub trait KeyStore {
    /// Insert or overwrite unconditionally.
    fn upsert(&mut self, sid: SidKey, secret: SecretValue) -> Result<(), Seg6Error>;

    /// Remove an entry; `NotFound` if the SID has no entry.
    fn delete(&mut self, sid: &SidKey) -> Result<(), Seg6Error>;

    fn get(&self, sid: &SidKey) -> Result<SecretValue, Seg6Error>;

    /// Scan all entries from the start. Order is unspecified. A fault
    /// mid-scan is yielded as `IterationFailed`, never a short read.
    fn iter(&self) -> Box<dyn Iterator<Item = Result<KeyEntry, Seg6Error>> + '_>;
}

impl<S: KeyStore + ?Sized> KeyStore for &mut S {
    fn upsert(&mut self, sid: SidKey, secret: SecretValue) -> Result<(), Seg6Error> {
        (**self).upsert(sid, secret)
    }

    fn delete(&mut self, sid: &SidKey) -> Result<(), Seg6Error> {
        (**self).delete(sid)
    }

    fn get(&self, sid: &SidKey) -> Result<SecretValue, Seg6Error> {
        (**self).get(sid)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Result<KeyEntry, Seg6Error>> + '_> {
        (**self).iter()
    }
}

/// The pinned `seg6_pot_keys` hash map, reopened by path.
///
/// The map outlives any loader process, so it is never borrowed from a
/// loaded module. The fd is closed when this value is dropped.
pub struct PinnedKeyStore {
    map: HashMap<MapData, SidKey, SecretValue>,
}

impl PinnedKeyStore {
    /// Open the pinned map, checking map type and key/value sizes.
    ///
    /// Fails with `StoreUnavailable` when nothing is pinned at `path`, which
    /// usually means `install` has never run on this host.
    pub fn open<P: AsRef<Path>>(pin_path: P) -> Result<Self, Seg6Error> {
        let path = pin_path.as_ref();
        let unavailable = |reason: String| Seg6Error::StoreUnavailable {
            path: path.to_path_buf(),
            reason,
        };

        let map_data = MapData::from_pin(path).map_err(|e| unavailable(e.to_string()))?;
        let map_type = map_data
            .info()
            .and_then(|info| info.map_type())
            .map_err(|e| unavailable(format!("query map info: {e}")))?;
        ensure_hash_map(map_type).map_err(unavailable)?;
        // try_from only checks the key and value sizes.
        let map = HashMap::<_, SidKey, SecretValue>::try_from(Map::HashMap(map_data))
            .map_err(|e| unavailable(format!("not a SID key map: {e}")))?;

        debug!(path = %path.display(), "opened pinned key map");
        Ok(Self { map })
    }
}

impl KeyStore for PinnedKeyStore {
    fn upsert(&mut self, sid: SidKey, secret: SecretValue) -> Result<(), Seg6Error> {
        self.map.insert(sid, secret, 0).map_err(write_error)
    }

    fn delete(&mut self, sid: &SidKey) -> Result<(), Seg6Error> {
        self.map
            .remove(sid)
            .map_err(|e| missing_or(sid, e, Seg6Error::WriteFailed))
    }

    fn get(&self, sid: &SidKey) -> Result<SecretValue, Seg6Error> {
        self.map
            .get(sid, 0)
            .map_err(|e| missing_or(sid, e, Seg6Error::ReadFailed))
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Result<KeyEntry, Seg6Error>> + '_> {
        Box::new(
            self.map
                .iter()
                .map(|item| item.map_err(|e| Seg6Error::IterationFailed(e.to_string()))),
        )
    }
}

fn ensure_hash_map(map_type: MapType) -> Result<(), String> {
    if map_type == MapType::Hash {
        Ok(())
    } else {
        Err(format!("expected a hash map, found {map_type:?}"))
    }
}

fn write_error(err: MapError) -> Seg6Error {
    if syscall_errno(&err) == Some(libc::E2BIG) {
        Seg6Error::WriteFailed(format!("store full (capacity {KEY_MAP_CAPACITY}): {err}"))
    } else {
        Seg6Error::WriteFailed(err.to_string())
    }
}

/// `NotFound` for a missing key, otherwise `other` with the map error text.
fn missing_or(sid: &SidKey, err: MapError, other: fn(String) -> Seg6Error) -> Seg6Error {
    if is_missing_key(&err) {
        Seg6Error::NotFound(format_sid(sid))
    } else {
        other(err.to_string())
    }
}

fn syscall_errno(err: &MapError) -> Option<i32> {
    match err {
        MapError::SyscallError(err) => err.io_error.raw_os_error(),
        _ => None,
    }
}

fn is_missing_key(err: &MapError) -> bool {
    match err {
        MapError::KeyNotFound => true,
        MapError::SyscallError(err) => err.io_error.kind() == io::ErrorKind::NotFound,
        _ => false,
    }
}

/// In-memory stand-in with the same semantics as the kernel hash map.
#[cfg(test)]
pub mod memory {
    use std::collections::BTreeMap;

    use super::*;

    pub struct MemoryKeyStore {
        entries: BTreeMap<SidKey, SecretValue>,
        capacity: usize,
        fail_iteration_after: Option<usize>,
    }

    impl MemoryKeyStore {
        pub fn new() -> Self {
            Self {
                entries: BTreeMap::new(),
                capacity: KEY_MAP_CAPACITY as usize,
                fail_iteration_after: None,
            }
        }

        pub fn with_capacity(capacity: usize) -> Self {
            Self {
                capacity,
                ..Self::new()
            }
        }

        /// Yield `n` entries, then an error, on every scan.
        pub fn fail_iteration_after(mut self, n: usize) -> Self {
            self.fail_iteration_after = Some(n);
            self
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }
    }

    impl KeyStore for MemoryKeyStore {
        fn upsert(&mut self, sid: SidKey, secret: SecretValue) -> Result<(), Seg6Error> {
            if !self.entries.contains_key(&sid) && self.entries.len() >= self.capacity {
                return Err(Seg6Error::WriteFailed(format!(
                    "store full (capacity {})",
                    self.capacity
                )));
            }
            self.entries.insert(sid, secret);
            Ok(())
        }

        fn delete(&mut self, sid: &SidKey) -> Result<(), Seg6Error> {
            self.entries
                .remove(sid)
                .map(|_| ())
                .ok_or_else(|| Seg6Error::NotFound(format_sid(sid)))
        }

        fn get(&self, sid: &SidKey) -> Result<SecretValue, Seg6Error> {
            self.entries
                .get(sid)
                .copied()
                .ok_or_else(|| Seg6Error::NotFound(format_sid(sid)))
        }

        fn iter(&self) -> Box<dyn Iterator<Item = Result<KeyEntry, Seg6Error>> + '_> {
            let limit = self.fail_iteration_after;
            let entries = self.entries.iter().map(|(k, v)| Ok::<_, Seg6Error>((*k, *v)));
            match limit {
                Some(n) => Box::new(entries.take(n).chain(std::iter::once(Err(
                    Seg6Error::IterationFailed("injected fault".into()),
                )))),
                None => Box::new(entries),
            }
        }
    }
}

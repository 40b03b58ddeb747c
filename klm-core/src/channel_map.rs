//! Electronics-to-module lookup.

use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::{ElectronicsId, ModuleId};

/// Read-only translation from readout channel to detector module.
///
/// A missing entry is the normal "unmapped channel" case, not an error.
/// Implementations are shared by reference across decode workers.
pub trait ChannelMap: Send + Sync {
    /// Returns the module wired to `id`, if any.
    fn module_id(&self, id: ElectronicsId) -> Option<ModuleId>;

    /// Number of mapped channels.
    fn len(&self) -> usize;

    /// Returns true if no channel is mapped.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S> ChannelMap for HashMap<ElectronicsId, ModuleId, S>
where
    S: BuildHasher + Send + Sync,
{
    #[inline]
    fn module_id(&self, id: ElectronicsId) -> Option<ModuleId> {
        self.get(&id).copied()
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }
}

/// A map with no entries: every channel is unmapped.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyChannelMap;

impl ChannelMap for EmptyChannelMap {
    fn module_id(&self, _id: ElectronicsId) -> Option<ModuleId> {
        None
    }

    fn len(&self) -> usize {
        0
    }
}

impl<M: ChannelMap + ?Sized> ChannelMap for &M {
    #[inline]
    fn module_id(&self, id: ElectronicsId) -> Option<ModuleId> {
        (**self).module_id(id)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashmap_lookup() {
        let mut map = HashMap::new();
        let elect = ElectronicsId::pack(1, 2, 10, 0, 3);
        let module = ModuleId::new(0, 3, 9, 1, 2, 2).unwrap();
        map.insert(elect, module);

        assert_eq!(ChannelMap::len(&map), 1);
        assert_eq!(map.module_id(elect), Some(module));
        assert_eq!(map.module_id(ElectronicsId::pack(1, 2, 10, 0, 4)), None);
    }

    #[test]
    fn test_empty_map() {
        let map = EmptyChannelMap;
        assert!(map.is_empty());
        assert_eq!(map.module_id(ElectronicsId::from_raw(0)), None);
    }
}

//! Interface index cache
//!
//! Maps kernel interface indices to interface names with a fixed number of
//! slots. Entries are never expired proactively: when an unknown index shows
//! up, every occupied slot is re-checked against the OS and slots whose
//! index no longer resolves ("zombies") are freed before a new one is
//! claimed.
//!
//! The cache also owns the width of the device name column, which is the
//! longest name seen so far and only ever grows.

use crate::bus::InterfaceProbe;
use crate::types::{RelayError, Result};

/// One cache slot
#[derive(Debug, Clone, Default)]
struct CacheSlot {
    /// Kernel interface index, `None` while the slot is free
    ifindex: Option<u32>,
    /// Resolved name; left stale after reclamation until overwritten
    name: String,
}

/// Bounded kernel index → interface name cache
#[derive(Debug)]
pub struct IndexCache {
    slots: Vec<CacheSlot>,
    max_name_len: usize,
}

impl IndexCache {
    /// Create a cache with `capacity` empty slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![CacheSlot::default(); capacity],
            max_name_len: 0,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently holding an interface index
    pub fn live_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.ifindex.is_some()).count()
    }

    /// Current width of the device name column
    pub fn name_width(&self) -> usize {
        self.max_name_len
    }

    /// Widen the name column to at least `len`
    pub fn note_name_len(&mut self, len: usize) {
        self.max_name_len = self.max_name_len.max(len);
    }

    /// Name stored in `slot`
    pub fn name(&self, slot: usize) -> &str {
        self.slots.get(slot).map(|s| s.name.as_str()).unwrap_or("")
    }

    /// Kernel index stored in `slot`, if the slot is occupied
    pub fn ifindex(&self, slot: usize) -> Option<u32> {
        self.slots.get(slot).and_then(|s| s.ifindex)
    }

    /// Find (or claim) the slot for `ifindex`
    ///
    /// # Arguments
    /// * `ifindex` - Kernel interface index reported with the frame
    /// * `probe` - Used to re-check occupied slots and to name new ones
    ///
    /// # Returns
    /// * `Ok(slot)` - Stable slot position for `ifindex`
    /// * `Err(CacheExhausted)` - All slots hold indices that still resolve
    pub fn resolve<P>(&mut self, ifindex: u32, probe: &P) -> Result<usize>
    where
        P: InterfaceProbe + ?Sized,
    {
        if let Some(slot) = self.lookup(ifindex) {
            return Ok(slot);
        }

        self.reclaim_zombies(probe);

        let slot = self
            .slots
            .iter()
            .position(|s| s.ifindex.is_none())
            .ok_or(RelayError::CacheExhausted {
                capacity: self.capacity(),
            })?;

        let name = match probe.interface_name(ifindex) {
            Ok(name) => name,
            Err(e) => {
                log::warn!("SIOCGIFNAME failed for ifindex {}: {}", ifindex, e);
                String::new()
            }
        };

        self.note_name_len(name.len());
        log::debug!("Cached ifindex {} as '{}' in slot {}", ifindex, name, slot);

        let entry = &mut self.slots[slot];
        entry.ifindex = Some(ifindex);
        entry.name = name;

        Ok(slot)
    }

    fn lookup(&self, ifindex: u32) -> Option<usize> {
        self.slots.iter().position(|s| s.ifindex == Some(ifindex))
    }

    fn reclaim_zombies<P>(&mut self, probe: &P)
    where
        P: InterfaceProbe + ?Sized,
    {
        for (pos, slot) in self.slots.iter_mut().enumerate() {
            if let Some(ifindex) = slot.ifindex {
                if probe.interface_name(ifindex).is_err() {
                    log::debug!(
                        "Reclaiming slot {} (ifindex {} '{}' is gone)",
                        pos,
                        ifindex,
                        slot.name
                    );
                    slot.ifindex = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io;

    /// Interface table that can change between calls
    #[derive(Default)]
    struct FakeInterfaces {
        names: RefCell<HashMap<u32, String>>,
        lookups: RefCell<usize>,
    }

    impl FakeInterfaces {
        fn with(entries: &[(u32, &str)]) -> Self {
            let fake = Self::default();
            for (idx, name) in entries {
                fake.add(*idx, name);
            }
            fake
        }

        fn add(&self, ifindex: u32, name: &str) {
            self.names.borrow_mut().insert(ifindex, name.to_string());
        }

        fn remove(&self, ifindex: u32) {
            self.names.borrow_mut().remove(&ifindex);
        }
    }

    impl InterfaceProbe for FakeInterfaces {
        fn interface_name(&self, ifindex: u32) -> io::Result<String> {
            *self.lookups.borrow_mut() += 1;
            self.names
                .borrow()
                .get(&ifindex)
                .cloned()
                .ok_or_else(|| io::Error::from_raw_os_error(libc::ENODEV))
        }
    }

    #[test]
    fn test_stable_and_distinct_slots() {
        let probe = FakeInterfaces::with(&[(3, "can0"), (4, "can1"), (7, "vcan0")]);
        let mut cache = IndexCache::new(4);

        let a = cache.resolve(3, &probe).unwrap();
        let b = cache.resolve(4, &probe).unwrap();
        let c = cache.resolve(7, &probe).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);

        for _ in 0..10 {
            assert_eq!(cache.resolve(4, &probe).unwrap(), b);
            assert_eq!(cache.resolve(3, &probe).unwrap(), a);
        }
        assert_eq!(cache.name(c), "vcan0");
        assert_eq!(cache.live_slots(), 3);
    }

    #[test]
    fn test_hit_does_not_probe() {
        let probe = FakeInterfaces::with(&[(3, "can0")]);
        let mut cache = IndexCache::new(2);
        cache.resolve(3, &probe).unwrap();
        let before = *probe.lookups.borrow();

        cache.resolve(3, &probe).unwrap();
        assert_eq!(*probe.lookups.borrow(), before);
    }

    #[test]
    fn test_exhaustion_with_live_slots() {
        let probe = FakeInterfaces::with(&[(1, "can0"), (2, "can1"), (3, "can2")]);
        let mut cache = IndexCache::new(2);
        cache.resolve(1, &probe).unwrap();
        cache.resolve(2, &probe).unwrap();

        let result = cache.resolve(3, &probe);
        assert!(matches!(result, Err(RelayError::CacheExhausted { capacity: 2 })));

        // Existing entries are untouched
        assert_eq!(cache.ifindex(0), Some(1));
        assert_eq!(cache.ifindex(1), Some(2));
        assert_eq!(cache.name(0), "can0");
        assert_eq!(cache.name(1), "can1");
    }

    #[test]
    fn test_zombie_reclaimed_only_when_gone() {
        let probe = FakeInterfaces::with(&[(1, "can0"), (2, "can1")]);
        let mut cache = IndexCache::new(2);
        let slot0 = cache.resolve(1, &probe).unwrap();
        cache.resolve(2, &probe).unwrap();

        // can0 disappears, a new interface shows up
        probe.remove(1);
        probe.add(9, "vcan9");

        let slot = cache.resolve(9, &probe).unwrap();
        assert_eq!(slot, slot0);
        assert_eq!(cache.name(slot), "vcan9");
        assert_eq!(cache.lookup(1), None);
        assert_eq!(cache.ifindex(1), Some(2));
    }

    #[test]
    fn test_reclaimed_slot_keeps_stale_name() {
        let probe = FakeInterfaces::with(&[(1, "can0"), (2, "can1"), (3, "can2")]);
        let mut cache = IndexCache::new(3);
        cache.resolve(1, &probe).unwrap();
        cache.resolve(2, &probe).unwrap();

        probe.remove(1);
        probe.remove(2);
        assert_eq!(cache.resolve(3, &probe).unwrap(), 0);

        assert_eq!(cache.ifindex(1), None);
        assert_eq!(cache.name(1), "can1");
        assert_eq!(cache.live_slots(), 1);
    }

    #[test]
    fn test_failed_name_lookup_claims_with_empty_name() {
        let probe = FakeInterfaces::default();
        let mut cache = IndexCache::new(2);

        let slot = cache.resolve(5, &probe).unwrap();
        assert_eq!(cache.ifindex(slot), Some(5));
        assert_eq!(cache.name(slot), "");
    }

    #[test]
    fn test_name_width_never_shrinks() {
        let probe = FakeInterfaces::with(&[(1, "vcan0"), (2, "can1"), (3, "slcan_long")]);
        let mut cache = IndexCache::new(2);
        cache.note_name_len(4);

        let mut widths = Vec::new();
        cache.resolve(1, &probe).unwrap();
        widths.push(cache.name_width());
        cache.resolve(2, &probe).unwrap();
        widths.push(cache.name_width());

        probe.remove(1);
        cache.resolve(3, &probe).unwrap();
        widths.push(cache.name_width());
        cache.note_name_len(2);
        widths.push(cache.name_width());

        assert_eq!(widths, vec![5, 5, 10, 10]);
    }
}

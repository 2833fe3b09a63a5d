/// A generational slab.
///
/// A `Slab` stores values of type `T` in a contiguous array and hands out
/// [`Key`]s made of a slot index and the generation the slot had when the
/// value was inserted. Removing a value bumps the slot generation, so a key
/// kept around after removal never resolves to the value that later reuses
/// the same slot.
///
/// This is the arena the launcher keeps its fibers in: fiber handles are
/// plain copyable keys, and reclamation is a single [`remove`](Self::remove).
pub(crate) struct Slab<T> {
    /// Storage for slots, occupied or vacant.
    entries: Vec<Entry<T>>,
    /// Stack of vacant indices that can be reused.
    free: Vec<usize>,
    /// Number of occupied slots.
    len: usize,
}

/// Stable reference to a value stored in a [`Slab`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

enum Entry<T> {
    Occupied { generation: u64, value: T },
    Vacant { generation: u64 },
}

impl<T> Slab<T> {
    /// Creates an empty slab.
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Inserts a value into the slab and returns its key.
    ///
    /// Vacant slots are reused before the storage grows.
    pub(crate) fn insert(&mut self, value: T) -> Key {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let generation = match self.entries[index] {
                Entry::Vacant { generation } => generation,
                Entry::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };

            self.entries[index] = Entry::Occupied { generation, value };
            return Key { index, generation };
        }

        let index = self.entries.len();
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });

        Key {
            index,
            generation: 0,
        }
    }

    /// Removes and returns the value stored under `key`.
    ///
    /// Returns `None` if the key is stale or was never issued by this slab.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        if !self.contains(key) {
            return None;
        }

        let vacant = Entry::Vacant {
            generation: key.generation.wrapping_add(1),
        };

        match std::mem::replace(&mut self.entries[key.index], vacant) {
            Entry::Occupied { value, .. } => {
                self.free.push(key.index);
                self.len -= 1;
                Some(value)
            }
            Entry::Vacant { .. } => unreachable!("contains() checked occupancy"),
        }
    }

    /// Returns `true` if `key` refers to a live value.
    pub(crate) fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        match self.entries.get(key.index)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        match self.entries.get_mut(key.index)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Number of live values.
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

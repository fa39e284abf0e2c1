// id.rs — Typed identifiers and append-only arenas for the dataflow graph
//
// Every graph element (region, value edge, operator node, function) is
// addressed by a typed id allocated in insertion order. Arenas never reuse a
// slot: removing an element leaves a tombstone, so a stale id held in a
// worklist resolves to `None` instead of aliasing a newer element.
//
// Preconditions: none.
// Postconditions: ids are dense, monotonically increasing per arena.
// Failure modes: none (lookups of removed ids return `None`).
// Side effects: none.

use std::fmt;
use std::marker::PhantomData;

/// Common behaviour of arena-addressed ids.
pub trait ArenaId: Copy + Ord + fmt::Debug {
    fn from_index(index: u32) -> Self;
    fn index(self) -> usize;
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl ArenaId for $name {
            fn from_index(index: u32) -> Self {
                $name(index)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a region (scope) in the graph.
    RegionId,
    "am"
);
define_id!(
    /// Identifier of a single-assignment value edge.
    EdgeId,
    "f"
);
define_id!(
    /// Identifier of an operator node.
    OpId,
    "oi"
);
define_id!(
    /// Identifier of a user-defined function (compound operator).
    FunctionId,
    "fn"
);

/// Any graph element; used for diagnostics, certification reports and the
/// neighbor flood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementId {
    Region(RegionId),
    Edge(EdgeId),
    Op(OpId),
    Function(FunctionId),
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementId::Region(id) => write!(f, "{id}"),
            ElementId::Edge(id) => write!(f, "{id}"),
            ElementId::Op(id) => write!(f, "{id}"),
            ElementId::Function(id) => write!(f, "{id}"),
        }
    }
}

// ── Arena ──────────────────────────────────────────────────────────────────

/// Append-only slot storage addressed by a typed id.
#[derive(Debug, Clone)]
pub struct Arena<I, T> {
    slots: Vec<Option<T>>,
    live: usize,
    _id: PhantomData<I>,
}

impl<I: ArenaId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ArenaId, T> Arena<I, T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            live: 0,
            _id: PhantomData,
        }
    }

    /// The id the next `alloc` will return.
    pub fn next_id(&self) -> I {
        I::from_index(self.slots.len() as u32)
    }

    /// Store `value` and return its freshly allocated id.
    pub fn alloc(&mut self, value: T) -> I {
        let id = I::from_index(self.slots.len() as u32);
        self.slots.push(Some(value));
        self.live += 1;
        id
    }

    pub fn get(&self, id: I) -> Option<&T> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// Remove the element, leaving a tombstone. The id is never reissued.
    pub fn remove(&mut self, id: I) -> Option<T> {
        let removed = self.slots.get_mut(id.index()).and_then(Option::take);
        if removed.is_some() {
            self.live -= 1;
        }
        removed
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Live elements in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (I::from_index(i as u32), v)))
    }

    pub fn ids(&self) -> impl Iterator<Item = I> + '_ {
        self.iter().map(|(id, _)| id)
    }
}

//! Object handles shared by every resource table

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of OS object a handle refers to
///
/// The discriminant is encoded into the top bits of every [`ObjectId`], so
/// a handle of one kind can never be mistaken for a handle of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectKind {
    Task = 1,
    Queue = 2,
    CountSem = 3,
    BinSem = 4,
    Mutex = 5,
    Stream = 6,
    TimeBase = 7,
    Timer = 8,
}

impl ObjectKind {
    /// All kinds, in table initialization order
    pub const ALL: [ObjectKind; 8] = [
        ObjectKind::Task,
        ObjectKind::Queue,
        ObjectKind::CountSem,
        ObjectKind::BinSem,
        ObjectKind::Mutex,
        ObjectKind::Stream,
        ObjectKind::TimeBase,
        ObjectKind::Timer,
    ];

    /// Decodes a kind tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| *kind as u8 == tag)
    }

    /// Short lowercase label used in logs and display names
    pub fn label(&self) -> &'static str {
        match self {
            ObjectKind::Task => "task",
            ObjectKind::Queue => "queue",
            ObjectKind::CountSem => "countsem",
            ObjectKind::BinSem => "binsem",
            ObjectKind::Mutex => "mutex",
            ObjectKind::Stream => "stream",
            ObjectKind::TimeBase => "timebase",
            ObjectKind::Timer => "timer",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Opaque handle to a resource-table slot
///
/// Layout of the underlying `u32`:
///
/// ```text
///  31    28 27          16 15               0
/// +--------+--------------+------------------+
/// |  kind  |  generation  |    slot index    |
/// +--------+--------------+------------------+
/// ```
///
/// The generation changes every time a slot is released, so a handle that
/// outlives its object is detected instead of silently acting on whatever
/// was created in the same slot afterwards. Generation zero is never
/// issued, which keeps `0` free to act as [`ObjectId::UNDEFINED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u32);

impl ObjectId {
    /// The "no object" handle; also the creator of objects made outside any task
    pub const UNDEFINED: ObjectId = ObjectId(0);

    const KIND_SHIFT: u32 = 28;
    const GENERATION_SHIFT: u32 = 16;
    const GENERATION_MASK: u32 = 0x0FFF;
    const INDEX_MASK: u32 = 0xFFFF;

    /// Largest generation value before wrapping back to 1
    pub const MAX_GENERATION: u16 = 0x0FFF;

    /// Largest slot index a handle can carry
    pub const MAX_INDEX: u16 = u16::MAX;

    /// Builds a handle from its parts
    ///
    /// The generation is masked to 12 bits; callers are expected to keep it
    /// in `1..=MAX_GENERATION`.
    pub fn new(kind: ObjectKind, generation: u16, index: u16) -> Self {
        let raw = ((kind as u32) << Self::KIND_SHIFT)
            | ((generation as u32 & Self::GENERATION_MASK) << Self::GENERATION_SHIFT)
            | index as u32;
        Self(raw)
    }

    /// Reinterprets a raw value received from an application
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric handle
    pub const fn as_raw(&self) -> u32 {
        self.0
    }

    /// Returns the kind tag, or `None` for undefined or corrupted handles
    pub fn kind(&self) -> Option<ObjectKind> {
        ObjectKind::from_tag((self.0 >> Self::KIND_SHIFT) as u8)
    }

    /// Returns the generation counter embedded in the handle
    pub fn generation(&self) -> u16 {
        ((self.0 >> Self::GENERATION_SHIFT) & Self::GENERATION_MASK) as u16
    }

    /// Returns the slot index embedded in the handle
    pub fn index(&self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }

    /// Returns true for [`ObjectId::UNDEFINED`]
    pub fn is_undefined(&self) -> bool {
        self.0 == 0
    }

    /// Advances a generation counter, skipping zero on wrap
    pub fn next_generation(generation: u16) -> u16 {
        if generation >= Self::MAX_GENERATION {
            1
        } else {
            generation + 1
        }
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(
                f,
                "{}({}#{})",
                kind,
                self.index(),
                self.generation()
            ),
            None => write!(f, "undefined({:#x})", self.0),
        }
    }
}

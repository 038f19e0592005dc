//! Identifier types shared by the checkpoint passes.

use serde::Serialize;

/// Trace id of a stack trace, thread, or any other serialized constant.
/// Zero means "absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(transparent)]
pub struct TraceId(pub u64);

impl TraceId {
    pub const NONE: TraceId = TraceId(0);

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for TraceId {
    fn from(id: u64) -> Self {
        TraceId(id)
    }
}

/// Trace id of a loaded class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(transparent)]
pub struct ClassId(pub u64);

impl ClassId {
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Number of low bits of a [`MethodId`] that hold the method's index within its holder.
const METHOD_ID_NUM_SHIFT: u32 = 16;
const METHOD_ID_NUM_MASK: u64 = (1 << METHOD_ID_NUM_SHIFT) - 1;

/// Trace id of a method. The holder class id lives in the upper bits so the
/// holder can be checked for unloading without resolving the method itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(transparent)]
pub struct MethodId(pub u64);

impl MethodId {
    /// Largest holder class id that survives the encoding.
    pub const MAX_HOLDER: ClassId = ClassId(u64::MAX >> METHOD_ID_NUM_SHIFT);

    /// Holder ids above [`MAX_HOLDER`](Self::MAX_HOLDER) are a caller bug;
    /// use [`try_new`](Self::try_new) for ids from untrusted input.
    pub const fn new(holder: ClassId, idnum: u16) -> Self {
        debug_assert!(
            holder.0 <= Self::MAX_HOLDER.0,
            "holder class id does not fit a method id"
        );
        MethodId((holder.0 << METHOD_ID_NUM_SHIFT) | idnum as u64)
    }

    /// `None` if `holder` would lose its upper bits in the encoding.
    pub const fn try_new(holder: ClassId, idnum: u16) -> Option<Self> {
        if holder.0 > Self::MAX_HOLDER.0 {
            return None;
        }
        Some(MethodId((holder.0 << METHOD_ID_NUM_SHIFT) | idnum as u64))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Id of the class declaring this method.
    pub const fn class_id(self) -> ClassId {
        ClassId(self.0 >> METHOD_ID_NUM_SHIFT)
    }

    /// Index of the method within its holder.
    pub const fn idnum(self) -> u16 {
        (self.0 & METHOD_ID_NUM_MASK) as u16
    }
}

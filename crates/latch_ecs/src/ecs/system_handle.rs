use std::fmt;

/// Position of a system in its `SystemManager`, in registration order.
///
/// Handles compare by registration order, which is also the tie-break the
/// manager uses when ordering unconstrained systems.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemHandle(u32);

impl SystemHandle {
    pub(crate) fn from_slot(slot: usize) -> Self {
        Self(slot as u32)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }

    /// Slot inside the manager's system table.
    #[inline]
    pub(crate) fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SystemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

//! Fiber effect flags and hook effect tags.

use bitflags::bitflags;

bitflags! {
    /// Host work a fiber needs during commit.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        /// Insert (or move) this fiber's host nodes.
        const PLACEMENT      = 0b0000_0000_0010;
        /// Apply a property diff, text change, or layout effect.
        const UPDATE         = 0b0000_0000_0100;
        /// `deletions` holds children to remove.
        const CHILD_DELETION = 0b0000_0001_0000;
        /// Clear inline text before children are placed.
        const CONTENT_RESET  = 0b0000_0010_0000;
        /// Attach or detach a host ref.
        const REF            = 0b0010_0000_0000;
        /// Passive effects to run after paint.
        const PASSIVE        = 0b1000_0000_0000;
    }
}

impl Flags {
    /// Anything the mutation pass must visit.
    pub const MUTATION_MASK: Self = Self::PLACEMENT
        .union(Self::UPDATE)
        .union(Self::CHILD_DELETION)
        .union(Self::CONTENT_RESET)
        .union(Self::REF);

    /// Anything the layout pass must visit.
    pub const LAYOUT_MASK: Self = Self::UPDATE;

    /// Anything the passive pass must visit.
    pub const PASSIVE_MASK: Self = Self::PASSIVE.union(Self::CHILD_DELETION);
}

bitflags! {
    /// Tag of an effect record.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HookFlags: u8 {
        /// Dependencies changed (or first mount): run teardown then setup.
        const HAS_EFFECT = 0b0001;
        const LAYOUT     = 0b0100;
        const PASSIVE    = 0b1000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_cover_expected_flags() {
        assert!(Flags::MUTATION_MASK.contains(Flags::PLACEMENT | Flags::CHILD_DELETION));
        assert!(!Flags::MUTATION_MASK.contains(Flags::PASSIVE));
        assert!(Flags::PASSIVE_MASK.contains(Flags::CHILD_DELETION));
        assert!(Flags::LAYOUT_MASK.intersects(Flags::UPDATE));
    }

    #[test]
    fn flags_are_disjoint_bits() {
        let all = [
            Flags::PLACEMENT,
            Flags::UPDATE,
            Flags::CHILD_DELETION,
            Flags::CONTENT_RESET,
            Flags::REF,
            Flags::PASSIVE,
        ];
        let union = all.iter().fold(Flags::empty(), |acc, f| acc | *f);
        assert_eq!(union.bits().count_ones() as usize, all.len());
    }
}

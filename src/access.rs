//! Access flag translation between the dex and class file encodings.
//!
//! Every function here is a total function over `u32`: no I/O, no failure,
//! and applying it a second time leaves the result unchanged.

use bitflags::bitflags;

bitflags! {
    /// Dex access flags plus the class-file-only `SUPER` bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const TRANSIENT = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;

        /// Shares its bit with `SYNCHRONIZED`; only meaningful on classes.
        const SUPER = 0x20;

        const VISIBILITY = Self::PUBLIC.bits() | Self::PRIVATE.bits() | Self::PROTECTED.bits();
        /// Hidden-api marker on fields and non-native methods.
        const DEX_HIDDEN_BIT = 0x20;
        /// Hidden-api marker on native methods.
        const DEX_HIDDEN_BIT_NATIVE = 0x200;
    }
}

/// Java's `(i & (i - 1)) == 0`, which counts zero as a power of two.
fn at_most_one_bit(v: u32) -> bool {
    v & v.wrapping_sub(1) == 0
}

/// Undoes the hidden-api encoding ART applies to member flags.
///
/// A hidden member has its visibility bits toggled so that two of them are
/// set; toggling again restores the declared visibility. The marker bit
/// sits at a different position for native methods.
pub fn remove_hidden_access(access: u32) -> u32 {
    let mut flags = AccessFlags::from_bits_retain(access);
    if !at_most_one_bit((flags & AccessFlags::VISIBILITY).bits()) {
        flags ^= AccessFlags::VISIBILITY;
    }
    if flags.contains(AccessFlags::NATIVE) {
        flags.remove(AccessFlags::DEX_HIDDEN_BIT_NATIVE);
    } else {
        flags.remove(AccessFlags::DEX_HIDDEN_BIT);
    }
    flags.bits()
}

/// Flags for the class header.
pub fn clear_class_access(is_inner: bool, access: u32) -> u32 {
    let mut flags = AccessFlags::from_bits_retain(access);
    if !flags.contains(AccessFlags::INTERFACE) {
        flags |= AccessFlags::SUPER;
    }
    flags.remove(AccessFlags::STATIC | AccessFlags::PRIVATE);
    if is_inner && flags.contains(AccessFlags::PROTECTED) {
        flags.remove(AccessFlags::PROTECTED);
        flags |= AccessFlags::PUBLIC;
    }
    flags.remove(AccessFlags::DECLARED_SYNCHRONIZED | AccessFlags::SYNTHETIC | AccessFlags::FINAL);
    flags.bits()
}

/// Flags for an `InnerClasses` entry.
pub fn clear_inner_access(access: u32) -> u32 {
    let mut flags = AccessFlags::from_bits_retain(access);
    flags.remove(AccessFlags::SUPER);
    if flags.contains(AccessFlags::PRIVATE) {
        flags.remove(AccessFlags::PUBLIC | AccessFlags::PROTECTED);
    } else if flags.contains(AccessFlags::PROTECTED) {
        flags.remove(AccessFlags::PUBLIC);
    }
    flags.remove(AccessFlags::SYNTHETIC);
    flags.bits()
}

pub fn clear_method_access(access: u32) -> u32 {
    let mut flags = AccessFlags::from_bits_retain(remove_hidden_access(access));
    flags.remove(AccessFlags::DECLARED_SYNCHRONIZED | AccessFlags::CONSTRUCTOR | AccessFlags::SYNTHETIC);
    flags.bits()
}

/// `$VALUES` of an enum keeps its synthetic bit, javac marks it that way
/// and reflection-based enum lookups depend on it.
pub fn clear_field_access(name: &str, access: u32) -> u32 {
    let mut flags = AccessFlags::from_bits_retain(remove_hidden_access(access));
    if name != "$VALUES" {
        flags.remove(AccessFlags::DECLARED_SYNCHRONIZED | AccessFlags::SYNTHETIC);
    }
    flags.bits()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const PUBLIC: u32 = 0x1;
    const PRIVATE: u32 = 0x2;
    const PROTECTED: u32 = 0x4;

    fn samples() -> Vec<u32> {
        let mut rng = rand::thread_rng();
        let mut values: Vec<u32> = (0..0x4000u32).collect();
        for _ in 0..20000 {
            values.push(rng.gen::<u32>());
        }
        values.extend([u32::MAX, 0x20000, 0x10000, 0x3_ffff]);
        values
    }

    #[test]
    fn inner_access_visibility_is_monotone() {
        for access in samples() {
            let out = clear_inner_access(access);
            assert!(out & PUBLIC == 0 || out & PROTECTED == 0, "{:#x} -> {:#x}", access, out);
            if out & PRIVATE != 0 {
                assert_eq!(out & (PUBLIC | PROTECTED), 0, "{:#x} -> {:#x}", access, out);
            }
            assert_eq!(out & 0x20, 0);
            assert_eq!(clear_inner_access(out), out);
        }
    }

    #[test]
    fn hidden_access_is_idempotent() {
        for access in samples() {
            let once = remove_hidden_access(access);
            assert_eq!(remove_hidden_access(once), once, "{:#x}", access);
            let visibility = AccessFlags::VISIBILITY.bits();
            assert_eq!(once & !visibility & !access, 0, "{:#x} -> {:#x}", access, once);
            if at_most_one_bit(access & visibility) {
                // not hidden: only the marker bit may go
                assert_eq!(once & !access, 0, "{:#x} -> {:#x}", access, once);
                assert_eq!(once & visibility, access & visibility);
            }
            assert!(at_most_one_bit(once & visibility));
        }
    }

    #[test]
    fn hidden_access_known_values() {
        // public, hidden: visibility toggled to private|protected plus marker
        assert_eq!(remove_hidden_access(0x6 | 0x20), PUBLIC);
        // native methods keep synchronized and lose the interface bit instead
        assert_eq!(remove_hidden_access(0x6 | 0x100 | 0x20 | 0x200), PUBLIC | 0x100 | 0x20);
        assert_eq!(remove_hidden_access(PRIVATE | 0x8), PRIVATE | 0x8);
        assert_eq!(remove_hidden_access(0), 0);
    }

    #[test]
    fn class_access() {
        assert_eq!(clear_class_access(false, PUBLIC | 0x10), PUBLIC | 0x20);
        assert_eq!(clear_class_access(false, PUBLIC | 0x200 | 0x400), PUBLIC | 0x200 | 0x400);
        assert_eq!(clear_class_access(true, PROTECTED | 0x8), PUBLIC | 0x20);
        assert_eq!(clear_class_access(false, PROTECTED), PROTECTED | 0x20);
        assert_eq!(clear_class_access(false, PRIVATE | 0x1000 | 0x20000), 0x20);
        for access in samples() {
            let once = clear_class_access(true, access);
            assert_eq!(clear_class_access(true, once), once);
        }
    }

    #[test]
    fn member_access() {
        assert_eq!(clear_method_access(PUBLIC | 0x10000 | 0x20000 | 0x1000), PUBLIC);
        assert_eq!(clear_field_access("$VALUES", PRIVATE | 0x8 | 0x10 | 0x1000), PRIVATE | 0x8 | 0x10 | 0x1000);
        assert_eq!(clear_field_access("values", PRIVATE | 0x8 | 0x10 | 0x1000), PRIVATE | 0x8 | 0x10);
    }
}

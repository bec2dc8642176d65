//! Relocation targets for the architectures this crate knows how to patch.
//!
//! [`HostTarget`] names the target matching the machine the crate is built
//! for, when that machine is one of them.

mod ppc32;
mod x86_64;

pub use ppc32::*;
pub use x86_64::*;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub type HostTarget = X86_64Target;
    } else if #[cfg(all(target_arch = "powerpc", target_endian = "big"))] {
        pub type HostTarget = Ppc32Target;
    }
}

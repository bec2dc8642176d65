//! 32-bit PowerPC relocation target.
//!
//! Big-endian, 32-bit. Addresses in code are materialised by `lis`/`ori`
//! pairs whose 16-bit immediates are the second halfword of each
//! instruction, which is why ordered-pair offsets point two bytes past the
//! instruction start.

use crate::{
    Result, format_error,
    target::{CodeBuffer, Endian, PointerWidth, RelocationTarget},
};
use alloc::format;

/// Primary opcode bits of the unconditional relative branch `b`.
pub const BRANCH: u32 = 0x4800_0000;
const BRANCH_DISP_MASK: u32 = 0x03ff_fffc;
const BRANCH_RANGE: i64 = 1 << 25;

/// Relocation target for 32-bit PowerPC code bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ppc32Target;

impl RelocationTarget for Ppc32Target {
    #[inline]
    fn endian(&self) -> Endian {
        Endian::Big
    }

    #[inline]
    fn pointer_width(&self) -> PointerWidth {
        PointerWidth::Bits32
    }

    fn patch_virtual_guard(
        &self,
        code: &mut CodeBuffer<'_>,
        location: u64,
        destination: u64,
    ) -> Result<()> {
        let disp = destination.wrapping_sub(location) as i64;
        if !(-BRANCH_RANGE..BRANCH_RANGE).contains(&disp) || disp & 3 != 0 {
            return Err(format_error(format!(
                "guard at {location:#x} cannot branch to {destination:#x}"
            )));
        }
        let insn = BRANCH | (disp as u32 & BRANCH_DISP_MASK);
        code.write(location, &insn.to_be_bytes())
    }

    /// Relative targets are measured from the branch itself.
    #[inline]
    fn eip_base(&self, location: u64) -> u64 {
        location
    }

    fn use_trampoline(&self, helper: u64, call_site: u64) -> bool {
        let disp = helper.wrapping_sub(call_site) as i64;
        !(-BRANCH_RANGE..BRANCH_RANGE).contains(&disp)
    }
}

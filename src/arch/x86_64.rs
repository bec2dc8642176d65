//! x86-64 relocation target.
//!
//! Little-endian, 64-bit. Guards are patched with a `jmp rel32` and helper
//! calls use 32-bit displacements measured from the end of the displacement
//! field.

use crate::{
    Result, format_error,
    target::{CodeBuffer, Endian, PointerWidth, RelocationTarget},
};
use alloc::format;

/// Opcode of `jmp rel32`.
pub const JMP_REL32: u8 = 0xe9;
/// Size in bytes of a patched `jmp rel32`.
pub const JMP_REL32_SIZE: u64 = 5;

/// Relocation target for x86-64 code bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct X86_64Target;

impl RelocationTarget for X86_64Target {
    #[inline]
    fn endian(&self) -> Endian {
        Endian::Little
    }

    #[inline]
    fn pointer_width(&self) -> PointerWidth {
        PointerWidth::Bits64
    }

    fn patch_virtual_guard(
        &self,
        code: &mut CodeBuffer<'_>,
        location: u64,
        destination: u64,
    ) -> Result<()> {
        let next = location.wrapping_add(JMP_REL32_SIZE);
        let Ok(disp) = i32::try_from(destination.wrapping_sub(next) as i64) else {
            return Err(format_error(format!(
                "guard at {location:#x} cannot jump to {destination:#x}"
            )));
        };
        let mut insn = [0u8; JMP_REL32_SIZE as usize];
        insn[0] = JMP_REL32;
        insn[1..].copy_from_slice(&disp.to_le_bytes());
        code.write(location, &insn)
    }

    fn use_trampoline(&self, helper: u64, call_site: u64) -> bool {
        let disp = helper.wrapping_sub(self.eip_base(call_site)) as i64;
        i32::try_from(disp).is_err()
    }
}

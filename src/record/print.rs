//! Human-readable record dumps.
//!
//! ```text
//! ClassObject (5)
//! 	size 36 flags 0x0 reloFlags 0x0
//! 	inlined_site_index 0xffffffffffffffff
//! 	constant_pool 0x1000
//! 	cp_index 0x3
//! 	offsets 16 40
//! ```

use super::{RecordHeader, RelocationRecord};
use core::fmt::{self, Display};

impl Display for RecordHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size {} flags {:#x} reloFlags {:#x}",
            self.size,
            self.flags.bits(),
            self.relo_flags
        )
    }
}

impl Display for RelocationRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.name(), self.kind().raw())?;
        writeln!(f, "\t{}", self.header())?;
        self.payload().fmt_fields(f)?;
        if self.is_validation_record() {
            return Ok(());
        }
        f.write_str("\toffsets")?;
        if self.is_ordered_pair() {
            let mut offsets = self.offsets();
            while let (Some(high), Some(low)) = (offsets.next(), offsets.next()) {
                write!(f, " ({high}, {low})")?;
            }
        } else {
            for offset in self.offsets() {
                write!(f, " {offset}")?;
            }
        }
        writeln!(f)
    }
}

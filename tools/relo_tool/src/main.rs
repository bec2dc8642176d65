use anyhow::{Context, Result};
use aot_relo::{
    GroupWriter, Payload, Ppc32Target, RecordKind, RecordSpec, RelocationTable, RelocationTarget,
    TableWriter, X86_64Target,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Arch {
    /// Little-endian, 64-bit words.
    X86_64,
    /// Big-endian, 32-bit words.
    Ppc32,
}

impl Arch {
    fn target(self) -> &'static dyn RelocationTarget {
        match self {
            Arch::X86_64 => &X86_64Target,
            Arch::Ppc32 => &Ppc32Target,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print every record of a relocation table
    Dump { input: PathBuf },
    /// Write a small table that exercises the common record families
    GenSample {
        #[arg(short, default_value = "relocs.bin")]
        output: PathBuf,
    },
}

#[derive(Parser)]
#[command(name = "relo_tool")]
struct Args {
    /// Layout of the table
    #[arg(short, long, value_enum, default_value_t = Arch::X86_64)]
    target: Arch,
    #[command(subcommand)]
    command: Command,
}

fn dump(input: &Path, target: &dyn RelocationTarget) -> Result<()> {
    let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    for (index, group) in RelocationTable::new(&bytes, target).groups().enumerate() {
        let group = group?;
        println!("group {index}: {} bytes", group.size());
        for record in group.records() {
            print!("{}", record?);
        }
    }
    Ok(())
}

fn sample_records(target: &dyn RelocationTarget) -> Vec<RecordSpec> {
    let outermost = target.pointer_width().all_ones();
    vec![
        RecordSpec::new(RecordKind::ValidateRootClass, Payload::ValidateRootClass { class_id: 1 }),
        RecordSpec::new(
            RecordKind::ConstantPool,
            Payload::ConstantPool {
                inlined_site_index: outermost,
                constant_pool: 0x7000,
            },
        )
        .offsets([0x10, 0x30]),
        RecordSpec::new(RecordKind::HelperAddress, Payload::Helper { helper_id: 7 })
            .eip_relative()
            .offset(0x41),
        RecordSpec::new(
            RecordKind::ClassObject,
            Payload::ConstantPoolWithIndex {
                inlined_site_index: outermost,
                constant_pool: 0x7000,
                cp_index: 3,
            },
        )
        .offset(0x60),
        RecordSpec::new(
            RecordKind::SymbolFromManager,
            Payload::SymbolFromManager {
                symbol_id: 1,
                symbol_type: 1,
            },
        )
        .offset(0x80),
        RecordSpec::new(RecordKind::AbsoluteMethodAddress, Payload::Empty {}).offset(0x90),
    ]
}

fn gen_sample(output: &Path, target: &dyn RelocationTarget) -> Result<()> {
    let mut group = GroupWriter::new(target);
    for record in sample_records(target) {
        group.push(&record)?;
    }
    let records = group.record_count();
    let mut table = TableWriter::new();
    table.push_group(group);
    let bytes = table.finish();
    std::fs::write(output, &bytes).with_context(|| format!("writing {}", output.display()))?;
    println!("Wrote {} records ({} bytes) to {}", records, bytes.len(), output.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let target = args.target.target();
    match args.command {
        Command::Dump { input } => dump(&input, target),
        Command::GenSample { output } => gen_sample(&output, target),
    }
}

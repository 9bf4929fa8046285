//! CLI front-end for the emulator core: argument parsing, image loading,
//! and exit-code policy. Everything architectural lives in `rvemu64-core`.

use std::fs;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use rvemu64_core::Emulator;

/// RV64IMA emulator capable of booting a small OS from a block device.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Kernel image, loaded verbatim at the RAM base (0x8000_0000).
    #[arg(long)]
    kernel: String,

    /// Raw disk image backing the virtio-mmio block device.
    #[arg(long)]
    disk: Option<String>,
}

/// Prints the final register file on exit, for post-mortem inspection.
fn dump_registers(emu: &Emulator) {
    eprintln!("{}", emu.cpu.xregs);
    eprintln!("---------------------------------------------------");
    eprintln!("pc: {:#x}", emu.cpu.pc);
}

fn run() -> Result<()> {
    let args = Args::parse();

    let kernel_image = fs::read(&args.kernel)
        .with_context(|| format!("failed to read kernel image {:?}", args.kernel))?;
    let disk_image = match &args.disk {
        Some(path) => {
            fs::read(path).with_context(|| format!("failed to read disk image {:?}", path))?
        }
        None => Vec::new(),
    };

    let mut emu = Emulator::new(kernel_image, disk_image);
    let result = emu.run().context("unrecoverable disk-access error");
    dump_registers(&emu);

    result
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

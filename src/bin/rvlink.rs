//! The `rvlink` command-line front end: argument parsing and the
//! fatal-on-error sink around [`rvlink::driver::link`].

use clap::Parser;

use rvlink::context::{Configuration, Context, InputSpec};
use rvlink::driver;
use rvlink::error::OrFatal;

/// A static linker for relocatable RISC-V ELF64 object files and archives.
#[derive(Debug, Parser)]
#[command(name = "rvlink", version)]
struct Args {
    /// Object files and archives to link, in link order.
    inputs: Vec<String>,

    /// Library search path, may be repeated.
    #[arg(short = 'L', value_name = "DIR")]
    library_paths: Vec<String>,

    /// Link against `lib<NAME>.a`, may be repeated; resolved against `-L`
    /// in the order given, with the order relative to positional inputs
    /// preserved on the command line.
    #[arg(short = 'l', value_name = "NAME")]
    libraries: Vec<String>,

    /// Output path.
    #[arg(short = 'o', value_name = "PATH", default_value = "a.out")]
    output: String,

    /// Target emulation; only `elf64lriscv` is supported.
    #[arg(short = 'm', value_name = "EMULATION", default_value = "elf64lriscv")]
    emulation: String,
}

fn main() {
    let args = Args::parse();

    if args.emulation != "elf64lriscv" {
        rvlink::error::fatal(rvlink::error::Error::UnsupportedEmulation {
            name: args.emulation,
        });
    }

    let mut inputs: Vec<InputSpec> = args.inputs.into_iter().map(InputSpec::Path).collect();
    inputs.extend(args.libraries.into_iter().map(InputSpec::Library));

    let config = Configuration::builder()
        .output_path(args.output.clone())
        .emulation(args.emulation)
        .library_paths(args.library_paths)
        .inputs(inputs)
        .build();

    let mut ctx = Context::new(config);
    let image = driver::link(&mut ctx).or_fatal();

    std::fs::write(&args.output, image)
        .map_err(|source| rvlink::error::Error::Io {
            path: args.output.clone(),
            source,
        })
        .or_fatal();
}

use anyhow::{Context, Result};
use clap::Parser;
use kestrel::{optimize_source_inspected, OptimizeOptions};
use std::fs;
use std::path::PathBuf;

/// kestrel: function-level bytecode optimizer for a JavaScript engine.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input assembly file (.kasm)
    input: PathBuf,

    /// Output assembly file
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Skip liveness analysis and register allocation
    #[arg(long)]
    no_regalloc: bool,

    /// Minimum register count to keep after allocation
    #[arg(long, value_name = "N", default_value_t = 0)]
    reserved: u32,

    /// Print the final CFG of every function to stderr
    #[arg(long)]
    dump_cfg: bool,
}

impl Cli {
    fn options(&self) -> OptimizeOptions {
        OptimizeOptions {
            allocate_registers: !self.no_regalloc,
            reserved_registers: self.reserved,
            ..Default::default()
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let options = cli.options();

    log::info!("optimizing {}", cli.input.display());

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let out = optimize_source_inspected(&source, &options, |unit, cfg| {
        if cli.dump_cfg {
            eprint!("{}", cfg.dump(unit));
        }
    })
    .with_context(|| format!("failed to optimize {}", cli.input.display()))?;

    if let Some(output_path) = &cli.output {
        fs::write(output_path, &out)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        log::info!("wrote {}", output_path.display());
    } else {
        print!("{}", out);
    }
    Ok(())
}

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use env_logger::Env;
use log::info;

use cachesim_mesi::{report, trace, SimError, Simulator, SystemSpec};

/// Cycle-accurate four-core MESI snooping-bus cache simulator.
#[derive(Parser, Debug)]
#[command(name = "cachesim-mesi")]
struct Args {
    /// Trace prefix; reads <prefix>_proc{0..3}.trace
    #[arg(short = 't', value_name = "prefix")]
    trace_prefix: String,

    /// Number of set index bits
    #[arg(short = 's', value_name = "s", default_value_t = 0)]
    set_bits: u32,

    /// Associativity
    #[arg(short = 'E', value_name = "E", default_value_t = 0)]
    assoc: usize,

    /// Number of block offset bits
    #[arg(short = 'b', value_name = "b", default_value_t = 0)]
    block_bits: u32,

    /// Output file (defaults to standard output)
    #[arg(short = 'o', value_name = "outfile")]
    outfile: Option<PathBuf>,

    /// Verbose per-cycle logging
    #[arg(short = 'd')]
    debug: bool,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // -h lands here as well and must succeed
            return if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    let default_level = if args.debug { "debug" } else { "info" };
    let env = Env::default()
        .filter_or("CACHESIM_LOG", default_level)
        .write_style_or("CACHESIM_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), SimError> {
    let spec = SystemSpec::new(args.set_bits, args.assoc, args.block_bits)?;
    let queues = trace::load_traces(&args.trace_prefix)?;

    let mut sim = Simulator::new(spec, queues);
    let started = Instant::now();
    let cycles = sim.run()?;
    info!("simulation finished after {cycles} cycles in {:?}", started.elapsed());

    match &args.outfile {
        Some(path) => {
            let mut file = File::create(path)
                .map_err(|source| SimError::OutputIo { path: path.clone(), source })?;
            report::write_report(&mut file, &args.trace_prefix, &spec, sim.stats())
                .map_err(|source| SimError::OutputIo { path: path.clone(), source })?;
        }
        None => {
            let stdout = io::stdout();
            report::write_report(&mut stdout.lock(), &args.trace_prefix, &spec, sim.stats())?;
        }
    }
    Ok(())
}

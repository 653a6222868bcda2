use crate::stores::Registry;
use clap::ValueHint::FilePath;
use clap::{Args, Parser, Subcommand};
use log::debug;
use std::fs::read_to_string;

#[derive(Args, Debug)]
struct BenchArgs {
    #[arg(short = 's')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the storage backend's TOML config file")]
    store_config: String,

    #[arg(short = 'b')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the benchmark's TOML config file")]
    benchmark_config: String,
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run a benchmark")]
    Bench(BenchArgs),
    #[command(about = "List all registered storage backends")]
    List,
}

fn bench_cli(args: &BenchArgs) {
    let opt: String = {
        let s = args.store_config.clone();
        let b = args.benchmark_config.clone();
        read_to_string(s.as_str()).unwrap() + "\n" + &read_to_string(b.as_str()).unwrap()
    };

    crate::bench::init(&opt).bench();
}

fn list_cli() {
    for r in inventory::iter::<Registry> {
        println!("Registered store: {}", r.name);
    }
}

/// The default command line interface.
///
/// This function is public and can be called in a different crate. For
/// example, one can integrate their own storage backend by registering its
/// constructor, then call this function in `main` to get a benchmark binary
/// with the same usage as the one in this crate.
///
/// ## Usage
///
/// To get the usage of the command line interface, users can run:
///
/// ```bash
/// docbench -h
/// ```
///
/// The interface supports two modes, `bench` and `list`.
///
/// ### Benchmark Mode
///
/// Usage:
///
/// ```bash
/// docbench bench -s <STORE_CONFIG> -b <BENCH_CONFIG>
/// ```
///
/// Where `STORE_CONFIG` and `BENCH_CONFIG` are the paths to the storage
/// backend and benchmark configuration files, respectively. For their
/// format, you can refer to the documentations of [`crate::stores`] and
/// [`crate::bench`].
///
/// ### List Mode
///
/// Usage:
/// ``` bash
/// docbench list
/// ```
///
/// This command lists all registered storage backends' names.
pub fn cmdline() {
    env_logger::init();
    let cli = Cli::parse();
    debug!("Starting docbench with args: {:?}", cli);
    match cli.command {
        Commands::Bench(args) => bench_cli(&args),
        Commands::List => list_cli(),
    }
}

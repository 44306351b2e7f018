use clap::Parser;
use eyre::Result;
use shared::protocol::TermConfig;
use std::path::PathBuf;
use validator::benchmark::group_index;
use validator::term::{Phase, TermClock};

#[derive(Parser)]
struct Args {
    /// Block height to locate
    #[arg(short = 'b', long)]
    height: u64,

    /// TOML file with protocol constants
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => TermConfig::load_from_file(path).map_err(|e| eyre::eyre!("{e:#}"))?,
        None => TermConfig::default(),
    };

    let (term, offset) = TermClock::new(&config).locate(args.height)?;
    let term_start = config.origin_block + term * config.blocks_per_term;
    println!("Height {} is term {term}, offset {offset}", args.height);
    println!("Active phase: {}", Phase::at(offset, &config));
    if let Some(group) = group_index(offset, &config) {
        println!("Benchmark window of group {group}");
    }

    let windows = [
        (Phase::ShareSeed, 0, config.blocks_share_seed),
        (Phase::Vote, config.blocks_share_seed, config.blocks_start_benchmark),
        (Phase::Benchmark, config.blocks_start_benchmark, config.blocks_seedhash_start),
        (Phase::CommitSeedHash, config.blocks_seedhash_start, config.blocks_seedhash_end),
        (Phase::SetWeights, config.blocks_seedhash_end, config.blocks_per_term),
    ];
    for (phase, start, end) in windows {
        println!(
            "{:>16}: blocks {}..{}",
            phase.as_str(),
            term_start + start,
            term_start + end
        );
    }
    Ok(())
}

use clap::Parser;
use eyre::Result;
use shared::ledger::{HttpLedger, Ledger};
use shared::models::commitment::Commitment;
use url::Url;

#[derive(Parser)]
struct Args {
    /// Validator uid whose latest commitment to read
    #[arg(short = 'u', long)]
    uid: u16,

    /// Ledger API URL
    #[arg(short = 'r', long)]
    ledger_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let ledger =
        HttpLedger::new(Url::parse(&args.ledger_url)?).map_err(|e| eyre::eyre!("{e:#}"))?;

    let height = ledger
        .read_block_height()
        .await
        .map_err(|e| eyre::eyre!("{e:#}"))?;
    println!("Block height: {height}");

    match ledger
        .read_commitment(args.uid)
        .await
        .map_err(|e| eyre::eyre!("{e:#}"))?
    {
        Some(record) => {
            println!("Published at block {}", record.block);
            println!("{}", serde_json::to_string_pretty(&record.commitment)?);
            if let Commitment::Seed(reveal) = &record.commitment {
                println!("Self-consistent: {}", reveal.is_self_consistent());
            }
        }
        None => println!("Validator {} has no commitment", args.uid),
    }
    Ok(())
}

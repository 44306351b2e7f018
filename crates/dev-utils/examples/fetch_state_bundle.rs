use clap::Parser;
use eyre::Result;
use shared::artifacts::{fetch_json, RedisArtifactStore};
use shared::models::artifact::{state_artifact_key, state_artifact_name, StateBundle};

#[derive(Parser)]
struct Args {
    /// Validator uid that published the bundle
    #[arg(short = 'u', long)]
    uid: u16,

    /// Term the bundle was shared for
    #[arg(short = 't', long)]
    term: u64,

    /// Artifact version from the validator's seed reveal
    #[arg(short = 'v', long)]
    version: String,

    /// Redis URL of the artifact store
    #[arg(long, default_value = "redis://localhost:6379")]
    redis_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let store = RedisArtifactStore::new(&args.redis_url).map_err(|e| eyre::eyre!("{e:#}"))?;

    let bundle: Option<StateBundle> = fetch_json(
        &store,
        &state_artifact_name(args.uid),
        &state_artifact_key(args.term),
        &args.version,
    )
    .await
    .map_err(|e| eyre::eyre!("{e:#}"))?;

    let Some(bundle) = bundle else {
        println!("No state bundle {} for validator {}", args.version, args.uid);
        return Ok(());
    };
    println!("Term {} seed {} ({})", bundle.term, bundle.seed, bundle.hash);
    println!("Grouphash {}", bundle.grouphash);
    for (index, group) in bundle.groups.iter().enumerate() {
        println!("group {index}: {group:?}");
    }
    Ok(())
}

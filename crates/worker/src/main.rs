use clap::Parser;
use shared::utils::signal::cancel_on_shutdown_signal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use worker::TaskHandles;
use worker::{setup_logging, Cli};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let task_handles: TaskHandles = Arc::new(Mutex::new(Vec::<JoinHandle<()>>::new()));

    let cli = Cli::parse();

    if let Err(e) = setup_logging(Some(&cli)) {
        eprintln!("Warning: Failed to initialize logging: {e}. Using default logging.");
    }

    let cancellation_token = CancellationToken::new();
    let signal_handle = cancel_on_shutdown_signal(cancellation_token.clone())?;
    task_handles.lock().await.push(signal_handle);

    let mut exit_code = 0;
    let command_token = cancellation_token.clone();
    tokio::select! {
        cmd_result = cli.run(command_token, task_handles.clone()) => {
            if let Err(e) = cmd_result {
                log::error!("Command execution error: {e}");
                exit_code = 1;
            }
        }
        _ = cancellation_token.cancelled() => {
            log::info!("Received cancellation request");
        }
    }
    cancellation_token.cancel();

    let mut handles = task_handles.lock().await;
    for handle in handles.iter() {
        handle.abort();
    }

    let cleanup = tokio::time::timeout(
        tokio::time::Duration::from_secs(5),
        futures::future::join_all(handles.drain(..)),
    )
    .await;
    if cleanup.is_err() {
        log::warn!("Timeout waiting for tasks to cleanup");
    }

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

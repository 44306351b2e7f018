pub(crate) mod command;

pub use command::{execute_command, Cli, Commands};

use crate::TaskHandles;
use tokio_util::sync::CancellationToken;

impl Cli {
    pub async fn run(
        &self,
        cancellation_token: CancellationToken,
        task_handles: TaskHandles,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        execute_command(&self.command, cancellation_token, task_handles).await
    }
}

//! systemd unit manager.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{CommandRunner, ServiceManager, UnitStatus};
use crate::error::{ControlError, ControlResult};

const SYSTEMCTL: &str = "systemctl";

/// [`ServiceManager`] that drives `systemctl`.
#[derive(Clone)]
pub struct SystemdManager {
    runner: Arc<dyn CommandRunner>,
}

impl SystemdManager {
    /// Manager using `runner` to invoke `systemctl`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn verb(&self, verb: &'static str, unit: &str) -> ControlResult<()> {
        let output = self.runner.run(SYSTEMCTL, &[verb, unit]).await?;
        if !output.success() {
            return Err(ControlError::failed(
                SYSTEMCTL,
                verb,
                output.status,
                output.stderr.as_bytes(),
            ));
        }
        info!(unit, verb, "unit command issued");
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for SystemdManager {
    async fn start(&self, unit: &str) -> ControlResult<()> {
        self.verb("start", unit).await
    }

    async fn stop(&self, unit: &str) -> ControlResult<()> {
        self.verb("stop", unit).await
    }

    async fn restart(&self, unit: &str) -> ControlResult<()> {
        self.verb("restart", unit).await
    }

    async fn status(&self, unit: &str) -> ControlResult<UnitStatus> {
        // is-active exits non-zero for anything but active; the word on stdout
        // is what matters.
        let output = self.runner.run(SYSTEMCTL, &["is-active", unit]).await?;
        Ok(UnitStatus::parse(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::command::scripted::ScriptedRunner;

    #[tokio::test]
    async fn verbs_and_status() -> ControlResult<()> {
        let runner = Arc::new(ScriptedRunner::default());
        let manager = SystemdManager::new(runner.clone());

        runner.reply(0, "");
        manager.restart("mediamtx").await?;
        runner.reply(3, "inactive\n");
        assert_eq!(manager.status("mediamtx").await?, UnitStatus::Inactive);
        runner.reply(1, "");
        assert!(matches!(
            manager.start("mediamtx").await,
            Err(ControlError::CommandFailed { operation: "start", .. })
        ));

        assert_eq!(
            runner.calls(),
            vec![
                "systemctl restart mediamtx",
                "systemctl is-active mediamtx",
                "systemctl start mediamtx"
            ]
        );
        Ok(())
    }
}

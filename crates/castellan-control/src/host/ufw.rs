//! `ufw` firewall backend and a no-op backend for hosts without one.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use castellan_config::Transport;

use super::{CommandRunner, Firewall, PortRule};
use crate::error::{ControlError, ControlResult};

const UFW: &str = "ufw";

/// [`Firewall`] that drives `ufw`.
#[derive(Clone)]
pub struct UfwFirewall {
    runner: Arc<dyn CommandRunner>,
}

impl UfwFirewall {
    /// Firewall using `runner` to invoke `ufw`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn call(&self, operation: &'static str, args: &[&str]) -> ControlResult<String> {
        let output = self.runner.run(UFW, args).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(ControlError::failed(
                UFW,
                operation,
                output.status,
                output.stderr.as_bytes(),
            ))
        }
    }
}

#[async_trait]
impl Firewall for UfwFirewall {
    async fn open_rules(&self) -> ControlResult<BTreeSet<PortRule>> {
        let status = self.call("ufw.status", &["status"]).await?;
        Ok(parse_status(&status))
    }

    async fn allow(&self, rule: PortRule) -> ControlResult<()> {
        self.call("ufw.allow", &["allow", &rule.to_string()]).await?;
        Ok(())
    }

    async fn remove(&self, rule: PortRule) -> ControlResult<()> {
        self.call("ufw.delete", &["delete", "allow", &rule.to_string()])
            .await?;
        Ok(())
    }
}

/// Backend for hosts where firewall management is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFirewall;

#[async_trait]
impl Firewall for NoFirewall {
    async fn open_rules(&self) -> ControlResult<BTreeSet<PortRule>> {
        Ok(BTreeSet::new())
    }

    async fn allow(&self, _rule: PortRule) -> ControlResult<()> {
        Ok(())
    }

    async fn remove(&self, _rule: PortRule) -> ControlResult<()> {
        Ok(())
    }
}

/// Parse `ufw status` into allow rules. Rules without a protocol come back as
/// [`PortRule::any`] so that closing them targets the same form; port ranges
/// and non-ALLOW actions are ignored.
fn parse_status(text: &str) -> BTreeSet<PortRule> {
    let mut rules = BTreeSet::new();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let Some(target) = fields.next() else {
            continue;
        };
        let rest: Vec<&str> = fields.collect();
        let Some(action) = rest.iter().find(|field| **field != "(v6)") else {
            continue;
        };
        if !action.eq_ignore_ascii_case("ALLOW") {
            continue;
        }
        let (port, transport) = match target.split_once('/') {
            Some((port, "tcp")) => (port, Some(Transport::Tcp)),
            Some((port, "udp")) => (port, Some(Transport::Udp)),
            Some(_) => continue,
            None => (target, None),
        };
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };
        rules.insert(PortRule { port, transport });
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::command::scripted::ScriptedRunner;

    const STATUS: &str = "\
Status: active

To                         Action      From
--                         ------      ----
22/tcp                     ALLOW       Anywhere
8554/tcp                   ALLOW       Anywhere
8890/udp                   ALLOW       Anywhere
5000                       ALLOW       Anywhere
6000:6007/tcp              ALLOW       Anywhere
9999/tcp                   DENY        Anywhere
8554/tcp (v6)              ALLOW       Anywhere (v6)
OpenSSH                    ALLOW       Anywhere
";

    #[test]
    fn status_output_is_parsed() {
        let rules = parse_status(STATUS);
        let expected: BTreeSet<_> = [
            PortRule::new(22, Transport::Tcp),
            PortRule::new(8554, Transport::Tcp),
            PortRule::new(8890, Transport::Udp),
            PortRule::any(5000),
        ]
        .into_iter()
        .collect();
        assert_eq!(rules, expected);
        assert!(parse_status("Status: inactive\n").is_empty());
    }

    #[tokio::test]
    async fn commands_use_port_slash_transport() -> ControlResult<()> {
        let runner = Arc::new(ScriptedRunner::default());
        let firewall = UfwFirewall::new(runner.clone());
        firewall.allow(PortRule::new(9100, Transport::Tcp)).await?;
        firewall.remove(PortRule::new(8890, Transport::Udp)).await?;
        firewall.remove(PortRule::any(5000)).await?;
        runner.reply(1, "");
        assert!(firewall.open_rules().await.is_err());
        assert_eq!(
            runner.calls(),
            vec![
                "ufw allow 9100/tcp",
                "ufw delete allow 8890/udp",
                "ufw delete allow 5000",
                "ufw status"
            ]
        );
        Ok(())
    }
}

use parking_lot::Mutex;

use super::{Rule, RuleAccessor, RuleResult};

/// In-memory rule table for hosts without `netsh`. Adds and deletes are
/// logged instead of executed.
#[derive(Debug, Default)]
pub struct SimulatedRules {
    rules: Mutex<Vec<Rule>>,
}

impl RuleAccessor for SimulatedRules {
    async fn list_rules(&self) -> RuleResult<Vec<Rule>> {
        Ok(self.rules.lock().clone())
    }

    async fn add_rule(
        &self,
        listen_port: &str,
        connect_addr: &str,
        connect_port: &str,
    ) -> RuleResult<()> {
        tracing::info!(
            listen_port,
            connect_addr,
            connect_port,
            "[simulated] netsh interface portproxy add v4tov4 listenaddress=0.0.0.0"
        );
        let mut rules = self.rules.lock();
        rules.retain(|rule| rule.listen_port != listen_port);
        rules.push(Rule {
            listen_address: "0.0.0.0".to_string(),
            listen_port: listen_port.to_string(),
            connect_address: connect_addr.to_string(),
            connect_port: connect_port.to_string(),
        });
        Ok(())
    }

    async fn delete_rule(&self, listen_port: &str) -> RuleResult<()> {
        tracing::info!(
            listen_port,
            "[simulated] netsh interface portproxy delete v4tov4 listenaddress=0.0.0.0"
        );
        self.rules.lock().retain(|rule| rule.listen_port != listen_port);
        Ok(())
    }
}

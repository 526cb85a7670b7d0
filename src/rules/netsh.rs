use std::{process::Stdio, time::Duration};

use tokio::{process::Command, time::timeout};

use super::{Rule, RuleAccessor, RuleError, RuleResult};

/// Rules managed through `netsh interface portproxy`.
#[derive(Debug, Clone)]
pub struct NetshRules {
    command_timeout: Duration,
}

impl NetshRules {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    async fn netsh(&self, args: &[&str]) -> RuleResult<String> {
        let label = format!("netsh {}", args.join(" "));
        let mut command = Command::new("netsh");
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let output = match timeout(self.command_timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(RuleError::Io { command: label, source }),
            Err(_) => {
                return Err(RuleError::Timeout {
                    command: label,
                    waited: self.command_timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            // netsh reports most errors on stdout.
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = [stderr.trim(), stdout.trim()]
                .into_iter()
                .find(|text| !text.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("exit status {}", output.status));
            return Err(RuleError::CommandFailed {
                command: label,
                detail,
            });
        }
        Ok(stdout)
    }
}

impl RuleAccessor for NetshRules {
    async fn list_rules(&self) -> RuleResult<Vec<Rule>> {
        let output = self
            .netsh(&["interface", "portproxy", "show", "all"])
            .await?;
        Ok(parse_rule_table(&output))
    }

    async fn add_rule(
        &self,
        listen_port: &str,
        connect_addr: &str,
        connect_port: &str,
    ) -> RuleResult<()> {
        let listen_port = format!("listenport={listen_port}");
        let connect_addr = format!("connectaddress={connect_addr}");
        let connect_port = format!("connectport={connect_port}");
        self.netsh(&[
            "interface",
            "portproxy",
            "add",
            "v4tov4",
            "listenaddress=0.0.0.0",
            &listen_port,
            &connect_addr,
            &connect_port,
        ])
        .await?;
        tracing::info!(%listen_port, %connect_addr, %connect_port, "added portproxy rule");
        Ok(())
    }

    async fn delete_rule(&self, listen_port: &str) -> RuleResult<()> {
        let listen_port = format!("listenport={listen_port}");
        self.netsh(&[
            "interface",
            "portproxy",
            "delete",
            "v4tov4",
            "listenaddress=0.0.0.0",
            &listen_port,
        ])
        .await?;
        tracing::info!(%listen_port, "deleted portproxy rule");
        Ok(())
    }
}

/// Parse `show all` output: every four-column row that is not a header.
pub fn parse_rule_table(output: &str) -> Vec<Rule> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [listen_address, listen_port, connect_address, connect_port] = fields[..] else {
                return None;
            };
            if listen_address == "Address"
                || listen_address.starts_with("---")
                || listen_address.starts_with("Listen")
            {
                return None;
            }
            Some(Rule {
                listen_address: listen_address.to_string(),
                listen_port: listen_port.to_string(),
                connect_address: connect_address.to_string(),
                connect_port: connect_port.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_ALL: &str = "\r\n\
Listen on ipv4:             Connect to ipv4:\r\n\
\r\n\
Address         Port        Address         Port\r\n\
--------------- ----------  --------------- ----------\r\n\
0.0.0.0         8080        192.168.1.10    80\r\n\
0.0.0.0         2222        192.168.1.11    22\r\n\
\r\n";

    #[test]
    fn parses_show_all_table() {
        let rules = parse_rule_table(SHOW_ALL);
        assert_eq!(
            rules,
            vec![
                Rule {
                    listen_address: "0.0.0.0".to_string(),
                    listen_port: "8080".to_string(),
                    connect_address: "192.168.1.10".to_string(),
                    connect_port: "80".to_string(),
                },
                Rule {
                    listen_address: "0.0.0.0".to_string(),
                    listen_port: "2222".to_string(),
                    connect_address: "192.168.1.11".to_string(),
                    connect_port: "22".to_string(),
                },
            ]
        );
    }

    #[test]
    fn empty_table_yields_no_rules() {
        assert!(parse_rule_table("").is_empty());
        assert!(parse_rule_table("\r\nListen on ipv4:             Connect to ipv4:\r\n").is_empty());
    }

    #[test]
    fn rule_serializes_camel_case() {
        let rule = &parse_rule_table(SHOW_ALL)[0];
        let json = serde_json::to_value(rule).unwrap();
        assert_eq!(json["listenAddress"], "0.0.0.0");
        assert_eq!(json["connectPort"], "80");
    }
}

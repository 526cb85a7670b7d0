use serde::{Deserialize, Serialize};

pub const PROXY_MARKER: &str = "[[proxies]]";

/// One `[[proxies]]` entry of the tunnel client's configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "localIP")]
    pub local_ip: String,
    #[serde(rename = "localPort")]
    pub local_port: String,
    #[serde(rename = "remotePort")]
    pub remote_port: String,
}

impl ProxyRecord {
    pub fn tcp(
        name: impl Into<String>,
        local_port: impl Into<String>,
        remote_port: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: "tcp".to_string(),
            local_ip: "127.0.0.1".to_string(),
            local_port: local_port.into(),
            remote_port: remote_port.into(),
        }
    }

    /// Render the block as appended to the registry, including the leading
    /// blank separator line.
    pub fn render_block(&self) -> String {
        let mut block = String::with_capacity(128);
        block.push('\n');
        block.push_str(PROXY_MARKER);
        block.push('\n');
        push_field(&mut block, "name", &quoted(&self.name));
        push_field(&mut block, "type", &quoted(&self.kind));
        push_field(&mut block, "localIP", &quoted(&self.local_ip));
        push_field(&mut block, "localPort", &port_value(&self.local_port));
        push_field(&mut block, "remotePort", &port_value(&self.remote_port));
        block
    }
}

fn push_field(block: &mut String, key: &str, value: &str) {
    block.push_str(key);
    block.push_str(" = ");
    block.push_str(value);
    block.push('\n');
}

/// TOML basic string; quotes, backslashes and control characters are escaped
/// so a value can never end the line or open another table.
fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// Ports are written bare when numeric so the client reads them as integers.
fn port_value(value: &str) -> String {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        value.to_string()
    } else {
        quoted(value)
    }
}

//! Tagged block view of the registry file.
//!
//! The file is split into `Proxy` blocks (a `[[proxies]]` marker plus the lines
//! up to the next section header) and `Opaque` spans holding everything else.
//! Every block keeps its raw text, so serializing an unedited document gives
//! back the exact input bytes.

use once_cell::sync::Lazy;
use regex::Regex;

use super::record::{PROXY_MARKER, ProxyRecord};

static NAME_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^name\s*=\s*"(.*)""#).expect("valid name regex"));
static TYPE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^type\s*=\s*"(.*)""#).expect("valid type regex"));
static LOCAL_IP_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^localIP\s*=\s*"(.*)""#).expect("valid localIP regex"));
static LOCAL_PORT_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^localPort\s*=\s*(?:"([^"]*)"|(\d+))"#).expect("valid localPort regex")
});
static REMOTE_PORT_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^remotePort\s*=\s*(?:"([^"]*)"|(\d+))"#).expect("valid remotePort regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyBlock {
    pub record: ProxyRecord,
    raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Proxy(ProxyBlock),
    Opaque(String),
}

impl Block {
    fn raw(&self) -> &str {
        match self {
            Block::Proxy(block) => &block.raw,
            Block::Opaque(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDocument {
    blocks: Vec<Block>,
}

impl RegistryDocument {
    pub fn parse(content: &str) -> Self {
        let mut blocks = Vec::new();
        let mut opaque = String::new();
        let mut current: Option<ProxyBlock> = None;

        for line in content.split_inclusive('\n') {
            let trimmed = line.trim();

            if trimmed == PROXY_MARKER {
                flush_opaque(&mut blocks, &mut opaque);
                if let Some(block) = current.take() {
                    blocks.push(Block::Proxy(block));
                }
                current = Some(ProxyBlock {
                    record: ProxyRecord::default(),
                    raw: line.to_string(),
                });
                continue;
            }

            if is_section_header(trimmed) {
                if let Some(block) = current.take() {
                    blocks.push(Block::Proxy(block));
                }
                opaque.push_str(line);
                continue;
            }

            match current.as_mut() {
                Some(block) => {
                    block.raw.push_str(line);
                    apply_field(&mut block.record, trimmed);
                }
                None => opaque.push_str(line),
            }
        }

        if let Some(block) = current.take() {
            blocks.push(Block::Proxy(block));
        }
        flush_opaque(&mut blocks, &mut opaque);

        Self { blocks }
    }

    pub fn records(&self) -> impl Iterator<Item = &ProxyRecord> {
        self.blocks.iter().filter_map(|block| match block {
            Block::Proxy(proxy) => Some(&proxy.record),
            Block::Opaque(_) => None,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records().any(|record| record.name == name)
    }

    /// Drop every proxy block named exactly `name`; returns how many went.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|block| match block {
            Block::Proxy(proxy) => proxy.record.name != name,
            Block::Opaque(_) => true,
        });
        before - self.blocks.len()
    }

    pub fn serialize(&self) -> String {
        self.blocks.iter().map(Block::raw).collect()
    }
}

fn flush_opaque(blocks: &mut Vec<Block>, opaque: &mut String) {
    if !opaque.is_empty() {
        blocks.push(Block::Opaque(std::mem::take(opaque)));
    }
}

fn is_section_header(trimmed: &str) -> bool {
    trimmed.starts_with('[') && trimmed.ends_with(']')
}

fn apply_field(record: &mut ProxyRecord, line: &str) {
    if let Some(value) = capture_string(&NAME_FIELD, line) {
        record.name = value;
    } else if let Some(value) = capture_string(&TYPE_FIELD, line) {
        record.kind = value;
    } else if let Some(value) = capture_string(&LOCAL_IP_FIELD, line) {
        record.local_ip = value;
    } else if let Some(value) = capture_port(&LOCAL_PORT_FIELD, line) {
        record.local_port = value;
    } else if let Some(value) = capture_port(&REMOTE_PORT_FIELD, line) {
        record.remote_port = value;
    }
}

fn capture_string(pattern: &Regex, line: &str) -> Option<String> {
    pattern
        .captures(line)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

fn capture_port(pattern: &Regex, line: &str) -> Option<String> {
    let captures = pattern.captures(line)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"serverAddr = "relay.example.net"
serverPort = 7000

[auth]
method = "token"
token = "s3cret"

[[proxies]]
name = "alice-manager-10.0.0.5-80"
type = "tcp"
localIP = "127.0.0.1"
localPort = 8080
remotePort = 18080

[webServer]
addr = "127.0.0.1"
port = 7400

[[proxies]]
name = "alice-ssh"
type = "tcp"
localIP = "127.0.0.1"
localPort = "22"
remotePort = 6000
"#;

    #[test]
    fn parses_proxies_in_file_order() {
        let doc = RegistryDocument::parse(SAMPLE);
        let records: Vec<_> = doc.records().cloned().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "alice-manager-10.0.0.5-80");
        assert_eq!(records[0].local_port, "8080");
        assert_eq!(records[0].remote_port, "18080");
        assert_eq!(records[1].name, "alice-ssh");
        assert_eq!(records[1].local_port, "22");
        assert_eq!(records[1].kind, "tcp");
    }

    #[test]
    fn serialize_reproduces_input_exactly() {
        for content in [
            SAMPLE,
            "",
            "\n",
            "[[proxies]]\nname = \"x\"",
            "  [[proxies]]  \r\nname = \"crlf\"\r\n\r\n",
            "no newline at end",
        ] {
            assert_eq!(RegistryDocument::parse(content).serialize(), content);
        }
    }

    #[test]
    fn section_header_closes_proxy_block() {
        let doc = RegistryDocument::parse(SAMPLE);
        let first = doc.records().next().unwrap();
        // `addr`/`port` under [webServer] must not leak into the proxy.
        assert_eq!(first.local_ip, "127.0.0.1");
        assert!(matches!(doc.blocks[2], Block::Opaque(ref raw) if raw.starts_with("[webServer]")));
    }

    #[test]
    fn malformed_fields_stay_empty() {
        let doc = RegistryDocument::parse("[[proxies]]\nname = unquoted\nlocalPort = abc\n");
        let record = doc.records().next().unwrap();
        assert_eq!(record, &ProxyRecord::default());
    }

    #[test]
    fn remove_drops_only_exact_name() {
        let content = "[[proxies]]\nname = \"web\"\n\n[[proxies]]\nname = \"web-admin\"\n\n\
                       [[proxies]]\nname = \"my-web\"\n";
        let mut doc = RegistryDocument::parse(content);
        assert_eq!(doc.remove("web"), 1);
        let names: Vec<_> = doc.records().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["web-admin", "my-web"]);
        assert_eq!(
            doc.serialize(),
            "[[proxies]]\nname = \"web-admin\"\n\n[[proxies]]\nname = \"my-web\"\n"
        );
    }

    #[test]
    fn remove_keeps_following_section_header() {
        let mut doc = RegistryDocument::parse(SAMPLE);
        assert_eq!(doc.remove("alice-manager-10.0.0.5-80"), 1);
        let out = doc.serialize();
        assert!(out.contains("[auth]\nmethod = \"token\"\ntoken = \"s3cret\"\n\n[webServer]\n"));
        assert!(!out.contains("alice-manager"));
        assert!(out.ends_with("remotePort = 6000\n"));
    }

    #[test]
    fn remove_missing_name_is_noop() {
        let mut doc = RegistryDocument::parse(SAMPLE);
        assert_eq!(doc.remove("bob-ssh"), 0);
        assert_eq!(doc.serialize(), SAMPLE);
    }

    #[test]
    fn appended_blocks_round_trip() {
        let records = vec![
            ProxyRecord::tcp("a-manager-10.0.0.1-80", "8001", "18001"),
            ProxyRecord::tcp("a-manager-10.0.0.2-22", "2222", "12222"),
            ProxyRecord {
                name: "udp-dns".to_string(),
                kind: "udp".to_string(),
                local_ip: "10.0.0.53".to_string(),
                local_port: "53".to_string(),
                remote_port: "5353".to_string(),
            },
        ];
        let content: String = records.iter().map(ProxyRecord::render_block).collect();
        let parsed: Vec<_> = RegistryDocument::parse(&content).records().cloned().collect();
        assert_eq!(parsed, records);
    }
}

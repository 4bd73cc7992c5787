use mule_bpv7::eid::Eid;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mem,
    Sqlite,
}

/// Typed CLA configuration.
///
/// The string-map form only exists at the external config boundary; the
/// server parses it into this sum type once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaConfig {
    Tcp {
        bind: String,
        port: u16,
        keepalive_secs: u16,
    },
    Udp {
        bind: String,
        port: u16,
        max_bundle_size: usize,
    },
    Http {
        max_retries: u32,
    },
    HttpPull {
        poll_interval: Duration,
    },
}

/// A preconfigured static peer.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticPeerConfig {
    pub eid: String,
    pub address: String,
    #[serde(default)]
    pub cla_list: Vec<(String, Option<u16>)>,
}

/// The full agent configuration; `Default` supplies the documented
/// defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Canonical EID of this node. Required.
    pub node_id: Eid,
    pub web_port: u16,
    pub db: StoreBackend,
    pub routing: String,
    pub routing_settings: HashMap<String, HashMap<String, String>>,
    /// Local application endpoints to auto-register.
    pub endpoints: Vec<String>,
    /// Service registry bootstrap, tag to name.
    pub services: HashMap<u8, String>,
    pub clas: Vec<ClaConfig>,
    pub statics: Vec<StaticPeerConfig>,
    pub janitor_interval: Duration,
    pub peer_timeout: Duration,
    pub announcement_interval: Duration,
    pub disable_neighbour_discovery: bool,
    pub generate_status_reports: bool,
    pub parallel_bundle_processing: bool,
    pub workdir: PathBuf,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: Eid::Null,
            web_port: 3000,
            db: StoreBackend::Mem,
            routing: "epidemic".into(),
            routing_settings: HashMap::new(),
            endpoints: Vec::new(),
            services: HashMap::new(),
            clas: Vec::new(),
            statics: Vec::new(),
            janitor_interval: Duration::from_secs(10),
            peer_timeout: Duration::from_secs(300),
            announcement_interval: Duration::from_secs(30),
            disable_neighbour_discovery: false,
            generate_status_reports: false,
            parallel_bundle_processing: false,
            workdir: PathBuf::from("."),
            debug: false,
        }
    }
}

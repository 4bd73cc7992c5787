use mule_bpa::config::{ClaConfig, Config, StaticPeerConfig, StoreBackend};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

fn options() -> getopts::Options {
    let mut opts = getopts::Options::new();
    opts.optflag("h", "help", "print this help menu")
        .optflag("v", "version", "print the version information")
        .optopt("c", "config", "use a custom configuration file", "FILE");
    opts
}

fn init_logger(config: &config::Config, debug: bool) {
    let log_level = if debug {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        get::<String>(config, "log_level")
            .expect("Invalid 'log_level' value in configuration")
            .unwrap_or_else(|| "info".to_string())
            .parse()
            .expect("Invalid log level")
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .init();
}

pub fn get<'de, T: serde::Deserialize<'de>>(
    config: &config::Config,
    key: &str,
) -> Result<Option<T>, config::ConfigError> {
    match config.get::<T>(key) {
        Ok(v) => Ok(Some(v)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Parse command line and configuration sources into the agent config.
pub fn init() -> Option<Config> {
    let opts = options();
    let args: Vec<String> = std::env::args().collect();
    let program = args[0].clone();
    let flags = opts
        .parse(&args[1..])
        .expect("Failed to parse command line args");
    if flags.opt_present("h") {
        let brief = format!(
            "{} {} - {}\n\nUsage: {} [options]",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_DESCRIPTION"),
            program
        );
        print!("{}", opts.usage(&brief));
        return None;
    }
    if flags.opt_present("v") {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return None;
    }

    let mut b = config::Config::builder();
    if let Some(source) = flags.opt_str("config") {
        b = b.add_source(config::File::with_name(&source).format(config::FileFormat::Toml));
    } else if let Ok(source) = std::env::var("MULE_BPA_SERVER_CONFIG_FILE") {
        b = b.add_source(config::File::with_name(&source).format(config::FileFormat::Toml));
    }
    b = b.add_source(config::Environment::with_prefix("MULE_BPA_SERVER"));
    let raw = b.build().expect("Failed to load configuration");

    let debug = get(&raw, "debug")
        .expect("Invalid 'debug' value in configuration")
        .unwrap_or(false);
    init_logger(&raw, debug);
    info!(
        "{} version {} starting...",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    Some(load_config(&raw, debug))
}

fn load_config(raw: &config::Config, debug: bool) -> Config {
    let defaults = Config::default();

    let node_id: String = get(raw, "node_id")
        .expect("Invalid 'node_id' value in configuration")
        .expect("Missing required 'node_id' in configuration");

    Config {
        node_id: node_id.parse().expect("Invalid 'node_id' EID"),
        web_port: get(raw, "web_port")
            .expect("Invalid 'web_port' value in configuration")
            .unwrap_or(defaults.web_port),
        db: match get::<String>(raw, "db")
            .expect("Invalid 'db' value in configuration")
            .as_deref()
        {
            None | Some("mem") => StoreBackend::Mem,
            Some("sqlite") => StoreBackend::Sqlite,
            Some(other) => panic!("Unknown store backend '{other}'"),
        },
        routing: get(raw, "routing")
            .expect("Invalid 'routing' value in configuration")
            .unwrap_or(defaults.routing),
        routing_settings: get(raw, "routing_settings")
            .expect("Invalid 'routing_settings' value in configuration")
            .unwrap_or_default(),
        endpoints: get(raw, "endpoints")
            .expect("Invalid 'endpoints' value in configuration")
            .unwrap_or_default(),
        services: get::<HashMap<String, String>>(raw, "services")
            .expect("Invalid 'services' value in configuration")
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(tag, name)| match tag.parse::<u8>() {
                Ok(tag) => Some((tag, name)),
                Err(_) => {
                    warn!("Ignoring service with non-numeric tag '{tag}'");
                    None
                }
            })
            .collect(),
        clas: load_clas(raw),
        statics: get::<Vec<StaticPeerConfig>>(raw, "statics")
            .expect("Invalid 'statics' value in configuration")
            .unwrap_or_default(),
        janitor_interval: get(raw, "janitor_interval")
            .expect("Invalid 'janitor_interval' value in configuration")
            .map(Duration::from_secs)
            .unwrap_or(defaults.janitor_interval),
        peer_timeout: get(raw, "peer_timeout")
            .expect("Invalid 'peer_timeout' value in configuration")
            .map(Duration::from_secs)
            .unwrap_or(defaults.peer_timeout),
        announcement_interval: get(raw, "announcement_interval")
            .expect("Invalid 'announcement_interval' value in configuration")
            .map(Duration::from_secs)
            .unwrap_or(defaults.announcement_interval),
        disable_neighbour_discovery: get(raw, "disable_neighbour_discovery")
            .expect("Invalid 'disable_neighbour_discovery' value in configuration")
            .unwrap_or(false),
        generate_status_reports: get(raw, "generate_status_reports")
            .expect("Invalid 'generate_status_reports' value in configuration")
            .unwrap_or(false),
        parallel_bundle_processing: get(raw, "parallel_bundle_processing")
            .expect("Invalid 'parallel_bundle_processing' value in configuration")
            .unwrap_or(false),
        workdir: get::<String>(raw, "workdir")
            .expect("Invalid 'workdir' value in configuration")
            .map(Into::into)
            .unwrap_or(defaults.workdir),
        debug,
    }
}

/// The string-map CLA form from the config file, folded into the typed
/// `ClaConfig` exactly once.
fn load_clas(raw: &config::Config) -> Vec<ClaConfig> {
    #[derive(serde::Deserialize)]
    struct RawCla {
        #[serde(rename = "type")]
        cla_type: String,
        #[serde(default)]
        settings: HashMap<String, String>,
    }

    fn setting<T: std::str::FromStr>(
        settings: &HashMap<String, String>,
        key: &str,
        default: T,
    ) -> T {
        settings
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    get::<Vec<RawCla>>(raw, "clas")
        .expect("Invalid 'clas' value in configuration")
        .unwrap_or_default()
        .into_iter()
        .filter_map(|cla| match cla.cla_type.as_str() {
            "tcp" => Some(ClaConfig::Tcp {
                bind: setting(&cla.settings, "bind", "0.0.0.0".to_string()),
                port: setting(&cla.settings, "port", mule_tcpclv4::DEFAULT_PORT),
                keepalive_secs: setting(
                    &cla.settings,
                    "keepalive",
                    mule_tcpclv4::DEFAULT_KEEPALIVE_SECS,
                ),
            }),
            "udp" => Some(ClaConfig::Udp {
                bind: setting(&cla.settings, "bind", "0.0.0.0".to_string()),
                port: setting(&cla.settings, "port", mule_bpa::cla::udp::DEFAULT_PORT),
                max_bundle_size: setting(
                    &cla.settings,
                    "max_bundle_size",
                    mule_bpa::cla::udp::MAX_DATAGRAM,
                ),
            }),
            "http" => Some(ClaConfig::Http {
                max_retries: setting(&cla.settings, "max_retries", 3),
            }),
            "httppull" => Some(ClaConfig::HttpPull {
                poll_interval: Duration::from_secs(setting(&cla.settings, "interval", 30)),
            }),
            other => {
                warn!("Ignoring unknown CLA type '{other}' in configuration");
                None
            }
        })
        .collect()
}

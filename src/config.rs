use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    value::Dict,
    Figment, Provider,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::error::Error;
use crate::types::PeerDescriptor;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Identity of this peer within the group.
    pub identity: String,
    /// Where the peer listens for datagrams.
    pub listen_address: String,
    /// Local address outbound sockets are bound to.  Keep the port at 0:
    /// every known peer gets its own socket.
    pub source_address: SocketAddr,
    /// Address announced in join messages.  Defaults to the bound
    /// listen address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_address: Option<String>,
    /// HTTP command interface; disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_bind: Option<SocketAddr>,
    /// Initial list of known peers.
    #[serde(default)]
    pub peers: Vec<PeerDescriptor>,
}

/// Keys of the older flat config format and the field each one feeds.
const LEGACY_KEYS: [(&str, &str); 3] = [
    ("pid", "identity"),
    ("bind", "listen_address"),
    ("cmdbind", "control_bind"),
];

impl Default for Config {
    fn default() -> Self {
        Self {
            identity: String::new(),
            listen_address: "0.0.0.0:7946".into(),
            source_address: SocketAddr::from(([0, 0, 0, 0], 0)),
            advertise_address: None,
            control_bind: None,
            peers: Vec::new(),
        }
    }
}

impl Config {
    /// Defaults, then the config file (JSON if it ends in `.json`, TOML
    /// otherwise), then `GOSSIP_*` environment variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("Config file `{}` does not exist", path.display());
            }
            let file = match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => file_layer(Json::file(path))?,
                _ => file_layer(Toml::file(path))?,
            };
            figment = figment.merge(Serialized::defaults(file));
        }

        let config: Config = figment
            .merge(Env::prefixed("GOSSIP_"))
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.identity.is_empty() {
            return Err(Error::Config("`identity` must be set".into()));
        }
        if self.identity.len() > u8::MAX as usize {
            return Err(Error::Config(format!(
                "`identity` is {} bytes, the limit is 255",
                self.identity.len()
            )));
        }
        if let Some(addr) = &self.advertise_address {
            if addr.len() > u8::MAX as usize {
                return Err(Error::Config(format!(
                    "`advertise_address` is {} bytes, the limit is 255",
                    addr.len()
                )));
            }
        }
        Ok(())
    }
}

/// Read one config file into a dict, renaming legacy keys.  A key in
/// the current format wins over its legacy spelling.
fn file_layer(provider: impl Provider) -> anyhow::Result<Dict> {
    let mut dict: Dict = Figment::from(provider)
        .extract()
        .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

    for (legacy, key) in LEGACY_KEYS {
        if let Some(value) = dict.remove(legacy) {
            dict.entry(key.to_string()).or_insert(value);
        }
    }
    Ok(dict)
}

use std::net::{IpAddr, SocketAddr};

use figment::providers::{Env, Format, Yaml};
use figment::Figment;

/// The top-level configuration, holding every value the process needs
/// to start its controllers and the admission server.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct Config {
    pub webhook: WebhookConfig,
    pub controller: ControllerConfig,
}

#[derive(Clone, Debug, serde::Deserialize)]
/// Configuration for the Usage admission HTTP server (§4.H).
pub struct WebhookConfig {
    pub port: u16,
    pub ip: IpAddr,
}

impl WebhookConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
/// Tuning for the meta-controllers and the Usage index refresher.
pub struct ControllerConfig {
    pub xrd_poll_interval_secs: u64,
    pub usage_index_refresh_secs: u64,
}

/// Retrieve the application configuration by merging, in priority
/// order: `base.yml`, `<profile>.yml`, then `XP_`-prefixed environment
/// variables. The profile comes from the `XP_PROFILE` environment
/// variable so that no configuration value for a given profile is
/// ever co-located with another profile's in the same file.
pub fn load_configuration() -> Result<Config, anyhow::Error> {
    let profile = std::env::var("XP_PROFILE").unwrap_or_else(|_| "dev".to_string());

    let configuration_dir = {
        let manifest_dir = env!("CARGO_MANIFEST_DIR");
        std::path::Path::new(manifest_dir).join("config")
    };
    let base_filepath = configuration_dir.join("base.yml");
    let profile_filepath = configuration_dir.join(format!("{profile}.yml"));

    let figment = Figment::new()
        .merge(Yaml::file(base_filepath))
        .merge(Yaml::file(profile_filepath))
        .merge(Env::prefixed("XP_").split("__"));

    Ok(figment.extract()?)
}

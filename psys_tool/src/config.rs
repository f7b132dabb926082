use std::str::FromStr;

use log::{warn, LevelFilter};
use psys_commons::{PsysError, PsysResult, VAddress};
use psys_dynamic::Generation;

#[derive(Debug, serde::Deserialize)]
pub struct PsysConfig {
    #[serde(default = "generation_default")]
    pub generation: Generation,
    #[serde(default = "fragment_count_default")]
    pub fragment_count: u16,
    /// first address handed out to terminal buffers
    #[serde(default = "buffer_base_default")]
    pub buffer_base: VAddress,
    #[serde(default = "buffer_stride_default")]
    pub buffer_stride: u32,
    #[serde(default = "loglevel_default")]
    pub log_level: LevelFilter,
}

impl Default for PsysConfig {
    fn default() -> Self {
        return PsysConfig {
            generation: generation_default(),
            fragment_count: fragment_count_default(),
            buffer_base: buffer_base_default(),
            buffer_stride: buffer_stride_default(),
            log_level: loglevel_default(),
        };
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    return match std::env::var(name) {
        Ok(value) => value.parse::<T>().unwrap_or_else(|_| {
            warn!("ignoring unparsable {}={}", name, value);
            default
        }),
        Err(_) => default,
    };
}

fn generation_default() -> Generation {
    return env_or("PSYS_GENERATION", Generation::Ipu6ep);
}

fn fragment_count_default() -> u16 {
    return env_or("PSYS_FRAGMENT_COUNT", 1);
}

fn buffer_base_default() -> VAddress {
    return VAddress(env_or("PSYS_BUFFER_BASE", 0x1000_0000));
}

fn buffer_stride_default() -> u32 {
    return env_or("PSYS_BUFFER_STRIDE", 0x1_0000);
}

fn loglevel_default() -> LevelFilter {
    return env_or("RUST_LOG", LevelFilter::Warn);
}

impl PsysConfig {
    /// Load the config from `PSYS_CONFIG`, or `./psys.json` when unset.
    /// A missing file gives the defaults, a malformed one is an error.
    pub fn get_config() -> PsysResult<PsysConfig> {
        let config_path = std::env::var("PSYS_CONFIG").unwrap_or(String::from("./psys.json"));
        let config_buff = match std::fs::read(&config_path) {
            Ok(buffer) => buffer,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PsysConfig::default())
            }
            Err(err) => {
                warn!(
                    "Encountered error while reading config file at {}: {:?}",
                    config_path, err
                );
                return Err(PsysError::FileError);
            }
        };
        return Self::from_slice(&config_buff);
    }

    pub fn from_slice(config_buff: &[u8]) -> PsysResult<PsysConfig> {
        return serde_json::from_slice(config_buff).map_err(|err| {
            warn!("config is malformed: {}", err);
            PsysError::MalformedConfig
        });
    }
}

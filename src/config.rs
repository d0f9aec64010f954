use log::{debug, info};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::{MacAddress, MacAddressError};

const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 15;
const DEFAULT_BATCH_SIZE: usize = 1000;
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_MAX_ATTEMPTS: usize = 2;
const DEFAULT_RETRY_DELAY_SECS: u64 = 10;

/// A sensor this gateway accepts measurements from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagConfig {
    pub address: MacAddress,
    pub name: Option<String>,
}

/// How often and how long to keep trying a database operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub tags: Vec<TagConfig>,
    pub database_url: String,
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub channel_capacity: usize,
    pub retry: RetryPolicy,
}

impl GatewayConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL environment variable not set")?;

        // Try RUUVI_TAGS format first
        let tags = if let Ok(ruuvi_tags) = env::var("RUUVI_TAGS") {
            debug!("Found RUUVI_TAGS: '{}'", ruuvi_tags);
            parse_tags(&ruuvi_tags)?
        } else {
            // Fallback to individual environment variables
            debug!("RUUVI_TAGS environment variable not found, trying individual variables");
            tags_from_vars(env::vars())?
        };

        if tags.is_empty() {
            return Err("No RuuviTag sensors configured. Please set RUUVI_TAGS or RUUVI_TAG_<N>_MAC/RUUVI_TAG_<N>_NAME environment variables".into());
        }

        info!("Total tags loaded: {}", tags.len());
        for tag in &tags {
            info!(
                "Tag: {} -> {}",
                tag.address,
                tag.name.as_deref().unwrap_or("(unnamed)")
            );
        }

        Ok(GatewayConfig {
            tags,
            database_url,
            flush_interval: Duration::from_secs(env_or(
                "FLUSH_INTERVAL_SECS",
                DEFAULT_FLUSH_INTERVAL_SECS,
            )?),
            batch_size: env_or("BATCH_SIZE", DEFAULT_BATCH_SIZE)?.max(1),
            channel_capacity: env_or("CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY)?.max(1),
            retry: RetryPolicy {
                max_attempts: env_or("DB_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?.max(1),
                delay: Duration::from_secs(env_or(
                    "DB_RETRY_DELAY_SECS",
                    DEFAULT_RETRY_DELAY_SECS,
                )?),
            },
        })
    }

    /// Raw addresses of every configured sensor
    pub fn allowed_addresses(&self) -> Vec<MacAddress> {
        self.tags.iter().map(|tag| tag.address).collect()
    }

    /// Display name configured for a sensor, if any
    pub fn tag_name(&self, address: &MacAddress) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.address == *address)
            .and_then(|tag| tag.name.as_deref())
    }
}

/// Read a numeric environment variable, falling back to `default` when unset
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| format!("{} must be a number, got '{}'", key, value)),
        Err(_) => Ok(default),
    }
}

/// Parse a `MAC[=name]` comma-separated tag list
pub fn parse_tags(list: &str) -> Result<Vec<TagConfig>, MacAddressError> {
    let mut tags: Vec<TagConfig> = Vec::new();

    for pair in list.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let (mac, name) = match pair.split_once('=') {
            Some((mac, name)) => (mac, Some(name.trim())),
            None => (pair, None),
        };

        let address: MacAddress = mac.parse()?;
        let name = name.filter(|n| !n.is_empty()).map(str::to_string);
        debug!("Found MAC: '{}', Name: {:?}", address, name);

        if tags.iter().all(|tag| tag.address != address) {
            tags.push(TagConfig { address, name });
        }
    }

    Ok(tags)
}

/// Collect tags from `RUUVI_TAG_<N>_MAC` / `RUUVI_TAG_<N>_NAME` pairs
fn tags_from_vars(
    vars: impl Iterator<Item = (String, String)>,
) -> Result<Vec<TagConfig>, MacAddressError> {
    let vars: Vec<(String, String)> = vars.collect();
    let mut tags: Vec<TagConfig> = Vec::new();

    for (key, value) in &vars {
        if let Some(index) = key
            .strip_prefix("RUUVI_TAG_")
            .and_then(|s| s.strip_suffix("_MAC"))
        {
            let name_key = format!("RUUVI_TAG_{}_NAME", index);
            let name = vars
                .iter()
                .find(|(k, _)| *k == name_key)
                .map(|(_, v)| v.trim().to_string())
                .filter(|n| !n.is_empty());

            let address: MacAddress = value.parse()?;
            if tags.iter().all(|tag| tag.address != address) {
                tags.push(TagConfig { address, name });
            }
        }
    }

    tags.sort_by_key(|tag| tag.address.0);
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Iterator<Item = (String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn parses_tag_list_with_and_without_names() {
        let tags = parse_tags(" aa:bb:cc:dd:ee:ff = Sauna , 11:22:33:44:55:66,,").unwrap();
        assert_eq!(
            tags,
            vec![
                TagConfig {
                    address: MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
                    name: Some("Sauna".to_string()),
                },
                TagConfig {
                    address: MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
                    name: None,
                },
            ]
        );
    }

    #[test]
    fn duplicate_tags_keep_first_entry() {
        let tags = parse_tags("AA:BB:CC:DD:EE:FF=First,aa:bb:cc:dd:ee:ff=Second").unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name.as_deref(), Some("First"));
    }

    #[test]
    fn malformed_tag_address_is_an_error() {
        assert_eq!(
            parse_tags("AA:BB:CC=Kitchen"),
            Err(MacAddressError::OctetCount(3))
        );
        assert!(parse_tags("ZZ:BB:CC:DD:EE:FF").is_err());
    }

    #[test]
    fn empty_tag_list_yields_no_tags() {
        assert_eq!(parse_tags(""), Ok(vec![]));
        assert_eq!(parse_tags(" , "), Ok(vec![]));
    }

    #[test]
    fn individual_tag_variables_are_paired() {
        let tags = tags_from_vars(vars(&[
            ("RUUVI_TAG_2_MAC", "11:22:33:44:55:66"),
            ("PATH", "/usr/bin"),
            ("RUUVI_TAG_1_NAME", "Fridge"),
            ("RUUVI_TAG_1_MAC", "AA:BB:CC:DD:EE:FF"),
        ]))
        .unwrap();

        assert_eq!(
            tags,
            vec![
                TagConfig {
                    address: MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
                    name: None,
                },
                TagConfig {
                    address: MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
                    name: Some("Fridge".to_string()),
                },
            ]
        );
    }

    #[test]
    fn numeric_settings_fall_back_and_reject_garbage() {
        assert_eq!(env_or("RUUVITAG_GATEWAY_TEST_UNSET_ATTEMPTS", 2usize), Ok(2));

        env::set_var("RUUVITAG_GATEWAY_TEST_ATTEMPTS", " 5 ");
        assert_eq!(env_or("RUUVITAG_GATEWAY_TEST_ATTEMPTS", 2usize), Ok(5));

        env::set_var("RUUVITAG_GATEWAY_TEST_BAD_ATTEMPTS", "five");
        assert!(env_or("RUUVITAG_GATEWAY_TEST_BAD_ATTEMPTS", 2usize).is_err());
    }

    #[test]
    fn lookups_by_address() {
        let config = GatewayConfig {
            tags: parse_tags("AA:BB:CC:DD:EE:FF=Sauna,11:22:33:44:55:66").unwrap(),
            database_url: "postgres://localhost/sensors".to_string(),
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            retry: RetryPolicy {
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            },
        };

        assert_eq!(config.allowed_addresses().len(), 2);
        assert_eq!(
            config.tag_name(&MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])),
            Some("Sauna")
        );
        assert_eq!(
            config.tag_name(&MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66])),
            None
        );
        assert_eq!(config.tag_name(&MacAddress([0; 6])), None);
    }
}

use std::collections::HashMap;

/// Configuration consumed by the tunnel engine.
#[derive(Clone, Debug)]
pub struct Config {
    pub exploratory_inbound_length: usize,
    pub exploratory_outbound_length: usize,
    pub exploratory_inbound_quantity: usize,
    pub exploratory_outbound_quantity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            exploratory_inbound_length: 2,
            exploratory_outbound_length: 2,
            exploratory_inbound_quantity: 3,
            exploratory_outbound_quantity: 3,
        }
    }
}

impl Config {
    /// Reads the `exploratory.*` keys from a parsed configuration map,
    /// falling back to the defaults for anything absent or malformed.
    pub fn from_map(options: &HashMap<String, String>) -> Self {
        let defaults = Config::default();
        let get = |key: &str, fallback: usize| {
            options
                .get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback)
        };
        Config {
            exploratory_inbound_length: get(
                "exploratory.inbound.length",
                defaults.exploratory_inbound_length,
            ),
            exploratory_outbound_length: get(
                "exploratory.outbound.length",
                defaults.exploratory_outbound_length,
            ),
            exploratory_inbound_quantity: get(
                "exploratory.inbound.quantity",
                defaults.exploratory_inbound_quantity,
            ),
            exploratory_outbound_quantity: get(
                "exploratory.outbound.quantity",
                defaults.exploratory_outbound_quantity,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_map_reads_exploratory_keys() {
        let mut options = HashMap::new();
        options.insert("exploratory.inbound.length".to_string(), "3".to_string());
        options.insert("exploratory.outbound.quantity".to_string(), "5".to_string());
        options.insert("exploratory.inbound.quantity".to_string(), "bogus".to_string());

        let config = Config::from_map(&options);
        assert_eq!(config.exploratory_inbound_length, 3);
        assert_eq!(config.exploratory_outbound_length, 2);
        assert_eq!(config.exploratory_inbound_quantity, 3);
        assert_eq!(config.exploratory_outbound_quantity, 5);
    }
}

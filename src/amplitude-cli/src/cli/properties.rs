use amplitude_sdk::UserProperties;
use clap::Args;
use serde_json::Value;

/// Parses `key=value`. The value is taken as JSON if it parses as such, so
/// `n=3` is a number and `tags=["a"]` a list, and as a plain string
/// otherwise.
pub fn parse_property(input: &str) -> Result<(String, Value), String> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {input:?}"))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {input:?}"));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// User or group property operations given on the command line.
#[derive(Args, Debug, Default)]
pub struct PropertyOps {
    /// Set a property, as KEY=VALUE.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_property)]
    pub set: Vec<(String, Value)>,
    /// Set a property only if it has no value yet.
    #[arg(long = "set-once", value_name = "KEY=VALUE", value_parser = parse_property)]
    pub set_once: Vec<(String, Value)>,
    /// Add to a numeric property.
    #[arg(long = "add", value_name = "KEY=VALUE", value_parser = parse_property)]
    pub add: Vec<(String, Value)>,
    /// Append to a list property.
    #[arg(long = "append", value_name = "KEY=VALUE", value_parser = parse_property)]
    pub append: Vec<(String, Value)>,
    /// Prepend to a list property.
    #[arg(long = "prepend", value_name = "KEY=VALUE", value_parser = parse_property)]
    pub prepend: Vec<(String, Value)>,
    /// Remove a property.
    #[arg(long = "unset", value_name = "KEY")]
    pub unset: Vec<String>,
    /// Remove all properties.
    #[arg(long = "clear-all")]
    pub clear_all: bool,
}

impl PropertyOps {
    pub fn into_user_properties(self) -> UserProperties {
        let mut properties = UserProperties::new();
        for (key, value) in self.set {
            properties = properties.set(key, value);
        }
        for (key, value) in self.set_once {
            properties = properties.set_once(key, value);
        }
        for (key, value) in self.add {
            properties = properties.add(key, value);
        }
        for (key, value) in self.append {
            properties = properties.append(key, value);
        }
        for (key, value) in self.prepend {
            properties = properties.prepend(key, value);
        }
        for key in self.unset {
            properties = properties.unset(key);
        }
        if self.clear_all {
            properties = properties.clear_all();
        }
        properties
    }
}

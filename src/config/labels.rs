// Job Labels
//
// Key/value tags attached to submitted jobs. Connection labels and call labels
// are merged with the call winning on key conflicts.

use std::collections::BTreeMap;

use crate::common::types::MAX_LABEL_LENGTH;
use crate::config::error::{ConfigError, ConfigResult};

/// Ordered label map
pub type Labels = BTreeMap<String, String>;

fn is_label_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
}

fn label_error(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidLabel {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Check one label against the backend's key and value rules
pub fn validate_label(key: &str, value: &str) -> ConfigResult<()> {
    if key.is_empty() || key.chars().count() > MAX_LABEL_LENGTH {
        return Err(label_error(key, format!("key must be 1 to {} characters", MAX_LABEL_LENGTH)));
    }
    if !key.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(label_error(key, "key must start with a lowercase letter"));
    }
    if !key.chars().all(is_label_char) {
        return Err(label_error(key, "key may only contain lowercase letters, digits, '_' and '-'"));
    }
    if value.chars().count() > MAX_LABEL_LENGTH {
        return Err(label_error(key, format!("value must be at most {} characters", MAX_LABEL_LENGTH)));
    }
    if !value.chars().all(is_label_char) {
        return Err(label_error(key, "value may only contain lowercase letters, digits, '_' and '-'"));
    }
    Ok(())
}

pub fn validate_labels(labels: &Labels) -> ConfigResult<()> {
    labels.iter().try_for_each(|(key, value)| validate_label(key, value))
}

/// Parse `k=v,k2=v2`. Empty input yields no labels.
pub fn parse_labels(raw: &str) -> ConfigResult<Labels> {
    let mut labels = Labels::new();
    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::invalid("labels", raw, format!("'{}' is not a key=value pair", pair)))?;
        let (key, value) = (key.trim(), value.trim());
        validate_label(key, value)?;
        labels.insert(key.to_string(), value.to_string());
    }
    Ok(labels)
}

/// Connection labels overlaid with call labels
pub fn merge_labels(connection: &Labels, call: &Labels) -> Labels {
    let mut merged = connection.clone();
    merged.extend(call.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

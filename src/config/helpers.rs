use std::str::FromStr;

use crate::error::ConfigError;

/// Read an environment variable, treating empty values as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Parse an optional environment variable, falling back to `default`.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

/// Parse an inclusive `start-end` port range.
pub(crate) fn parse_port_range(key: &str, raw: &str) -> Result<(u16, u16), ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    };

    let (start, end) = raw
        .split_once('-')
        .ok_or_else(|| invalid(format!("expected 'start-end', got '{raw}'")))?;
    let start: u16 = start
        .trim()
        .parse()
        .map_err(|e| invalid(format!("bad range start: {e}")))?;
    let end: u16 = end
        .trim()
        .parse()
        .map_err(|e| invalid(format!("bad range end: {e}")))?;

    if start == 0 || start > end {
        return Err(invalid(format!("range {start}-{end} is empty or starts at 0")));
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_range() {
        assert_eq!(parse_port_range("K", "49152-49352").unwrap(), (49152, 49352));
        assert_eq!(parse_port_range("K", " 10 - 10 ").unwrap(), (10, 10));
    }

    #[test]
    fn test_parse_port_range_rejects_garbage() {
        assert!(parse_port_range("K", "49152").is_err());
        assert!(parse_port_range("K", "200-100").is_err());
        assert!(parse_port_range("K", "0-100").is_err());
        assert!(parse_port_range("K", "a-b").is_err());
    }
}

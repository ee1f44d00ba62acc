//! Server configuration: everything [`crate::engine::EngineConfig`],
//! [`crate::season::SeasonConfig`], and the (out-of-scope) transport and
//! backup network clients need, loaded from a small `key = value` file
//! rather than a crate pulled in just for this one format — the original
//! loaded sect born positions out of an XML file; this keeps the same
//! "hand-rolled parser over a heavyweight one" choice the teacher makes
//! for its own on-disk formats.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use thiserror::Error;

use crate::battlefield::TimeStamp;
use crate::geometry::{Pos, GRID_SIZE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected `key = value`, got {text:?}")]
    MalformedLine { line: usize, text: String },

    #[error("missing required key {0:?}")]
    MissingKey(&'static str),

    #[error("key {key:?} has invalid value {value:?}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything a running server needs besides the request traffic itself.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub bind_ip: IpAddr,
    pub bind_port: u16,
    pub backup_kv_ip: IpAddr,
    pub backup_kv_port: u16,
    pub lock_file_path: PathBuf,
    pub cache_ttl_ms: TimeStamp,
    pub recovery_mode: bool,
    pub daemonize: bool,
    pub born_positions: [Pos; 8],
    pub protection_window_ms: TimeStamp,
    pub season_reset_offset_hours: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let last = GRID_SIZE - 1;
        let mid = GRID_SIZE / 2;
        Self {
            data_dir: PathBuf::from("data"),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: 9000,
            backup_kv_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            backup_kv_port: 1978,
            lock_file_path: PathBuf::from("sectbattle.lock"),
            cache_ttl_ms: 60_000,
            recovery_mode: false,
            daemonize: false,
            born_positions: [
                Pos::new(0, 0),
                Pos::new(last, 0),
                Pos::new(0, last),
                Pos::new(last, last),
                Pos::new(mid, 0),
                Pos::new(mid, last),
                Pos::new(0, mid),
                Pos::new(last, mid),
            ],
            protection_window_ms: 30_000,
            season_reset_offset_hours: 26,
        }
    }
}

impl ServerConfig {
    /// Parses a `key = value` file, one setting per line, `#` starting a
    /// comment. Keys not present keep [`ServerConfig::default`]'s value;
    /// `born_positions` is the only key that must specify all 8 entries
    /// together, as `x0,y0;x1,y1;...;x7,y7`.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&text)
    }

    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        let mut raw = HashMap::new();
        for (line_number, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::MalformedLine {
                    line: line_number + 1,
                    text: trimmed.to_string(),
                });
            };
            raw.insert(key.trim().to_string(), value.trim().to_string());
        }

        let mut config = ServerConfig::default();
        if let Some(v) = raw.get("data_dir") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = raw.get("bind_ip") {
            config.bind_ip = parse_value("bind_ip", v)?;
        }
        if let Some(v) = raw.get("bind_port") {
            config.bind_port = parse_value("bind_port", v)?;
        }
        if let Some(v) = raw.get("backup_kv_ip") {
            config.backup_kv_ip = parse_value("backup_kv_ip", v)?;
        }
        if let Some(v) = raw.get("backup_kv_port") {
            config.backup_kv_port = parse_value("backup_kv_port", v)?;
        }
        if let Some(v) = raw.get("lock_file_path") {
            config.lock_file_path = PathBuf::from(v);
        }
        if let Some(v) = raw.get("cache_ttl_ms") {
            config.cache_ttl_ms = parse_value("cache_ttl_ms", v)?;
        }
        if let Some(v) = raw.get("recovery_mode") {
            config.recovery_mode = parse_value("recovery_mode", v)?;
        }
        if let Some(v) = raw.get("daemonize") {
            config.daemonize = parse_value("daemonize", v)?;
        }
        if let Some(v) = raw.get("protection_window_ms") {
            config.protection_window_ms = parse_value("protection_window_ms", v)?;
        }
        if let Some(v) = raw.get("season_reset_offset_hours") {
            config.season_reset_offset_hours = parse_value("season_reset_offset_hours", v)?;
        }
        if let Some(v) = raw.get("born_positions") {
            config.born_positions = parse_born_positions(v)?;
        }

        Ok(config)
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: format!("not a valid {}", std::any::type_name::<T>()),
    })
}

fn parse_born_positions(value: &str) -> Result<[Pos; 8], ConfigError> {
    let entries: Vec<&str> = value.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
    if entries.len() != 8 {
        return Err(ConfigError::InvalidValue {
            key: "born_positions",
            value: value.to_string(),
            reason: format!("expected 8 `x,y` pairs, got {}", entries.len()),
        });
    }

    let mut positions = [Pos::new(0, 0); 8];
    for (slot, entry) in positions.iter_mut().zip(entries) {
        let Some((x, y)) = entry.split_once(',') else {
            return Err(ConfigError::InvalidValue {
                key: "born_positions",
                value: value.to_string(),
                reason: format!("{entry:?} is not an `x,y` pair"),
            });
        };
        let x: i16 = parse_value("born_positions", x.trim())?;
        let y: i16 = parse_value("born_positions", y.trim())?;
        *slot = Pos::new(x, y);
    }
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_used_when_the_file_is_empty() {
        let config = ServerConfig::from_str("").unwrap();
        assert_eq!(config.bind_port, ServerConfig::default().bind_port);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "# a comment\n\nbind_port = 12345\n";
        let config = ServerConfig::from_str(text).unwrap();
        assert_eq!(config.bind_port, 12345);
    }

    #[test]
    fn malformed_line_is_rejected() {
        let err = ServerConfig::from_str("not-a-setting").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedLine { .. }));
    }

    #[test]
    fn born_positions_round_trip() {
        let text = "born_positions = 0,0;9,0;0,9;9,9;4,0;4,9;0,4;9,4";
        let config = ServerConfig::from_str(text).unwrap();
        assert_eq!(config.born_positions[0], Pos::new(0, 0));
        assert_eq!(config.born_positions[7], Pos::new(9, 4));
    }

    #[test]
    fn wrong_born_position_count_is_rejected() {
        let err = ServerConfig::from_str("born_positions = 0,0;1,1").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "born_positions", .. }));
    }
}

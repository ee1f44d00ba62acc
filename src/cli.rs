//! Command-line flags a `main.rs` would bind to an argv parser of its own
//! choosing. The struct and its defaults are the public surface; parsing
//! argv itself is out of scope (no CLI crate is pulled in for a binary
//! this crate doesn't ship).

use std::path::PathBuf;

/// Flags a server process accepts at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerArgs {
    /// Path to the `key = value` file [`crate::config::ServerConfig`] loads.
    pub config_path: PathBuf,

    /// Restore from the last backup generation before serving, rather than
    /// opening `data_dir` directly.
    pub recover: bool,

    /// Detach from the controlling terminal after startup.
    pub daemonize: bool,

    /// Override `data_dir` from the config file.
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("sectbattle.conf"),
            recover: false,
            daemonize: false,
            data_dir: None,
        }
    }
}

/// Parses a pre-split argv (excluding `argv[0]`) into [`ServerArgs`].
///
/// Recognised flags: `--config <path>`, `--recover`, `--daemonize`,
/// `--data-dir <path>`. Anything else is an error naming the offending
/// argument, leaving argv-splitting quirks (`--flag=value`, short flags,
/// `--`) to whatever full-featured parser an embedder's `main.rs` prefers.
pub fn parse_args<I, S>(args: I) -> Result<ServerArgs, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = ServerArgs::default();
    let mut iter = args.into_iter().map(|s| s.as_ref().to_string()).peekable();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter.next().ok_or("--config requires a path argument")?;
                parsed.config_path = PathBuf::from(value);
            }
            "--recover" => parsed.recover = true,
            "--daemonize" => parsed.daemonize = true,
            "--data-dir" => {
                let value = iter.next().ok_or("--data-dir requires a path argument")?;
                parsed.data_dir = Some(PathBuf::from(value));
            }
            other => return Err(format!("unrecognised argument: {other}")),
        }
    }

    Ok(parsed)
}

//! Errors from reading the demo service's TOML config

use std::path::PathBuf;

use thiserror::Error;

/// Why `Config::load` rejected a config file.
#[derive(Error, Debug)]
pub enum Error {
    /// A setting is missing or out of range, or the client secret file is unreadable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The config file itself could not be read.
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not TOML, or its `[server]`/`[auth]` tables do not deserialize.
    #[error("malformed config: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_setting_message() {
        let err = Error::Config("domain must start with http:// or https://".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: domain must start with http:// or https://"
        );
    }

    #[test]
    fn read_failure_names_the_file() {
        let err = Error::Read {
            path: PathBuf::from("/etc/ace-auth/demo.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(
            err.to_string(),
            "cannot read config file /etc/ace-auth/demo.toml: no such file"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn toml_errors_convert() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("[auth\ndomain = ");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Toml(_)), "got: {err:?}");
        assert!(err.to_string().starts_with("malformed config:"));
    }
}

//! Class path configuration.

use std::ffi::OsStr;

pub const DISABLE_CUSTOM_TABLE_ENV_VAR: &str = "VIRTUAL_CLASSPATH_DISABLE_CUSTOM_TABLE";
pub const VALIDATE_ENV_VAR: &str = "VIRTUAL_CLASSPATH_VALIDATE";
pub const DEVELOPMENT_ENV_VAR: &str = "VIRTUAL_CLASSPATH_DEVELOPMENT";
pub const MAX_SCANNERS_ENV_VAR: &str = "VIRTUAL_CLASSPATH_MAX_SCANNERS";

/// Default number of archive scanner threads a class path may run at once.
pub const DEFAULT_MAX_SCANNERS: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassPathConfig {
    /// Index paths with the custom hash table instead of a `DashMap`.
    ///
    /// The custom table stores far less per path, at the cost of briefly
    /// serializing writers while it grows.
    pub custom_table: bool,
    /// Recompute every lookup by asking each root in turn and fail hard if
    /// the index disagrees. Very slow, for development only.
    pub validate: bool,
    /// Directory roots are expected while developing, so adding one is not
    /// worth a warning.
    pub development: bool,
    /// Maximum number of concurrent archive scanner threads.
    pub max_scanners: usize,
}

impl Default for ClassPathConfig {
    fn default() -> Self {
        Self {
            custom_table: true,
            validate: false,
            development: false,
            max_scanners: DEFAULT_MAX_SCANNERS,
        }
    }
}

impl ClassPathConfig {
    /// Read the configuration from the `VIRTUAL_CLASSPATH_*` environment
    /// variables, falling back to the defaults for anything unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    pub(crate) fn from_lookup<F, V>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<V>,
        V: AsRef<OsStr>,
    {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| match lookup(key) {
            Some(value) => parse_flag(key, value.as_ref()).unwrap_or(default),
            None => default,
        };

        let max_scanners = match lookup(MAX_SCANNERS_ENV_VAR) {
            Some(value) => match value.as_ref().to_str().map(str::trim).map(str::parse::<usize>) {
                Some(Ok(count)) if count > 0 => count,
                _ => {
                    tracing::warn!(
                        key = MAX_SCANNERS_ENV_VAR,
                        value = ?value.as_ref(),
                        "Ignoring invalid scanner count, expected a positive integer"
                    );
                    defaults.max_scanners
                }
            },
            None => defaults.max_scanners,
        };

        Self {
            custom_table: !flag(DISABLE_CUSTOM_TABLE_ENV_VAR, !defaults.custom_table),
            validate: flag(VALIDATE_ENV_VAR, defaults.validate),
            development: flag(DEVELOPMENT_ENV_VAR, defaults.development),
            max_scanners,
        }
    }

    pub fn with_custom_table(mut self, custom_table: bool) -> Self {
        self.custom_table = custom_table;
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_development(mut self, development: bool) -> Self {
        self.development = development;
        self
    }

    pub fn with_max_scanners(mut self, max_scanners: usize) -> Self {
        self.max_scanners = max_scanners.max(1);
        self
    }
}

fn parse_flag(key: &str, value: &OsStr) -> Option<bool> {
    let parsed = value.to_str().and_then(|v| {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => None,
        }
    });
    if parsed.is_none() {
        tracing::warn!(key, value = ?value, "Ignoring invalid boolean flag");
    }
    parsed
}

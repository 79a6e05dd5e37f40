// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    fs::File,
    io::Read,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Global options. These apply to every task pool that is configured from the file.
mod global_config {
    pub const SECTION_NAME: &str = "coropool";
}

// Periodic maintenance options.
mod maintenance_config {
    pub const SECTION_NAME: &str = "maintenance";
    pub const ENABLED: &str = "enabled";
    pub const INTERVAL_NS: &str = "interval_ns";
    // Environment variables that override the file.
    pub const ENABLED_ENV: &str = "maintenance_enabled";
    pub const INTERVAL_NS_ENV: &str = "maintenance_interval_ns";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Task pool configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Common associated functions for the configuration object.
impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        let mut file: File = match File::open(config_path) {
            Ok(file) => file,
            Err(e) => {
                let cause: String = format!("cannot open configuration file {:?}: {:?}", config_path, e);
                error!("new(): {}", cause);
                return Err(Fail::new(libc::ENOENT, &cause));
            },
        };
        file.read_to_string(&mut config_s)?;
        config_s.parse()
    }

    fn get_maintenance_config(&self) -> Result<&Yaml, Fail> {
        let global: &Yaml = Self::get_subsection(&self.0, global_config::SECTION_NAME)?;
        Self::get_subsection(global, maintenance_config::SECTION_NAME)
    }

    /// Maintenance config: Reads the "enabled" parameter from the environment variable first and then the
    /// underlying configuration file.
    pub fn maintenance_enabled(&self) -> Result<bool, Fail> {
        if let Some(enabled) = Self::get_typed_env_option(maintenance_config::ENABLED_ENV)? {
            Ok(enabled)
        } else {
            Self::get_bool_option(self.get_maintenance_config()?, maintenance_config::ENABLED)
        }
    }

    /// Maintenance config: Reads the interval between two maintenance actions, in nanoseconds, from the environment
    /// variable first and then the underlying configuration file.
    pub fn maintenance_interval_ns(&self) -> Result<u64, Fail> {
        let interval_ns: u64 = if let Some(interval_ns) =
            Self::get_typed_env_option(maintenance_config::INTERVAL_NS_ENV)?
        {
            interval_ns
        } else {
            Self::get_int_option(self.get_maintenance_config()?, maintenance_config::INTERVAL_NS)?
        };

        if interval_ns == 0 {
            let message: String = format!("parameter \"{}\" must not be zero", maintenance_config::INTERVAL_NS);
            error!("maintenance_interval_ns(): {}", message);
            return Err(Fail::new(libc::EINVAL, message.as_str()));
        }
        Ok(interval_ns)
    }

    //======================================================================================================================
    // Static Functions
    //======================================================================================================================

    /// Similar to `get_typed_option` using `Yaml::as_hash` receiver. This method returns a `&Yaml` instead of
    /// yaml::Hash, and Yaml is more natural for indexing.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it exists and that the receiver returns Some(_).
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = Self::get_option(yaml, index)?;
        match receiver(option) {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Similar to `get_typed_option` using `Yaml::as_i64` as the receiver, but additionally verifies that the
    /// destination type may hold the i64 value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = Self::get_typed_option(yaml, index, &Yaml::as_i64)?;
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    /// Same as `Self::get_typed_option` using `Yaml::as_bool` as the receiver.
    fn get_bool_option(yaml: &Yaml, index: &str) -> Result<bool, Fail> {
        Self::get_typed_option(yaml, index, &Yaml::as_bool)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Parses a configuration from YAML text. Exactly one document is expected.
impl FromStr for Config {
    type Err = Fail;

    fn from_str(text: &str) -> Result<Self, Fail> {
        let documents: Vec<Yaml> = match YamlLoader::load_from_str(text) {
            Ok(documents) => documents,
            Err(e) => {
                let cause: String = format!("malformed configuration: {}", e);
                error!("from_str(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        match &documents[..] {
            [document] => Ok(Self(document.clone())),
            _ => Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

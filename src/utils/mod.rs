/// TOML configuration file and per-run limits.
pub mod toml_config;

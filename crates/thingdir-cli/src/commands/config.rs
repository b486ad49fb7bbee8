//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use thingdir_core::config::UserConfig;
use thingdir_core::{Config, Role};

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "instance_id, store_path, address, port, server_url, \
    flush_interval_secs, allow_anonymous, certificate_role, \
    trust_client_identity_header, discovery.enabled, \
    discovery.service_type, paging.default_limit, paging.max_limit, \
    users.<name>.password, users.<name>.role";

/// Show current configuration
///
/// Passwords are never printed.
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            let users: serde_json::Map<String, serde_json::Value> = config
                .users
                .iter()
                .map(|(name, user)| (name.clone(), serde_json::json!({ "role": user.role })))
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "instance_id": config.instance_id,
                    "store_path": config.store_path,
                    "address": config.address,
                    "port": config.port,
                    "server_url": config.server_url(),
                    "flush_interval_secs": config.flush_interval_secs,
                    "allow_anonymous": config.allow_anonymous,
                    "certificate_role": config.certificate_role,
                    "trust_client_identity_header": config.trust_client_identity_header,
                    "discovery": {
                        "enabled": config.discovery.enabled,
                        "service_type": config.discovery.service_type,
                    },
                    "paging": config.paging,
                    "users": users,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.store_path.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  instance_id:         {}", config.instance_id);
            println!("  store_path:          {}", config.store_path.display());
            println!("  listen:              {}", config.listen_address());
            println!("  server_url:          {}", config.server_url());
            println!(
                "  flush_interval_secs: {}",
                config
                    .flush_interval_secs
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "(on shutdown only)".to_string())
            );
            println!("  allow_anonymous:     {}", config.allow_anonymous);
            println!(
                "  certificate_role:    {}",
                config
                    .certificate_role
                    .map(role_name)
                    .unwrap_or("(not set)")
            );
            println!(
                "  trust_client_identity_header: {}",
                config.trust_client_identity_header
            );
            println!(
                "  discovery:           {} ({})",
                config.discovery.enabled, config.discovery.service_type
            );
            println!(
                "  paging:              default {}, max {}",
                config.paging.default_limit, config.paging.max_limit
            );
            if config.users.is_empty() {
                println!("  users:               (none)");
            } else {
                println!("  users:");
                for (name, user) in &config.users {
                    println!("    {} ({})", name, role_name(user.role));
                }
            }
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply_setting(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    let shown = if key.ends_with(".password") {
        "********"
    } else {
        value.as_str()
    };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "instance_id" => config.instance_id = value.to_string(),
        "store_path" => config.store_path = value.into(),
        "address" => config.address = value.to_string(),
        "port" => {
            config.port = value
                .parse()
                .with_context(|| format!("Invalid port: '{}'", value))?;
        }
        "server_url" => config.server_url = optional(value),
        "flush_interval_secs" => {
            config.flush_interval_secs = match optional(value) {
                None => None,
                Some(secs) => Some(
                    secs.parse()
                        .with_context(|| format!("Invalid flush interval: '{}'", secs))?,
                ),
            };
        }
        "allow_anonymous" => config.allow_anonymous = parse_bool(key, value)?,
        "certificate_role" => {
            config.certificate_role = match optional(value) {
                None => None,
                Some(role) => Some(parse_role(&role)?),
            };
        }
        "trust_client_identity_header" => {
            config.trust_client_identity_header = parse_bool(key, value)?
        }
        "discovery.enabled" => config.discovery.enabled = parse_bool(key, value)?,
        "discovery.service_type" => config.discovery.service_type = value.to_string(),
        "paging.default_limit" => config.paging.default_limit = parse_limit(value)?,
        "paging.max_limit" => config.paging.max_limit = parse_limit(value)?,
        _ => match key.strip_prefix("users.").and_then(|k| k.rsplit_once('.')) {
            Some((name, field)) if !name.is_empty() => set_user(config, name, field, value)?,
            _ => bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            ),
        },
    }
    Ok(())
}

fn set_user(config: &mut Config, name: &str, field: &str, value: &str) -> Result<()> {
    match field {
        "password" => {
            if value.is_empty() || value == "none" {
                config.users.remove(name);
                return Ok(());
            }
            config
                .users
                .entry(name.to_string())
                .and_modify(|user| user.password = value.to_string())
                .or_insert_with(|| UserConfig {
                    password: value.to_string(),
                    role: Role::Viewer,
                });
        }
        "role" => {
            let role = parse_role(value)?;
            let Some(user) = config.users.get_mut(name) else {
                bail!(
                    "No user '{}'. Set users.{}.password first.",
                    name,
                    name
                );
            };
            user.role = role;
        }
        _ => bail!(
            "Unknown user setting: '{}'. Use users.<name>.password or users.<name>.role",
            field
        ),
    }
    Ok(())
}

/// Empty and "none" clear optional settings
fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .parse()
        .with_context(|| format!("Invalid value for {}. Use 'true' or 'false'.", key))
}

fn parse_limit(value: &str) -> Result<usize> {
    let limit: usize = value
        .parse()
        .with_context(|| format!("Invalid limit: '{}'", value))?;
    if limit == 0 {
        bail!("Limits must be at least 1");
    }
    Ok(limit)
}

fn parse_role(value: &str) -> Result<Role> {
    match value {
        "viewer" => Ok(Role::Viewer),
        "editor" => Ok(Role::Editor),
        _ => bail!("Invalid role: '{}'. Use 'viewer' or 'editor'.", value),
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Viewer => "viewer",
        Role::Editor => "editor",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_scalar_settings() {
        let mut config = Config::default();

        apply_setting(&mut config, "port", "9000").unwrap();
        apply_setting(&mut config, "store_path", "/srv/things.json").unwrap();
        apply_setting(&mut config, "allow_anonymous", "true").unwrap();
        apply_setting(&mut config, "flush_interval_secs", "30").unwrap();
        apply_setting(&mut config, "discovery.enabled", "true").unwrap();
        apply_setting(&mut config, "paging.max_limit", "50").unwrap();
        apply_setting(&mut config, "trust_client_identity_header", "true").unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.store_path, PathBuf::from("/srv/things.json"));
        assert!(config.allow_anonymous);
        assert_eq!(config.flush_interval_secs, Some(30));
        assert!(config.discovery.enabled);
        assert_eq!(config.paging.max_limit, 50);
        assert!(config.trust_client_identity_header);

        apply_setting(&mut config, "flush_interval_secs", "none").unwrap();
        assert_eq!(config.flush_interval_secs, None);
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut config = Config::default();
        assert!(apply_setting(&mut config, "port", "http").is_err());
        assert!(apply_setting(&mut config, "allow_anonymous", "yes").is_err());
        assert!(apply_setting(&mut config, "paging.default_limit", "0").is_err());
        assert!(apply_setting(&mut config, "certificate_role", "admin").is_err());

        let err = apply_setting(&mut config, "colour", "blue").unwrap_err();
        assert!(err.to_string().contains("Valid keys"));
    }

    #[test]
    fn test_apply_user_settings() {
        let mut config = Config::default();

        // Role needs an existing user
        assert!(apply_setting(&mut config, "users.alice.role", "editor").is_err());

        apply_setting(&mut config, "users.alice.password", "secret").unwrap();
        assert_eq!(config.users["alice"].role, Role::Viewer);

        apply_setting(&mut config, "users.alice.role", "editor").unwrap();
        apply_setting(&mut config, "users.alice.password", "changed").unwrap();
        assert_eq!(config.users["alice"].role, Role::Editor);
        assert_eq!(config.users["alice"].password, "changed");

        assert!(apply_setting(&mut config, "users.alice.email", "a@b").is_err());

        apply_setting(&mut config, "users.alice.password", "none").unwrap();
        assert!(config.users.is_empty());
    }

    #[test]
    fn test_set_saves_to_given_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        set("port".into(), "9100".into(), Some(&path), &output).unwrap();
        set(
            "users.bob.password".into(),
            "hunter2".into(),
            Some(&path),
            &output,
        )
        .unwrap();

        let saved = Config::load_from_path(&path).unwrap();
        assert_eq!(saved.port, 9100);
        assert_eq!(saved.users["bob"].password, "hunter2");
    }
}

/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */

use std::path::{Path, PathBuf};

use ini::{EscapePolicy, Ini, ParseOption};

use crate::ConfigArgs;
use crate::error::{FlickrdError, Result};

const SECTION: &str = "flickrd";
const PLACEHOLDER_API_KEY: &str = "your_api_key";
const PLACEHOLDER_SECRET_KEY: &str = "your_secret_key";

/// Settings from `flickrd.ini`, possibly overridden on the command line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Config {
    pub(crate) api_key: String,
    pub(crate) secret_key: String,
    pub(crate) download_dir: PathBuf,
    pub(crate) naming_rule: String,
    pub(crate) subdir_rule: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: PLACEHOLDER_API_KEY.to_string(),
            secret_key: PLACEHOLDER_SECRET_KEY.to_string(),
            download_dir: PathBuf::from("flickr_photos"),
            naming_rule: "YYYY-MM-DD_hhmmss(camera)".to_string(),
            subdir_rule: String::new(),
        }
    }
}

impl Config {
    /// Reads the config file, creating it with placeholder values if absent.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file {} not found. Creating it with placeholder values.",
                path.display()
            );
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }

        // Values are paths and templates, so a backslash is just a character
        let option = ParseOption {
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_file_opt(path, option).map_err(|e| {
            FlickrdError::Config(format!(
                "Config file {} could not be read: {}",
                path.display(),
                e
            ))
        })?;

        let mut config = Config::default();
        match ini.section(Some(SECTION)) {
            Some(props) => {
                if let Some(v) = props.get("api_key") {
                    config.api_key = v.trim().to_string();
                }
                if let Some(v) = props.get("secret_key") {
                    config.secret_key = v.trim().to_string();
                }
                if let Some(v) = props.get("download_dir").filter(|v| !v.trim().is_empty()) {
                    config.download_dir = PathBuf::from(v.trim());
                }
                if let Some(v) = props.get("naming_rule").filter(|v| !v.trim().is_empty()) {
                    config.naming_rule = v.trim().to_string();
                }
                if let Some(v) = props.get("subdir_rule") {
                    config.subdir_rule = v.trim().to_string();
                }
            }
            None => log::warn!(
                "Config file {} has no [{}] section. Ignoring it.",
                path.display(),
                SECTION
            ),
        }
        Ok(config)
    }

    /// Writes the config back so options given once need not be repeated.
    pub(crate) fn save(&self, path: &Path) -> Result<()> {
        let mut ini = Ini::new();
        ini.with_section(Some(SECTION))
            .set("api_key", self.api_key.as_str())
            .set("secret_key", self.secret_key.as_str())
            .set("download_dir", self.download_dir.to_string_lossy())
            .set("naming_rule", self.naming_rule.as_str())
            .set("subdir_rule", self.subdir_rule.as_str());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| FlickrdError::filesystem(parent, e))?;
        }
        log::debug!("Writing config file {}", path.display());
        ini.write_to_file_policy(path, EscapePolicy::Nothing)
            .map_err(|e| FlickrdError::filesystem(path, e))
    }

    /// Command line values take precedence over the file.
    pub(crate) fn apply(&mut self, args: &ConfigArgs) {
        if let Some(v) = &args.api_key {
            self.api_key = v.clone();
        }
        if let Some(v) = &args.secret_key {
            self.secret_key = v.clone();
        }
        if let Some(v) = &args.download_dir {
            self.download_dir = PathBuf::from(v);
        }
        if let Some(v) = &args.naming_rule {
            self.naming_rule = v.clone();
        }
        if let Some(v) = &args.subdir_rule {
            self.subdir_rule = v.clone();
        }
    }

    /// Checks the values needed to talk to Flickr.
    pub(crate) fn validate(&self, path: &Path) -> Result<()> {
        let missing = |v: &str, placeholder: &str| v.is_empty() || v == placeholder;
        if missing(&self.api_key, PLACEHOLDER_API_KEY)
            || missing(&self.secret_key, PLACEHOLDER_SECRET_KEY)
        {
            return Err(FlickrdError::Config(format!(
                "api_key and secret_key are required. Set them in {} (or pass -k/-s) and run again.",
                path.display()
            )));
        }
        if self.naming_rule.trim().is_empty() {
            return Err(FlickrdError::Config(format!(
                "naming_rule must not be empty. Fix it in {} and run again.",
                path.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ConfigArgs {
        ConfigArgs {
            api_key: None,
            secret_key: None,
            download_dir: None,
            naming_rule: None,
            subdir_rule: None,
        }
    }

    #[test]
    fn creates_file_with_placeholders() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flickrd.ini");

        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[flickrd]"));
        assert!(content.contains("api_key=your_api_key"));

        let err = config.validate(&path).unwrap_err();
        assert!(matches!(err, FlickrdError::Config(_)));
    }

    #[test]
    fn reads_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flickrd.ini");
        std::fs::write(
            &path,
            "[flickrd]\napi_key = abc\nsecret_key = def\ndownload_dir = /tmp/photos\nnaming_rule = YYYYMMDD_photo_id\nsubdir_rule = YYYY/MM\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api_key, "abc");
        assert_eq!(config.secret_key, "def");
        assert_eq!(config.download_dir, PathBuf::from("/tmp/photos"));
        assert_eq!(config.naming_rule, "YYYYMMDD_photo_id");
        assert_eq!(config.subdir_rule, "YYYY/MM");
        assert!(config.validate(&path).is_ok());
    }

    #[test]
    fn command_line_overrides_are_saved() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flickrd.ini");

        let mut config = Config::load(&path).unwrap();
        let mut overrides = args();
        overrides.api_key = Some("key".to_string());
        overrides.secret_key = Some("secret".to_string());
        overrides.subdir_rule = Some("YYYY".to_string());
        config.apply(&overrides);
        config.save(&path).unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.api_key, "key");
        assert_eq!(reloaded.secret_key, "secret");
        assert_eq!(reloaded.subdir_rule, "YYYY");
        assert_eq!(reloaded.naming_rule, "YYYY-MM-DD_hhmmss(camera)");
    }

    #[test]
    fn missing_section_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flickrd.ini");
        std::fs::write(&path, "[other]\napi_key = abc\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn backslashes_are_kept_literally() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flickrd.ini");
        std::fs::write(
            &path,
            "[flickrd]\napi_key = abc\nsecret_key = def\ndownload_dir = C:\\temp\\photos\nsubdir_rule = YYYY\\MM\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.download_dir, PathBuf::from(r"C:\temp\photos"));
        assert_eq!(config.subdir_rule, r"YYYY\MM");

        config.save(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(r"download_dir=C:\temp\photos"));
        assert!(!content.contains(r"\\"));

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded, config);
    }
}

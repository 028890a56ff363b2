// Resolved settings
// Precedence per value: environment (including .env) > config file > default.
// CLI flags are applied on top by the binary.

use std::path::PathBuf;

use crate::file::FileConfig;
use crate::ConfigError;

pub const DEFAULT_KNOWLARITY_URL: &str = "https://kpi.knowlarity.com/Basic/v1/account/calllog";
pub const DEFAULT_KNOWLARITY_CHANNEL: &str = "Basic";
pub const DEFAULT_LOOKBACK_MINUTES: i64 = 15;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_GRAPH_VERSION: &str = "v20.0";
pub const DEFAULT_GRAPH_BASE: &str = "https://graph.facebook.com";

#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub knowlarity: KnowlaritySettings,
    pub meta: MetaSettings,
}

#[derive(Debug, Clone)]
pub struct KnowlaritySettings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub channel: String,
    pub lookback_minutes: i64,
    pub page_size: u32,
}

/// Credentials the Knowlarity adapter cannot run without.
#[derive(Debug, Clone)]
pub struct KnowlarityCredentials {
    pub api_key: String,
    pub auth_token: String,
}

impl KnowlaritySettings {
    pub fn credentials(&self) -> Result<KnowlarityCredentials, ConfigError> {
        match (&self.api_key, &self.auth_token) {
            (Some(api_key), Some(auth_token)) => Ok(KnowlarityCredentials {
                api_key: api_key.clone(),
                auth_token: auth_token.clone(),
            }),
            (key, token) => {
                let mut vars = Vec::new();
                if key.is_none() {
                    vars.push("KNOWLARITY_API_KEY");
                }
                if token.is_none() {
                    vars.push("KNOWLARITY_AUTH_TOKEN");
                }
                Err(ConfigError::Missing {
                    pipeline: "knowlarity",
                    vars,
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetaSettings {
    pub graph_version: String,
    pub api_base: String,
    pub page_id: Option<String>,
    pub access_token: Option<String>,
    /// Default form ids, unfiltered. The sync command validates them.
    pub default_form_ids: Vec<String>,
    pub min_created_at: Option<String>,
    pub since_override: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MetaCredentials {
    pub page_id: String,
    pub access_token: String,
}

impl MetaSettings {
    /// Graph endpoint root including the version segment.
    pub fn graph_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            self.graph_version.trim_matches('/')
        )
    }

    pub fn credentials(&self) -> Result<MetaCredentials, ConfigError> {
        match (&self.page_id, &self.access_token) {
            (Some(page_id), Some(access_token)) => Ok(MetaCredentials {
                page_id: page_id.clone(),
                access_token: access_token.clone(),
            }),
            (page, token) => {
                let mut vars = Vec::new();
                if page.is_none() {
                    vars.push("META_PAGE_ID");
                }
                if token.is_none() {
                    vars.push("META_PAGE_ACCESS_TOKEN");
                }
                Err(ConfigError::Missing {
                    pipeline: "meta",
                    vars,
                })
            }
        }
    }
}

impl Settings {
    /// Load `.env`, the config file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        crate::dotenv::load();
        let path = config_path(|k| std::env::var(k).ok());
        let file = FileConfig::load(&path)?;
        Self::resolve(|k| std::env::var(k).ok(), file)
    }

    /// Merge an environment lookup over a parsed config file.
    ///
    /// Values are whitespace-trimmed and an empty value counts as unset, so
    /// `META_PAGE_ID=" "` falls through to the file or the default.
    pub fn resolve(
        env: impl Fn(&str) -> Option<String>,
        file: FileConfig,
    ) -> Result<Self, ConfigError> {
        let var = |k: &str| env(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let clean = |v: Option<String>| v.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let db_path = var("LEADSYNC_DB")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(default_db_path);

        let k = file.knowlarity;
        let knowlarity = KnowlaritySettings {
            api_url: var("KNOWLARITY_API_URL")
                .or(clean(k.api_url))
                .unwrap_or_else(|| DEFAULT_KNOWLARITY_URL.to_string()),
            api_key: var("KNOWLARITY_API_KEY").or(clean(k.api_key)),
            auth_token: var("KNOWLARITY_AUTH_TOKEN").or(clean(k.auth_token)),
            channel: var("KNOWLARITY_CHANNEL")
                .or(clean(k.channel))
                .unwrap_or_else(|| DEFAULT_KNOWLARITY_CHANNEL.to_string()),
            lookback_minutes: match var("KNOWLARITY_SYNC_LOOKBACK_MINUTES") {
                Some(raw) => parse_number("KNOWLARITY_SYNC_LOOKBACK_MINUTES", &raw)?,
                None => k.lookback_minutes.unwrap_or(DEFAULT_LOOKBACK_MINUTES),
            },
            page_size: match var("KNOWLARITY_SYNC_PAGE_SIZE") {
                Some(raw) => parse_number("KNOWLARITY_SYNC_PAGE_SIZE", &raw)?,
                None => k.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            },
        };
        if knowlarity.lookback_minutes <= 0 {
            return Err(ConfigError::Invalid {
                key: "KNOWLARITY_SYNC_LOOKBACK_MINUTES",
                value: knowlarity.lookback_minutes.to_string(),
                reason: "must be positive".into(),
            });
        }
        if knowlarity.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "KNOWLARITY_SYNC_PAGE_SIZE",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        let m = file.meta;
        let default_form_ids = match var("META_FORM_IDS_DEFAULT") {
            Some(raw) => raw.split(',').map(str::to_string).collect(),
            None => m.form_ids,
        };
        let meta = MetaSettings {
            graph_version: var("META_GRAPH_VERSION")
                .or(clean(m.graph_version))
                .unwrap_or_else(|| DEFAULT_GRAPH_VERSION.to_string()),
            api_base: var("META_API_BASE")
                .or(clean(m.api_base))
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE.to_string()),
            page_id: var("META_PAGE_ID").or(clean(m.page_id)),
            access_token: var("META_PAGE_ACCESS_TOKEN").or(clean(m.access_token)),
            default_form_ids,
            min_created_at: var("META_MIN_CREATED_AT").or(clean(m.min_created_at)),
            since_override: var("META_SYNC_SINCE_OVERRIDE"),
        };

        Ok(Self {
            db_path,
            knowlarity,
            meta,
        })
    }
}

/// Config file location: `LEADSYNC_CONFIG` or the per-user default.
pub fn config_path(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    env("LEADSYNC_CONFIG")
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(FileConfig::default_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("leadsync")
        .join("leads.db")
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply() {
        let s = Settings::resolve(env(&[]), FileConfig::default()).unwrap();
        assert_eq!(s.knowlarity.api_url, DEFAULT_KNOWLARITY_URL);
        assert_eq!(s.knowlarity.channel, "Basic");
        assert_eq!(s.knowlarity.lookback_minutes, 15);
        assert_eq!(s.knowlarity.page_size, 100);
        assert_eq!(s.meta.graph_url(), "https://graph.facebook.com/v20.0");
        assert!(s.db_path.ends_with("leadsync/leads.db"));
    }

    #[test]
    fn env_beats_file() {
        let file = FileConfig::parse(
            Path::new("c.toml"),
            "[knowlarity]\nchannel = \"FromFile\"\napi_key = \"file-key\"\n",
        )
        .unwrap();
        let s = Settings::resolve(env(&[("KNOWLARITY_CHANNEL", "FromEnv")]), file).unwrap();
        assert_eq!(s.knowlarity.channel, "FromEnv");
        assert_eq!(s.knowlarity.api_key.as_deref(), Some("file-key"));
    }

    #[test]
    fn blank_values_are_unset() {
        let s = Settings::resolve(
            env(&[("META_PAGE_ID", "  "), ("META_PAGE_ACCESS_TOKEN", " tok \n")]),
            FileConfig::default(),
        )
        .unwrap();
        assert_eq!(s.meta.page_id, None);
        assert_eq!(s.meta.access_token.as_deref(), Some("tok"));
    }

    #[test]
    fn missing_credentials_list_every_var() {
        let s = Settings::resolve(env(&[]), FileConfig::default()).unwrap();
        let err = s.knowlarity.credentials().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("KNOWLARITY_API_KEY"), "{msg}");
        assert!(msg.contains("KNOWLARITY_AUTH_TOKEN"), "{msg}");

        let s = Settings::resolve(env(&[("META_PAGE_ID", "123")]), FileConfig::default()).unwrap();
        match s.meta.credentials().unwrap_err() {
            ConfigError::Missing { pipeline, vars } => {
                assert_eq!(pipeline, "meta");
                assert_eq!(vars, vec!["META_PAGE_ACCESS_TOKEN"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_numbers_are_invalid() {
        let err = Settings::resolve(
            env(&[("KNOWLARITY_SYNC_PAGE_SIZE", "lots")]),
            FileConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "KNOWLARITY_SYNC_PAGE_SIZE", .. }));

        let err = Settings::resolve(
            env(&[("KNOWLARITY_SYNC_LOOKBACK_MINUTES", "-5")]),
            FileConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn env_form_ids_replace_file_list() {
        let file = FileConfig::parse(Path::new("c.toml"), "[meta]\nform_ids = [\"1\"]\n").unwrap();
        let s = Settings::resolve(env(&[("META_FORM_IDS_DEFAULT", "22, 33,")]), file).unwrap();
        assert_eq!(s.meta.default_form_ids, vec!["22", " 33", ""]);
    }

    #[test]
    fn config_path_override() {
        assert_eq!(
            config_path(env(&[("LEADSYNC_CONFIG", "/tmp/x.toml")])),
            PathBuf::from("/tmp/x.toml")
        );
        assert!(config_path(env(&[])).ends_with("leadsync/config.toml"));
    }
}

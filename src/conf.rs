use std::{
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, LazyLock},
    time::Duration,
};

use anyhow::Context;

pub static GLOBAL: LazyLock<Arc<Conf>> = LazyLock::new(|| {
    let conf = read_or_create_default().unwrap_or_else(|error| {
        panic!("Failed to initialize global config: {error:?}")
    });
    Arc::new(conf)
});

#[must_use]
pub fn global() -> Arc<Conf> {
    (*GLOBAL).clone()
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct Conf {
    #[serde(
        serialize_with = "serialize_log_level",
        deserialize_with = "deserialize_log_level"
    )]
    pub log_level: tracing::Level,
    pub addr: IpAddr,
    pub port: u16,

    /// Root of the Scratch REST API, without a trailing path.
    pub api_base_url: String,

    /// Seconds.
    pub request_timeout: f32,

    pub page_size: usize,
    pub max_projects: usize,

    /// Seconds a summary stays fresh in the cache.
    pub cache_ttl: f32,
    pub cache_capacity: Option<usize>,

    pub tls: Option<Tls>,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            addr: "127.0.0.1".parse().unwrap_or_else(|_| {
                unreachable!("Fat-fingered default IP address!")
            }),
            port: 3001,
            api_base_url: "https://api.scratch.mit.edu".to_string(),
            request_timeout: 10.0,
            page_size: 100,
            max_projects: 1000,
            cache_ttl: 300.0,
            cache_capacity: Some(10_000),
            tls: None,
        }
    }
}

impl Conf {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, secs) in [
            ("request_timeout", self.request_timeout),
            ("cache_ttl", self.cache_ttl),
        ] {
            anyhow::ensure!(
                Duration::try_from_secs_f32(secs).is_ok(),
                "{name} must be a non-negative number of seconds, \
                got {secs}"
            );
        }
        anyhow::ensure!(self.page_size > 0, "page_size must be positive");
        anyhow::ensure!(
            self.cache_capacity != Some(0),
            "cache_capacity must be positive, or omitted for no bound"
        );
        Ok(())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.request_timeout)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs_f32(self.cache_ttl)
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct Tls {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

fn serialize_log_level<S>(
    level: &tracing::Level,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let s = level.to_string();
    serializer.serialize_str(&s)
}

fn deserialize_log_level<'de, D>(
    deserializer: D,
) -> Result<tracing::Level, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    let s = String::deserialize(deserializer)?;
    tracing::Level::from_str(&s).map_err(serde::de::Error::custom)
}

pub fn read_or_create_default() -> anyhow::Result<Conf> {
    let path = "conf/conf.toml";
    read_or_create_default_(path).context(path)
}

pub fn read_or_create_default_<P: AsRef<Path>>(
    path: P,
) -> anyhow::Result<Conf> {
    let path = path.as_ref();
    let conf = if fs::exists(path)? {
        let s = fs::read_to_string(path)?;
        let conf: Conf = toml::from_str(&s)?;
        conf.validate()?;
        conf
    } else {
        if let Some(parent) = path.parent() {
            let ctx = format!(
                "Failed to create parent directory \
                for conf file: {path:?}"
            );
            fs::create_dir_all(parent).context(ctx)?;
        }
        let conf = Conf::default();
        let s = toml::to_string_pretty(&conf)?;
        fs::write(path, s)?;
        conf
    };
    Ok(conf)
}

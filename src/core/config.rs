use std::path::PathBuf;

// ---------------------------------------------------------------------------
// AppConfig: file-based config loader (shelf-scout.json) with env-var fallback
// ---------------------------------------------------------------------------

/// Upstream proxy descriptor. The username is templated per worker so each
/// persistent session exits through a sticky residential IP.
#[derive(serde::Deserialize, Clone, Debug)]
pub struct ProxyConfig {
    pub server: String,
    pub username: String,
    pub password: String,
    /// Optional geo pin, e.g. `"us"`. Appended to the session username.
    pub country_code: Option<String>,
}

impl ProxyConfig {
    /// Build the per-session proxy username for a worker.
    ///
    /// `user-session-worker3-country-us`: the session token keeps one
    /// worker's traffic pinned to one egress IP.
    pub fn session_username(&self, worker_index: usize) -> String {
        let mut username = format!("{}-session-worker{}", self.username, worker_index);
        if let Some(cc) = &self.country_code {
            if !cc.trim().is_empty() {
                username.push_str(&format!("-country-{}", cc));
            }
        }
        username
    }

    /// Credential pair for answering the proxy's auth challenges, or `None`
    /// for an unauthenticated proxy (no password configured).
    pub fn credentials(&self, worker_index: usize) -> Option<(String, String)> {
        if self.password.trim().is_empty() {
            None
        } else {
            Some((self.session_username(worker_index), self.password.clone()))
        }
    }
}

/// Raw on-disk shape of `shelf-scout.json`. Everything optional; resolution
/// order is JSON field → env var → built-in default.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct RawConfig {
    pub headless: Option<bool>,
    pub amazon_concurrency: Option<usize>,
    pub walmart_concurrency: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub profiles_root: Option<String>,
    pub work_list: Option<String>,
    pub output_csv: Option<String>,
    pub error_log: Option<String>,
    pub proxy: Option<ProxyConfig>,
}

/// Fully-resolved runtime configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub headless: bool,
    /// Bound for the per-item ephemeral-browser queue.
    pub amazon_concurrency: usize,
    /// Bound for concurrent persistent-session batches. Kept low by
    /// default: this source is far less tolerant of automated traffic.
    pub walmart_concurrency: usize,
    /// Items served sequentially by one persistent session.
    pub batch_size: usize,
    pub max_retries: u32,
    pub profiles_root: PathBuf,
    pub work_list: PathBuf,
    pub output_csv: PathBuf,
    pub error_log: PathBuf,
    pub proxy: Option<ProxyConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().resolve()
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    let v = std::env::var(key).ok()?;
    let v = v.trim().to_ascii_lowercase();
    if v.is_empty() {
        return None;
    }
    Some(!matches!(v.as_str(), "0" | "false" | "no" | "off"))
}

impl RawConfig {
    pub fn resolve(self) -> AppConfig {
        AppConfig {
            headless: self
                .headless
                .or_else(|| env_bool("SHELF_SCOUT_HEADLESS"))
                .unwrap_or(true),
            amazon_concurrency: self
                .amazon_concurrency
                .or_else(|| env_usize("SHELF_SCOUT_AMAZON_CONCURRENCY"))
                .unwrap_or(2)
                .max(1),
            walmart_concurrency: self
                .walmart_concurrency
                .or_else(|| env_usize("SHELF_SCOUT_WALMART_CONCURRENCY"))
                .unwrap_or(1)
                .max(1),
            batch_size: self
                .batch_size
                .or_else(|| env_usize("SHELF_SCOUT_BATCH_SIZE"))
                .unwrap_or(4)
                .max(1),
            max_retries: self
                .max_retries
                .or_else(|| env_usize("SHELF_SCOUT_MAX_RETRIES").map(|v| v as u32))
                .unwrap_or(2)
                .max(1),
            profiles_root: PathBuf::from(self.profiles_root.unwrap_or_else(|| "profiles".into())),
            work_list: PathBuf::from(self.work_list.unwrap_or_else(|| "skus.json".into())),
            output_csv: PathBuf::from(self.output_csv.unwrap_or_else(|| "product_data.csv".into())),
            error_log: PathBuf::from(self.error_log.unwrap_or_else(|| "errors.log".into())),
            proxy: self.proxy,
        }
    }
}

/// Load `shelf-scout.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `SHELF_SCOUT_CONFIG` env var path
/// 2. `./shelf-scout.json`  (process cwd)
///
/// Missing file → defaults (all env-var fallbacks apply).
/// Parse error → log a warning, return defaults.
pub fn load_config() -> AppConfig {
    let mut candidates = vec![PathBuf::from("shelf-scout.json")];
    if let Ok(env_path) = std::env::var("SHELF_SCOUT_CONFIG") {
        candidates.insert(0, PathBuf::from(env_path));
    }

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    tracing::info!("shelf-scout.json loaded from {}", path.display());
                    return raw.resolve();
                }
                Err(e) => {
                    tracing::warn!(
                        "shelf-scout.json parse error at {}: {}, using defaults",
                        path.display(),
                        e
                    );
                    return AppConfig::default();
                }
            },
            Err(_) => continue, // not found at this path, try next
        }
    }

    AppConfig::default()
}

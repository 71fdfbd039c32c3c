//! Worker session lifecycle: persistent browser profiles, stale-lock
//! eviction, launch retry, and reset-on-fatal-failure.
//!
//! Invariants owned here:
//! * a profile directory is opened by at most one live session at a time;
//!   generation-unique paths plus whole-directory lock eviction enforce it;
//! * generation counters only ever increase per worker index, so a reset
//!   never reuses a possibly-corrupt directory.

pub mod identity;
pub mod warmer;

use anyhow::anyhow;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EventAuthRequired, EventRequestPaused,
};
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::ProxyConfig;
use crate::core::errors::ScrapeError;
use crate::stealth;
use identity::Identity;

/// Launch attempts before giving up on a session.
const MAX_LAUNCH_ATTEMPTS: u32 = 3;
/// Pause between launch attempts and between cleanup retries.
const RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Artifacts left behind by a crashed or still-running Chromium that make a
/// profile directory unsafe to reopen.
pub const LOCK_ARTIFACTS: &[&str] = &[
    "SingletonLock",
    "SingletonSocket",
    "SingletonCookie",
    "lockfile",
    "CrashpadMetrics-active.pma",
    "BrowserMetrics-spare.pma",
];

/// Find a usable Chromium-family browser executable.
///
/// Resolution order: `CHROME_EXECUTABLE` env override → PATH scan →
/// OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/brave-browser",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Profile path for `(worker_index, generation)`.
pub fn profile_dir(root: &Path, worker_index: usize, generation: u64) -> PathBuf {
    root.join(format!("worker_{}_{}", worker_index, generation))
}

/// Scan `dir` for known lock artifacts; when any is present, delete the
/// **entire** directory. A half-cleaned profile can still deadlock a new
/// launch, so partial cleanup is never attempted.
///
/// Returns `true` when the directory was evicted.
pub fn evict_stale_locks(dir: &Path) -> std::io::Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }

    let found: Vec<&str> = LOCK_ARTIFACTS
        .iter()
        .copied()
        .filter(|name| dir.join(name).exists())
        .collect();

    if found.is_empty() {
        debug!("session: no stale locks in {}", dir.display());
        return Ok(false);
    }

    warn!(
        "session: stale locks in {} ({}), evicting whole directory",
        dir.display(),
        found.join(", ")
    );
    std::fs::remove_dir_all(dir)?;
    Ok(true)
}

/// A persistent automated browser bound to one on-disk profile.
/// Exclusively owns its browser context; never shared across tasks.
pub struct WorkerSession {
    pub worker_index: usize,
    pub generation: u64,
    pub profile_dir: PathBuf,
    pub identity: &'static Identity,
    pub page: Page,
    browser: Browser,
    handler_task: JoinHandle<()>,
}

/// A throwaway browser with no persistent profile, for sources where a
/// fresh instance per item draws less attention than a reused one.
pub struct EphemeralBrowser {
    pub page: Page,
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl EphemeralBrowser {
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("session: ephemeral browser close error (non-fatal): {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}

/// Opens and destroys worker sessions; owns the per-worker generation
/// counters (explicit per-worker state, not a process-wide global).
pub struct SessionManager {
    profiles_root: PathBuf,
    headless: bool,
    proxy: Option<ProxyConfig>,
    generations: Mutex<HashMap<usize, u64>>,
}

impl SessionManager {
    pub fn new(profiles_root: PathBuf, headless: bool, proxy: Option<ProxyConfig>) -> Self {
        Self {
            profiles_root,
            headless,
            proxy,
            generations: Mutex::new(HashMap::new()),
        }
    }

    fn generation_of(&self, worker_index: usize) -> u64 {
        *self
            .generations
            .lock()
            .expect("generation map lock")
            .entry(worker_index)
            .or_insert(0)
    }

    fn advance_generation(&self, worker_index: usize) -> u64 {
        let mut map = self.generations.lock().expect("generation map lock");
        let gen = map.entry(worker_index).or_insert(0);
        *gen += 1;
        *gen
    }

    fn build_config(
        &self,
        identity: &Identity,
        profile: Option<&Path>,
    ) -> Result<BrowserConfig, ScrapeError> {
        let mut builder = BrowserConfig::builder()
            .viewport(Viewport {
                width: identity.viewport_width,
                height: identity.viewport_height,
                device_scale_factor: Some(identity.device_scale_factor),
                emulating_mobile: identity.is_mobile,
                is_landscape: !identity.is_mobile,
                has_touch: identity.has_touch,
            })
            .window_size(identity.viewport_width, identity.viewport_height)
            .arg(format!("--user-agent={}", identity.user_agent));

        for arg in stealth::STEALTH_ARGS {
            builder = builder.arg(*arg);
        }

        if let Some(exe) = find_chrome_executable() {
            builder = builder.chrome_executable(exe);
        }

        if let Some(dir) = profile {
            builder = builder.user_data_dir(dir);
        }

        if let Some(proxy) = &self.proxy {
            // Credentials go in separately, via CDP auth interception on
            // each prepared page.
            builder = builder.arg(format!("--proxy-server={}", proxy.server));
        }

        if !self.headless {
            builder = builder.with_head();
        }

        builder.build().map_err(|e| ScrapeError::SessionLaunch {
            attempts: 0,
            message: format!("browser config build failed: {}", e),
        })
    }

    /// Open a persistent worker session.
    ///
    /// Draws a random identity, evicts a lock-poisoned profile directory if
    /// needed, and retries the launch up to [`MAX_LAUNCH_ATTEMPTS`] times
    /// with a fixed pause. The fingerprint mask is registered before any
    /// page script can run and stays in force for every navigation the
    /// session performs.
    pub async fn launch(&self, worker_index: usize) -> Result<WorkerSession, ScrapeError> {
        let generation = self.generation_of(worker_index);
        let dir = profile_dir(&self.profiles_root, worker_index, generation);
        let identity = identity::random_identity();

        info!(
            "session: worker {} gen {} launching as '{}' ({})",
            worker_index,
            generation,
            identity.name,
            dir.display()
        );

        if let Err(e) = evict_stale_locks(&dir) {
            // Eviction failure is not immediately fatal; the launch attempt
            // below will surface the real problem if the profile is unusable.
            warn!("session: lock eviction failed for {}: {}", dir.display(), e);
        }

        let proxy_auth = self
            .proxy
            .as_ref()
            .and_then(|p| p.credentials(worker_index));

        let mut last_error: Option<anyhow::Error> = None;
        for attempt in 1..=MAX_LAUNCH_ATTEMPTS {
            let config = self.build_config(identity, Some(&dir))?;
            match Browser::launch(config).await {
                Ok((browser, handler)) => {
                    let handler_task = spawn_handler_task(handler, worker_index);
                    match prepare_page(&browser, identity, proxy_auth.clone()).await {
                        Ok(page) => {
                            return Ok(WorkerSession {
                                worker_index,
                                generation,
                                profile_dir: dir,
                                identity,
                                page,
                                browser,
                                handler_task,
                            });
                        }
                        Err(e) => {
                            let mut browser = browser;
                            let _ = browser.close().await;
                            handler_task.abort();
                            last_error = Some(e);
                        }
                    }
                }
                Err(e) => last_error = Some(anyhow!(e)),
            }

            warn!(
                "session: worker {} launch attempt {}/{} failed: {}",
                worker_index,
                attempt,
                MAX_LAUNCH_ATTEMPTS,
                last_error.as_ref().map(|e| e.to_string()).unwrap_or_default()
            );
            if attempt < MAX_LAUNCH_ATTEMPTS {
                tokio::time::sleep(RETRY_PAUSE).await;
            }
        }

        Err(ScrapeError::SessionLaunch {
            attempts: MAX_LAUNCH_ATTEMPTS,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown launch failure".into()),
        })
    }

    /// Launch a profile-less one-shot browser with a random identity.
    pub async fn launch_ephemeral(&self) -> Result<EphemeralBrowser, ScrapeError> {
        let identity = identity::random_identity();
        let config = self.build_config(identity, None)?;
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::SessionLaunch {
                attempts: 1,
                message: format!("ephemeral launch failed: {}", e),
            })?;
        let handler_task = spawn_handler_task(handler, usize::MAX);
        let proxy_auth = self.proxy.as_ref().and_then(|p| p.credentials(0));
        match prepare_page(&browser, identity, proxy_auth).await {
            Ok(page) => Ok(EphemeralBrowser {
                page,
                browser,
                handler_task,
            }),
            Err(e) => {
                let mut browser = browser;
                let _ = browser.close().await;
                handler_task.abort();
                Err(ScrapeError::SessionLaunch {
                    attempts: 1,
                    message: format!("ephemeral page setup failed: {}", e),
                })
            }
        }
    }

    /// Close a session. With `reset`, the generation counter advances and
    /// the profile directory is deleted best-effort (3 tries, fixed
    /// backoff); without it, the directory is retained for reuse.
    pub async fn destroy(&self, mut session: WorkerSession, reset: bool) {
        info!(
            "session: worker {} gen {} closing (reset: {})",
            session.worker_index, session.generation, reset
        );

        if let Err(e) = session.browser.close().await {
            warn!("session: browser close error (non-fatal): {}", e);
        }
        let _ = session.browser.wait().await;
        session.handler_task.abort();

        if !reset {
            return;
        }

        let next = self.advance_generation(session.worker_index);
        debug!(
            "session: worker {} advanced to gen {}",
            session.worker_index, next
        );

        for attempt in 1..=3u32 {
            match std::fs::remove_dir_all(&session.profile_dir) {
                Ok(()) => {
                    info!(
                        "session: profile {} deleted",
                        session.profile_dir.display()
                    );
                    return;
                }
                Err(e) if attempt < 3 => {
                    warn!(
                        "session: profile delete attempt {}/3 failed: {}, retrying",
                        attempt, e
                    );
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
                Err(e) => {
                    // Best-effort only: the generation already advanced, so
                    // the leftover directory can never be reopened.
                    let err = ScrapeError::ResourceCleanup(format!(
                        "{}: {}",
                        session.profile_dir.display(),
                        e
                    ));
                    warn!("session: {}", err);
                }
            }
        }
    }

    /// Best-effort egress check when routing through a proxy; log-only.
    pub async fn verify_egress_ip(&self, session: &WorkerSession) {
        if self.proxy.is_none() {
            return;
        }
        match session.page.goto("https://ipinfo.io/json").await {
            Ok(_) => match session.page.content().await {
                Ok(body) => info!("session: egress check: {}", body.trim()),
                Err(e) => warn!("session: egress check read failed: {}", e),
            },
            Err(e) => warn!("session: egress check failed: {}", e),
        }
    }
}

fn spawn_handler_task(
    mut handler: chromiumoxide::Handler,
    worker_index: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!("session: CDP handler error (worker {}): {}", worker_index, e);
            }
        }
    })
}

/// Open the working tab, register the fingerprint mask so it precedes any
/// page script on every future navigation, pin the identity's headers, and
/// (with an authenticated proxy) install the credential responder.
async fn prepare_page(
    browser: &Browser,
    identity: &Identity,
    proxy_auth: Option<(String, String)>,
) -> anyhow::Result<Page> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| anyhow!("failed to open working tab: {}", e))?;

    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
        stealth::mask_script(),
    ))
    .await
    .map_err(|e| anyhow!("failed to register fingerprint mask: {}", e))?;

    let mut headers = serde_json::Map::new();
    for (name, value) in identity::stealth_headers(identity) {
        headers.insert(name.to_string(), serde_json::Value::String(value));
    }
    page.execute(SetExtraHttpHeadersParams::new(Headers::new(
        serde_json::Value::Object(headers),
    )))
    .await
    .map_err(|e| anyhow!("failed to set stealth headers: {}", e))?;

    if let Some((username, password)) = proxy_auth {
        enable_proxy_auth(&page, username, password).await?;
    }

    Ok(page)
}

/// Answer the upstream proxy's auth challenges with the session credential.
///
/// `Fetch.enable` with auth handling pauses every request, so both event
/// streams must be drained: plain paused requests are resumed untouched,
/// auth challenges are answered with the credentials. Each responder task
/// lives until the page's event bus closes with the browser.
async fn enable_proxy_auth(page: &Page, username: String, password: String) -> anyhow::Result<()> {
    page.execute(
        fetch::EnableParams::builder()
            .handle_auth_requests(true)
            .build(),
    )
    .await
    .map_err(|e| anyhow!("failed to enable auth interception: {}", e))?;

    let mut auth_events = page
        .event_listener::<EventAuthRequired>()
        .await
        .map_err(|e| anyhow!("auth challenge listener failed: {}", e))?;
    let auth_page = page.clone();
    tokio::spawn(async move {
        while let Some(event) = auth_events.next().await {
            let params = AuthChallengeResponse::builder()
                .response(AuthChallengeResponseResponse::ProvideCredentials)
                .username(username.clone())
                .password(password.clone())
                .build()
                .and_then(|response| {
                    ContinueWithAuthParams::builder()
                        .request_id(event.request_id.clone())
                        .auth_challenge_response(response)
                        .build()
                });
            match params {
                Ok(params) => {
                    if let Err(e) = auth_page.execute(params).await {
                        warn!("session: proxy auth response failed: {}", e);
                    }
                }
                Err(e) => warn!("session: proxy auth params invalid: {}", e),
            }
        }
    });

    let mut paused_events = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|e| anyhow!("request pause listener failed: {}", e))?;
    let resume_page = page.clone();
    tokio::spawn(async move {
        while let Some(event) = paused_events.next().await {
            let params = ContinueRequestParams::builder()
                .request_id(event.request_id.clone())
                .build();
            match params {
                Ok(params) => {
                    if let Err(e) = resume_page.execute(params).await {
                        warn!("session: paused request resume failed: {}", e);
                    }
                }
                Err(e) => warn!("session: resume params invalid: {}", e),
            }
        }
    });

    Ok(())
}

//! Search-engine client: token acquisition, result retrieval with backoff,
//! and session rotation.
//!
//! The retry loop is driven by [`SearchState`]. Transport and time are
//! injected through [`SessionFactory`] and [`Clock`] so the policy can be
//! exercised without network access.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::extract::{collect_links, is_result_anchor};
use crate::redirect::normalize_link;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::Rng;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

static VQD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"vqd=['"](\d+-[0-9a-f]+)['"]"#).expect("Failed to compile vqd regex pattern")
});

/// Status code the engine answers with when it is throttling a client.
const STATUS_THROTTLED: u16 = 202;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Status and body of a search-engine response.
#[derive(Debug, Clone)]
pub(crate) struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// One client identity: connection pool, cookie jar and user agents.
#[async_trait]
pub(crate) trait SearchSession: Send + Sync {
    async fn get(&self, url: Url, referer: Option<&str>) -> Result<RawResponse>;
}

/// Creates fresh sessions. Rotation discards the old session instead of
/// mutating it, so requests still holding it finish normally.
pub(crate) trait SessionFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn SearchSession>>;
}

/// Sleeping, abstracted for tests.
#[async_trait]
pub(crate) trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// reqwest-backed session with its own cookie store.
pub(crate) struct HttpSession {
    http_client: Client,
    user_agents: Arc<Vec<String>>,
}

impl HttpSession {
    fn random_user_agent(&self) -> String {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchSession for HttpSession {
    async fn get(&self, url: Url, referer: Option<&str>) -> Result<RawResponse> {
        let mut request = self
            .http_client
            .get(url)
            .header(USER_AGENT, self.random_user_agent())
            .header(ACCEPT, "text/html,application/xhtml+xml")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9");
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }
}

/// Builds [`HttpSession`]s with a fresh cookie jar each time.
pub(crate) struct HttpSessionFactory {
    user_agents: Arc<Vec<String>>,
    timeout: Duration,
}

impl HttpSessionFactory {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            user_agents: Arc::new(config.user_agents.clone()),
            timeout: config.search_timeout,
        }
    }
}

impl SessionFactory for HttpSessionFactory {
    fn create(&self) -> Result<Arc<dyn SearchSession>> {
        let http_client = Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .build()
            .map_err(|e| {
                AppError::Generic(anyhow::anyhow!("Failed to build search HTTP client: {}", e))
            })?;

        Ok(Arc::new(HttpSession {
            http_client,
            user_agents: self.user_agents.clone(),
        }))
    }
}

/// Backoff, jitter and rotation policy for the search retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
    pub jitter: Duration,
    pub throttle_penalty: Duration,
    pub rotate_every: u32,
}

impl RetryPolicy {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.search_max_attempts,
            backoff_step: config.backoff_step,
            jitter: config.backoff_jitter,
            throttle_penalty: config.throttle_penalty,
            rotate_every: config.rotate_every_attempts.max(1),
        }
    }

    /// Delay after the failed `attempt` (1-based): grows linearly with the
    /// attempt number, plus jitter, plus a penalty for throttling statuses.
    pub(crate) fn delay(&self, attempt: u32, status: Option<u16>, jitter: Duration) -> Duration {
        let mut delay = self.backoff_step * attempt + jitter;
        if status.is_some_and(is_throttle_status) {
            delay += self.throttle_penalty;
        }
        delay
    }

    /// Uniform jitter in `[0, self.jitter)`.
    pub(crate) fn draw_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }

    /// Whether the session is replaced after the failed `attempt`.
    pub(crate) fn should_rotate(&self, attempt: u32) -> bool {
        attempt % self.rotate_every == 0
    }
}

fn is_throttle_status(status: u16) -> bool {
    status == STATUS_THROTTLED || status == STATUS_TOO_MANY_REQUESTS
}

/// States of one search's retry loop.
#[derive(Debug)]
enum SearchState {
    NeedToken { attempt: u32 },
    HaveToken { attempt: u32, token: String },
    Retry { attempt: u32, status: Option<u16> },
    Success(String),
    Exhausted { last_status: Option<u16> },
}

/// Search client holding the current session.
pub(crate) struct SearchClient {
    factory: Arc<dyn SessionFactory>,
    session: RwLock<Arc<dyn SearchSession>>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    base_url: Url,
    locale: String,
}

impl SearchClient {
    pub(crate) fn new(
        config: &Config,
        factory: Arc<dyn SessionFactory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let base_url = Url::parse(&config.search_base_url)?;
        let session = factory.create()?;
        Ok(Self {
            factory,
            session: RwLock::new(session),
            clock,
            policy: RetryPolicy::from_config(config),
            base_url,
            locale: config.search_locale.clone(),
        })
    }

    /// Client talking to the configured engine over HTTP, sleeping on tokio's timer.
    pub(crate) fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config,
            Arc::new(HttpSessionFactory::new(config)),
            Arc::new(TokioClock),
        )
    }

    /// Replaces the current session (cookies and identity) with a new one.
    pub(crate) fn rotate_session(&self) -> Result<()> {
        let fresh = self.factory.create()?;
        let mut guard = self.session.write().unwrap_or_else(|p| p.into_inner());
        *guard = fresh;
        tracing::debug!(target: "search_task", "Rotated search session");
        Ok(())
    }

    fn current_session(&self) -> Arc<dyn SearchSession> {
        self.session
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn landing_url(&self, query: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path("/");
        url.query_pairs_mut().clear().append_pair("q", query);
        url
    }

    fn results_url(&self, query: &str, token: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path("/html/");
        url.query_pairs_mut()
            .clear()
            .append_pair("q", query)
            .append_pair("vqd", token)
            .append_pair("kl", &self.locale);
        url
    }

    async fn fetch_token(&self, session: &dyn SearchSession, query: &str) -> Result<String> {
        let response = session.get(self.landing_url(query), None).await?;
        extract_token(&response.body).ok_or_else(|| {
            tracing::debug!(target: "search_task",
                "No vqd token in landing page (status {})", response.status
            );
            AppError::TokenNotFound
        })
    }

    /// Runs `query` and returns the deduplicated organic result URLs in
    /// first-seen order.
    pub(crate) async fn search(&self, query: &str) -> Result<Vec<String>> {
        tracing::info!(target: "search_task", "Searching for: {}", query);

        let referer = self.base_url.origin().ascii_serialization() + "/";
        let mut last_status: Option<u16> = None;
        let mut state = SearchState::NeedToken { attempt: 1 };

        loop {
            state = match state {
                SearchState::NeedToken { attempt } => {
                    let session = self.current_session();
                    match self.fetch_token(session.as_ref(), query).await {
                        Ok(token) => SearchState::HaveToken { attempt, token },
                        Err(e) => {
                            tracing::warn!(target: "search_task",
                                "Attempt {} for '{}': token fetch failed, giving up: {}", attempt, query, e
                            );
                            return Err(e);
                        }
                    }
                }
                SearchState::HaveToken { attempt, token } => {
                    let session = self.current_session();
                    let url = self.results_url(query, &token);
                    match session.get(url, Some(&referer)).await {
                        Ok(response) if response.status == 200 => {
                            SearchState::Success(response.body)
                        }
                        Ok(response) => {
                            tracing::warn!(target: "search_task",
                                "Attempt {} for '{}': status {}", attempt, query, response.status
                            );
                            SearchState::Retry {
                                attempt,
                                status: Some(response.status),
                            }
                        }
                        Err(e) => {
                            tracing::warn!(target: "search_task",
                                "Attempt {} for '{}': request failed: {}", attempt, query, e
                            );
                            SearchState::Retry {
                                attempt,
                                status: None,
                            }
                        }
                    }
                }
                SearchState::Retry { attempt, status } => {
                    if status.is_some() {
                        last_status = status;
                    }
                    if attempt >= self.policy.max_attempts {
                        SearchState::Exhausted { last_status }
                    } else {
                        let delay = self
                            .policy
                            .delay(attempt, status, self.policy.draw_jitter());
                        tracing::debug!(target: "search_task", "Backing off {:?} before attempt {}", delay, attempt + 1);
                        self.clock.sleep(delay).await;
                        if self.policy.should_rotate(attempt) {
                            if let Err(e) = self.rotate_session() {
                                tracing::warn!(target: "search_task",
                                    "Session rotation failed, keeping current session: {}", e
                                );
                            }
                        }
                        SearchState::NeedToken {
                            attempt: attempt + 1,
                        }
                    }
                }
                SearchState::Success(body) => {
                    let links = parse_results(&body, &self.base_url);
                    tracing::info!(target: "search_task", "Found {} result(s) for '{}'", links.len(), query);
                    return Ok(links);
                }
                SearchState::Exhausted { last_status } => {
                    tracing::error!(target: "search_task",
                        "Giving up on '{}' after {} attempts", query, self.policy.max_attempts
                    );
                    return Err(AppError::SearchExhausted { last_status });
                }
            };
        }
    }
}

/// Extracts the vqd token from a landing page body.
pub(crate) fn extract_token(body: &str) -> Option<String> {
    VQD_REGEX
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Organic result targets of a results page, deduplicated in first-seen
/// order. Links still pointing at the engine itself (ads, internal pages)
/// are dropped.
pub(crate) fn parse_results(html: &str, engine: &Url) -> Vec<String> {
    let engine_origin = engine.origin();
    let mut seen = HashSet::new();

    collect_links(html, is_result_anchor)
        .iter()
        .map(|href| normalize_link(href))
        .filter(|link| {
            Url::parse(link)
                .map(|url| url.has_host() && url.origin() != engine_origin)
                .unwrap_or(false)
        })
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LANDING: &str = r#"<html><script>nrj('/d.js?q=x&vqd="4-1234abcd"&p=1')</script></html>"#;
    const RESULTS: &str = r#"
        <div class="result">
          <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Funi.edu%2F~jdoe&rut=1">Jane</a>
          <a class="result__snippet" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Funi.edu%2F~jdoe">s</a>
        </div>
        <div class="result">
          <a class="result__a" href="https://lab.org/people">Lab</a>
          <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Funi.edu%2F~jdoe&rut=2">Jane again</a>
          <a class="result__a" href="https://duckduckgo.com/y.js?ad_provider=x">Ad</a>
        </div>"#;

    /// Shared script: landing pages answer with `landing`, result requests
    /// pop statuses from `statuses` (200 with RESULTS once it is empty).
    struct Script {
        landing: String,
        statuses: Mutex<VecDeque<u16>>,
        requests: Mutex<Vec<(usize, String)>>,
    }

    struct ScriptedSession {
        id: usize,
        script: Arc<Script>,
    }

    #[async_trait]
    impl SearchSession for ScriptedSession {
        async fn get(&self, url: Url, _referer: Option<&str>) -> Result<RawResponse> {
            self.script
                .requests
                .lock()
                .unwrap()
                .push((self.id, url.path().to_string()));
            if url.path() == "/" {
                return Ok(RawResponse {
                    status: 200,
                    body: self.script.landing.clone(),
                });
            }
            let status = self.script.statuses.lock().unwrap().pop_front().unwrap_or(200);
            let body = if status == 200 { RESULTS.to_string() } else { String::new() };
            Ok(RawResponse { status, body })
        }
    }

    struct ScriptedFactory {
        script: Arc<Script>,
        created: AtomicUsize,
        /// Sessions from this index on fail to build.
        fail_from: usize,
    }

    impl SessionFactory for ScriptedFactory {
        fn create(&self) -> Result<Arc<dyn SearchSession>> {
            if self.created.load(Ordering::SeqCst) >= self.fail_from {
                return Err(AppError::Generic(anyhow::anyhow!("no more sessions")));
            }
            let id = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ScriptedSession {
                id,
                script: self.script.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct RecordingClock {
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Clock for RecordingClock {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    fn harness(
        landing: &str,
        statuses: &[u16],
    ) -> (SearchClient, Arc<ScriptedFactory>, Arc<RecordingClock>) {
        harness_with_sessions(landing, statuses, usize::MAX)
    }

    fn harness_with_sessions(
        landing: &str,
        statuses: &[u16],
        fail_from: usize,
    ) -> (SearchClient, Arc<ScriptedFactory>, Arc<RecordingClock>) {
        let script = Arc::new(Script {
            landing: landing.to_string(),
            statuses: Mutex::new(statuses.iter().copied().collect()),
            requests: Mutex::new(Vec::new()),
        });
        let factory = Arc::new(ScriptedFactory {
            script,
            created: AtomicUsize::new(0),
            fail_from,
        });
        let clock = Arc::new(RecordingClock::default());
        let config = Config {
            search_base_url: "https://duckduckgo.com".to_string(),
            ..Config::default()
        };
        let client = SearchClient::new(&config, factory.clone(), clock.clone()).unwrap();
        (client, factory, clock)
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token(LANDING).as_deref(), Some("4-1234abcd"));
        assert_eq!(extract_token("vqd='12-ff00'").as_deref(), Some("12-ff00"));
        assert_eq!(extract_token("<html>no token</html>"), None);
    }

    #[test]
    fn test_parse_results_dedupes_in_order() {
        let engine = Url::parse("https://duckduckgo.com").unwrap();
        assert_eq!(
            parse_results(RESULTS, &engine),
            vec!["https://uni.edu/~jdoe", "https://lab.org/people"]
        );
    }

    #[test]
    fn test_policy_delay() {
        let policy = RetryPolicy::from_config(&Config::default());
        assert_eq!(
            policy.delay(1, Some(500), Duration::from_millis(50)),
            Duration::from_millis(750)
        );
        assert_eq!(
            policy.delay(3, Some(202), Duration::from_millis(100)),
            Duration::from_millis(2100 + 100 + 3000)
        );
        assert_eq!(policy.delay(2, None, Duration::ZERO), Duration::from_millis(1400));
        assert!(policy.draw_jitter() < Duration::from_millis(700));
        assert!(!policy.should_rotate(3));
        assert!(policy.should_rotate(4));
        assert!(policy.should_rotate(8));
    }

    #[tokio::test]
    async fn test_search_success_first_attempt() {
        let (client, factory, clock) = harness(LANDING, &[]);
        let links = client.search("Jane Doe MIT").await.unwrap();

        assert_eq!(links, vec!["https://uni.edu/~jdoe", "https://lab.org/people"]);
        assert!(clock.sleeps.lock().unwrap().is_empty());
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_search_retries_with_throttle_penalty_and_fresh_token() {
        let (client, factory, clock) = harness(LANDING, &[202, 202]);
        let links = client.search("Jane Doe").await.unwrap();
        assert_eq!(links.len(), 2);

        let sleeps = clock.sleeps.lock().unwrap().clone();
        assert_eq!(sleeps.len(), 2);
        assert!(sleeps[0] >= Duration::from_millis(700 + 3000));
        assert!(sleeps[0] < Duration::from_millis(1400 + 3000));
        assert!(sleeps[1] >= Duration::from_millis(1400 + 3000));

        // Every attempt fetched a token before requesting results.
        let requests = factory.script.requests.lock().unwrap();
        let paths: Vec<&str> = requests.iter().map(|(_, p)| p.as_str()).collect();
        assert_eq!(paths, vec!["/", "/html/", "/", "/html/", "/", "/html/"]);
    }

    #[tokio::test]
    async fn test_search_exhausts_and_rotates_sessions() {
        let (client, factory, clock) = harness(LANDING, &[500; 8]);
        let err = client.search("Jane Doe").await.unwrap_err();

        assert!(matches!(
            err,
            AppError::SearchExhausted {
                last_status: Some(500)
            }
        ));
        assert_eq!(clock.sleeps.lock().unwrap().len(), 7);
        // Initial session plus one rotation after attempt 4.
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);

        let requests = factory.script.requests.lock().unwrap();
        assert!(requests[..8].iter().all(|(id, _)| *id == 0));
        assert!(requests[8..].iter().all(|(id, _)| *id == 1));
    }

    #[tokio::test]
    async fn test_missing_token_fails_immediately() {
        let (client, factory, clock) = harness("<html>blocked</html>", &[]);
        let err = client.search("Jane Doe").await.unwrap_err();

        assert!(matches!(err, AppError::TokenNotFound));
        assert!(clock.sleeps.lock().unwrap().is_empty());
        let requests = factory.script.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, "/");
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_retrying_on_current_session() {
        let (client, factory, clock) = harness_with_sessions(LANDING, &[500; 8], 1);
        let err = client.search("Jane Doe").await.unwrap_err();

        assert!(matches!(
            err,
            AppError::SearchExhausted {
                last_status: Some(500)
            }
        ));
        assert_eq!(clock.sleeps.lock().unwrap().len(), 7);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        let requests = factory.script.requests.lock().unwrap();
        assert_eq!(requests.len(), 16);
        assert!(requests.iter().all(|(id, _)| *id == 0));
    }

    #[tokio::test]
    async fn test_manual_rotation_swaps_session() {
        let (client, factory, _clock) = harness(LANDING, &[]);
        client.rotate_session().unwrap();
        client.search("Jane Doe").await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        let requests = factory.script.requests.lock().unwrap();
        assert!(requests.iter().all(|(id, _)| *id == 1));
    }
}

//! Per-subject discovery pipeline and batch driver.
//!
//! Each subject moves through [`Stage`]s: link resolution (search, skipped
//! when URLs are supplied), bounded-concurrency fetching, harvesting and
//! selection. Failures inside a subject only ever shrink its candidate set.

use crate::config::{Config, ExtractionStrategy, get_random_sleep_duration};
use crate::domain::is_excluded;
use crate::error::{AppError, Result};
use crate::fetcher::{HttpPageFetcher, PageFetcher};
use crate::harvest::{EmailExtractor, OracleExtractor, RegexExtractor};
use crate::models::{BatchSummary, EmailCandidateSet, EmailMatch, Subject};
use crate::oracle::OpenAiOracle;
use crate::records::{LinkSink, ResultSink};
use crate::redirect;
use crate::search::SearchClient;
use crate::selector::select_best;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;

/// Lifecycle of one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Init,
    LinkResolution,
    Fetching,
    Harvesting,
    Selected,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::LinkResolution => "link_resolution",
            Stage::Fetching => "fetching",
            Stage::Harvesting => "harvesting",
            Stage::Selected => "selected",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Knobs the orchestrator needs from the run configuration.
#[derive(Debug, Clone)]
pub(crate) struct PipelineSettings {
    pub fetch_concurrency: usize,
    pub excluded_domains: Vec<String>,
    pub query_suffix: Option<String>,
    pub pause_between_searches: (f32, f32),
    pub rotate_sessions_every: usize,
}

impl PipelineSettings {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            fetch_concurrency: config.fetch_concurrency.max(1),
            excluded_domains: config.excluded_domains.clone(),
            query_suffix: config.query_suffix.clone(),
            pause_between_searches: config.pause_between_searches,
            rotate_sessions_every: config.rotate_sessions_every,
        }
    }
}

/// Wires search, fetching, extraction and selection together.
pub(crate) struct Pipeline {
    search: Option<Arc<SearchClient>>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn EmailExtractor>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub(crate) fn new(
        search: Option<Arc<SearchClient>>,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn EmailExtractor>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            search,
            fetcher,
            extractor,
            settings,
        }
    }

    /// Builds the production pipeline: HTTP search and fetching, with the
    /// extractor chosen by `config.strategy`.
    pub(crate) fn from_config(config: &Config) -> Result<Self> {
        let search = Arc::new(SearchClient::from_config(config)?);
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpPageFetcher::new(config)?);
        let extractor: Arc<dyn EmailExtractor> = match config.strategy {
            ExtractionStrategy::Regex => Arc::new(RegexExtractor),
            ExtractionStrategy::Oracle => Arc::new(OracleExtractor::new(
                Arc::new(OpenAiOracle::from_config(config)?),
                config.oracle_snippet_chars,
            )),
        };
        tracing::info!(
            "Pipeline ready (strategy: {:?}, fetch concurrency: {})",
            config.strategy,
            config.fetch_concurrency
        );

        Ok(Self::new(
            Some(search),
            fetcher,
            extractor,
            PipelineSettings::from_config(config),
        ))
    }

    fn search_query(&self, identifier: &str) -> String {
        match self.settings.query_suffix.as_deref().map(str::trim) {
            Some(suffix) if !suffix.is_empty() => format!("{} {}", identifier, suffix),
            _ => identifier.to_string(),
        }
    }

    /// Runs the search for a subject. Search failures yield no links.
    pub(crate) async fn search_links(&self, identifier: &str) -> Vec<String> {
        let Some(search) = &self.search else {
            tracing::warn!(target: "pipeline_task",
                "[{}] No URLs supplied and searching is disabled.", identifier
            );
            return Vec::new();
        };

        match search.search(&self.search_query(identifier)).await {
            Ok(links) => links,
            Err(e) => {
                tracing::warn!(target: "pipeline_task",
                    "[{}] Search failed, continuing without results: {}", identifier, e
                );
                Vec::new()
            }
        }
    }

    /// Resolves redirect wrappers, drops blank, duplicate and excluded URLs.
    pub(crate) fn prepare_targets(&self, identifier: &str, raw_links: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        for raw in raw_links {
            let target = redirect::resolve(raw.trim());
            if target.is_empty() || !seen.insert(target.clone()) {
                continue;
            }
            if is_excluded(&target, &self.settings.excluded_domains) {
                tracing::debug!(target: "pipeline_task",
                    "[{}] Skipping URL on excluded domain: {}", identifier, target
                );
                continue;
            }
            targets.push(target);
        }

        targets
    }

    /// Fetches every target with at most `fetch_concurrency` requests in
    /// flight and merges the extracted addresses. Each task sends its set
    /// over a channel owned by this call, so nothing leaks between subjects.
    /// Dropping the returned future aborts every fetch still in flight.
    pub(crate) async fn gather_candidates(
        &self,
        identifier: &str,
        targets: Vec<String>,
    ) -> EmailCandidateSet {
        let semaphore = Arc::new(Semaphore::new(self.settings.fetch_concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel::<EmailCandidateSet>();
        let mut tasks = JoinSet::new();

        for url in targets {
            let semaphore = semaphore.clone();
            let fetcher = self.fetcher.clone();
            let extractor = self.extractor.clone();
            let tx = tx.clone();
            let identifier = identifier.to_string();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let text = fetcher.fetch(&url).await;
                if text.is_empty() {
                    return;
                }
                let found = extractor.extract(&identifier, &url, &text).await;
                if !found.is_empty() {
                    let _ = tx.send(found);
                }
            });
        }
        drop(tx);

        while let Some(outcome) = tasks.join_next().await {
            if let Err(e) = outcome {
                let err = AppError::Task(e.to_string());
                tracing::error!(target: "pipeline_task", "[{}] Fetch task aborted: {}", identifier, err);
            }
        }

        let mut candidates = EmailCandidateSet::new();
        while let Some(found) = rx.recv().await {
            candidates.extend(found);
        }
        candidates
    }

    /// Finds the best email for one subject. Never fails: anything that goes
    /// wrong produces a result with an empty email.
    pub(crate) async fn find_email(&self, subject: &Subject) -> EmailMatch {
        let id = subject.identifier.as_str();
        let mut stage = Stage::Init;
        tracing::info!(target: "pipeline_task", "[{}] Starting processing ({}).", id, stage);

        let raw_links = if subject.needs_search() {
            stage = Stage::LinkResolution;
            tracing::debug!(target: "pipeline_task", "[{}] Stage: {}", id, stage);
            self.search_links(id).await
        } else {
            subject.candidate_urls.clone()
        };

        let targets = self.prepare_targets(id, &raw_links);

        let candidates = if targets.is_empty() {
            EmailCandidateSet::new()
        } else {
            stage = Stage::Fetching;
            tracing::debug!(target: "pipeline_task", "[{}] Stage: {} ({} URLs)", id, stage, targets.len());
            let candidates = self.gather_candidates(id, targets).await;
            stage = Stage::Harvesting;
            tracing::debug!(target: "pipeline_task", "[{}] Stage: {} ({} candidates)", id, stage, candidates.len());
            candidates
        };

        stage = Stage::Selected;
        let email = select_best(id, &candidates);
        let result = if email.is_empty() {
            tracing::info!(target: "pipeline_task", "[{}] ✗ No email found ({}).", id, stage);
            EmailMatch::not_found(id)
        } else {
            tracing::info!(target: "pipeline_task",
                "[{}] ✓ Selected {} out of {} candidate(s).", id, email, candidates.len()
            );
            EmailMatch::found(id, email)
        };

        stage = Stage::Done;
        tracing::debug!(target: "pipeline_task", "[{}] Stage: {}", id, stage);
        result
    }

    /// Pause after a search and periodic session rotation between subjects.
    async fn between_subjects(&self, index: usize, searched: bool) {
        if searched {
            let pause = get_random_sleep_duration(self.settings.pause_between_searches);
            if pause > Duration::ZERO {
                tokio::time::sleep(pause).await;
            }
        }

        let every = self.settings.rotate_sessions_every;
        if let Some(search) = &self.search {
            if every > 0 && (index + 1) % every == 0 {
                if let Err(e) = search.rotate_session() {
                    tracing::warn!(target: "pipeline_task", "Session rotation failed: {}", e);
                }
            }
        }
    }

    /// Processes subjects one after another, writing one row per subject.
    /// Only sink failures abort the batch; `cancel` stops it early.
    pub(crate) async fn run_batch<S: ResultSink>(
        &self,
        subjects: Vec<Subject>,
        sink: &mut S,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        let progress_bar = new_progress_bar(subjects.len());

        for (index, subject) in subjects.iter().enumerate() {
            let result = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    summary.cancelled = true;
                    break;
                }
                result = self.find_email(subject) => result,
            };

            sink.write_result(&result)?;
            summary.processed += 1;
            if result.is_found() {
                summary.found += 1;
            }
            progress_bar.inc(1);

            self.between_subjects(index, subject.needs_search()).await;
        }

        sink.flush()?;
        progress_bar.finish_with_message(if summary.cancelled {
            "Cancelled"
        } else {
            "Processing complete"
        });

        tracing::info!(
            "Processed {} subjects, found {} emails{}.",
            summary.processed,
            summary.found,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }

    /// Runs only link resolution for every subject and records the links.
    pub(crate) async fn discover_links<L: LinkSink>(
        &self,
        subjects: Vec<Subject>,
        sink: &mut L,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        let progress_bar = new_progress_bar(subjects.len());

        for (index, subject) in subjects.iter().enumerate() {
            let links = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    summary.cancelled = true;
                    break;
                }
                links = self.search_links(&subject.identifier) => links,
            };

            sink.write_links(&subject.identifier, &links)?;
            summary.processed += 1;
            if !links.is_empty() {
                summary.found += 1;
            }
            progress_bar.inc(1);

            self.between_subjects(index, true).await;
        }

        sink.flush()?;
        progress_bar.finish_with_message("Search complete");
        Ok(summary)
    }
}

fn new_progress_bar(len: usize) -> indicatif::ProgressBar {
    let progress_bar = indicatif::ProgressBar::new(len as u64);
    let style = indicatif::ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
        .progress_chars("##-");
    progress_bar.set_style(style);
    progress_bar
}

/// Resolves once the cancel flag is raised. A dropped sender never cancels.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

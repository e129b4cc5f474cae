use futures::stream::{self, StreamExt};
use std::sync::Arc;
use threadline_state::fold_events;
use threadline_types::{CancelToken, Conversation, Event, Result};

use crate::cache::{RunEventCache, RunEvents};
use crate::source::{RunInfo, RunSource};

const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

/// Replays a thread's completed runs into a finished [`Conversation`].
pub struct HistoryReconstructor {
    source: Arc<dyn RunSource>,
    cache: RunEventCache,
    max_concurrent_fetches: usize,
}

impl HistoryReconstructor {
    pub fn new(source: Arc<dyn RunSource>, cache: RunEventCache) -> Self {
        Self {
            source,
            cache,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }

    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = limit.max(1);
        self
    }

    pub fn cache(&self) -> &RunEventCache {
        &self.cache
    }

    /// Rebuild the conversation of `thread_id`.
    ///
    /// Completed runs are replayed oldest first. Logs are fetched concurrently
    /// but folded strictly in run order, then event order. In-progress runs
    /// are skipped; their tail belongs to a live session.
    pub async fn reconstruct(&self, thread_id: &str, cancel: &CancelToken) -> Result<Conversation> {
        cancel.check()?;

        let mut runs: Vec<RunInfo> = self
            .source
            .list_runs(thread_id, cancel)
            .await?
            .into_iter()
            .filter(RunInfo::is_completed)
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let run_count = runs.len();

        tracing::debug!(thread_id, runs = run_count, "replaying thread history");

        // Each fetch owns its handles, so the stream borrows nothing from `self`.
        // `buffered` keeps output in input order whatever order fetches finish in.
        let source = Arc::clone(&self.source);
        let cache = self.cache.clone();
        let owned_thread_id = thread_id.to_string();
        let fetch_cancel = cancel.clone();
        let mut logs = stream::iter(runs)
            .map(move |run| {
                load_run(
                    Arc::clone(&source),
                    cache.clone(),
                    owned_thread_id.clone(),
                    run,
                    fetch_cancel.clone(),
                )
            })
            .buffered(self.max_concurrent_fetches);

        let mut conversation = Conversation::new(thread_id);
        while let Some(events) = logs.next().await {
            let events = events?;
            cancel.check()?;
            conversation = fold_events(conversation, events.iter());
        }

        tracing::info!(
            thread_id,
            runs = run_count,
            messages = conversation.messages.len(),
            "reconstructed thread history"
        );
        Ok(conversation)
    }

    /// Event log of one run, with the user turn synthesized when missing.
    ///
    /// Completed runs go through the cache; anything else is fetched fresh
    /// every time and never cached.
    pub async fn run_events(
        &self,
        thread_id: &str,
        run: &RunInfo,
        cancel: &CancelToken,
    ) -> Result<RunEvents> {
        load_run(
            Arc::clone(&self.source),
            self.cache.clone(),
            thread_id.to_string(),
            run.clone(),
            cancel.clone(),
        )
        .await
    }
}

async fn load_run(
    source: Arc<dyn RunSource>,
    cache: RunEventCache,
    thread_id: String,
    run: RunInfo,
    cancel: CancelToken,
) -> Result<RunEvents> {
    let completed = run.is_completed();
    let run_id = run.run_id.clone();
    let fetch = fetch_run(source, thread_id, run, cancel);

    if !completed {
        return fetch.await.map(RunEvents::from);
    }
    cache.get_or_fetch(&run_id, move || fetch).await
}

async fn fetch_run(
    source: Arc<dyn RunSource>,
    thread_id: String,
    run: RunInfo,
    cancel: CancelToken,
) -> Result<Vec<Event>> {
    let events = source.run_events(&thread_id, &run.run_id, &cancel).await?;
    Ok(with_user_turn(&run, events))
}

/// Prepend the triggering user message if the archived log lacks it.
fn with_user_turn(run: &RunInfo, mut events: Vec<Event>) -> Vec<Event> {
    let has_user_turn = events
        .iter()
        .any(|e| matches!(e, Event::UserMessageCreated { .. }));

    if has_user_turn {
        return events;
    }
    if let Some(text) = &run.user_message {
        events.insert(
            0,
            Event::UserMessageCreated {
                message_id: format!("{}-user", run.run_id),
                text: text.clone(),
            },
        );
    }
    events
}

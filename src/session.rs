//! Generation sessions: "latest request wins".
//!
//! Every `search` gets the next sequence number and becomes current. Older
//! sessions keep running but lose the right to write to the sink, so stale
//! output is dropped at the sink boundary rather than at the source.

use crate::config::Settings;
use crate::provider::{Operation, Provider, StreamUnit};
use crate::sink::{OutputSink, Update, UpdateKind};
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tokio::sync::watch;

/// Shown in the panel while waiting for the first unit.
pub const PLACEHOLDER: &str = "…";

/// Posted instead of contacting the endpoint when settings are unusable.
pub const CONFIG_ERROR_MESSAGE: &str = concat!(
    "[ERROR] \"API key or API urls are not set or wrong, ",
    "please go to extension settings to set it (read README.md for more info)\""
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingFirstUnit,
    Streaming,
    Settled(String),
}

/// Text received so far for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatedResponse {
    pub text: String,
    pub session_sequence: u64,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub sequence: u64,
    pub issued_at: SystemTime,
    pub state: SessionState,
    pub response: AccumulatedResponse,
    /// Whether a newer session took over before this one settled.
    pub superseded: bool,
    /// Settled with a configuration or transport error.
    pub failed: bool,
}

impl Session {
    fn new(sequence: u64) -> Self {
        Self {
            sequence,
            issued_at: SystemTime::now(),
            state: SessionState::Idle,
            response: AccumulatedResponse {
                text: String::new(),
                session_sequence: sequence,
            },
            superseded: false,
            failed: false,
        }
    }

    fn issue(&mut self) {
        debug_assert_eq!(self.state, SessionState::Idle);
        self.state = SessionState::AwaitingFirstUnit;
    }

    fn receive(&mut self, unit: StreamUnit) {
        self.response.text.push_str(&unit.text);
        self.state = SessionState::Streaming;
    }

    fn settle(&mut self, text: String) {
        self.state = SessionState::Settled(text);
    }

    /// Final text, once settled.
    pub fn settled_text(&self) -> Option<&str> {
        match &self.state {
            SessionState::Settled(t) => Some(t),
            _ => None,
        }
    }
}

/// `"{prompt}\n{selection}\n"` when there is a selection, else the prompt.
pub fn compose_prompt(prompt: &str, selection: Option<&str>) -> String {
    match selection.filter(|s| !s.is_empty()) {
        Some(sel) => format!("{prompt}\n{sel}\n"),
        None => prompt.to_string(),
    }
}

pub struct SessionController {
    provider: Arc<dyn Provider + Send + Sync>,
    sink: Arc<dyn OutputSink + Send + Sync>,
    settings: watch::Sender<Arc<Settings>>,
    /// Current sequence number. Held while advancing it and across every
    /// sink write, so a check-then-post can never interleave with a newer
    /// session taking over.
    current: Mutex<u64>,
}

impl SessionController {
    pub fn new(
        provider: Arc<dyn Provider + Send + Sync>,
        sink: Arc<dyn OutputSink + Send + Sync>,
        settings: Settings,
    ) -> Self {
        let (tx, _) = watch::channel(Arc::new(settings));
        Self {
            provider,
            sink,
            settings: tx,
            current: Mutex::new(0),
        }
    }

    /// Snapshot used by the next request.
    pub fn settings(&self) -> Arc<Settings> {
        self.settings.borrow().clone()
    }

    /// Replace the settings snapshot. In-flight sessions keep the one they
    /// started with.
    pub fn update_settings(&self, settings: Settings) {
        tracing::info!("settings updated");
        self.settings.send_replace(Arc::new(settings));
    }

    /// Change notifications for hosts that mirror the settings.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.settings.subscribe()
    }

    fn lock_current(&self) -> MutexGuard<'_, u64> {
        // The guarded value is a plain counter; a poisoned lock still holds a valid one.
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sequence number of the session allowed to write to the sink.
    pub fn current(&self) -> u64 {
        *self.lock_current()
    }

    fn advance(&self) -> u64 {
        let mut current = self.lock_current();
        *current += 1;
        *current
    }

    /// Write to the sink on behalf of `sequence`, if it is still current.
    /// The lock is held through the write.
    fn post(&self, sequence: u64, kind: UpdateKind, text: &str) -> bool {
        let current = self.lock_current();
        if *current != sequence {
            return false;
        }
        self.sink.post_update(Update {
            session: sequence,
            kind,
            text: text.to_string(),
        });
        drop(current);
        true
    }

    pub async fn chat(&self, prompt: impl Into<String>) -> Session {
        self.search(Operation::FreeformChat, Some(prompt.into()), None)
            .await
    }

    /// Run one generation session to completion.
    ///
    /// `prompt` defaults to the operation's configured prefix. The returned
    /// session is always `Settled`; `superseded` tells whether its result
    /// reached the sink.
    pub async fn search(
        &self,
        op: Operation,
        prompt: Option<String>,
        selection: Option<String>,
    ) -> Session {
        let settings = self.settings();
        let sequence = self.advance();
        let mut session = Session::new(sequence);

        let prompt = prompt
            .or_else(|| settings.prompt_prefix(op).map(str::to_string))
            .unwrap_or_default();
        let full_prompt = compose_prompt(&prompt, selection.as_deref());

        let request = match settings.request_for(op, full_prompt) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(
                    session = sequence,
                    %op,
                    error = %e,
                    "not sending request: configuration error"
                );
                session.failed = true;
                session.settle(CONFIG_ERROR_MESSAGE.to_string());
                session.superseded = !self.post(sequence, UpdateKind::Error, CONFIG_ERROR_MESSAGE);
                return session;
            }
        };

        tracing::info!(
            session = sequence,
            %op,
            provider = self.provider.name(),
            endpoint = %request.endpoint,
            "session started"
        );

        session.issue();
        self.post(sequence, UpdateKind::Prompt, &prompt);
        self.post(sequence, UpdateKind::Placeholder, PLACEHOLDER);

        let mut units = self.provider.open_stream(request);
        let mut failure = None;

        while let Some(item) = units.next().await {
            match item {
                Ok(unit) => {
                    tracing::debug!(session = sequence, len = unit.text.len(), "unit");
                    session.receive(unit);
                    if !self.post(sequence, UpdateKind::Partial, &session.response.text)
                        && settings.abort_superseded
                    {
                        tracing::debug!(session = sequence, "superseded; closing stream");
                        break;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        drop(units);

        session.failed = failure.is_some();
        let (kind, text) = match failure {
            None => (UpdateKind::Final, session.response.text.clone()),
            Some(e) => (
                UpdateKind::Error,
                format!("{}\n\n---\n[ERROR] {e}", session.response.text),
            ),
        };

        if self.post(sequence, kind, &text) {
            tracing::info!(session = sequence, ?kind, len = text.len(), "session settled");
        } else {
            session.superseded = true;
            tracing::debug!(
                session = sequence,
                ?kind,
                "discarding result of superseded session"
            );
        }
        session.settle(text);
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamTransportError;
    use crate::provider::{Request, UnitStream};
    use crate::sink::MemorySink;
    use reqwest::StatusCode;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    type Feed = mpsc::UnboundedSender<Result<StreamUnit, StreamTransportError>>;

    /// Hands out one pre-made stream per `open_stream` call, in order.
    #[derive(Default)]
    struct ScriptedProvider {
        streams: Mutex<Vec<UnitStream>>,
        requests: Mutex<Vec<Request>>,
    }

    impl ScriptedProvider {
        /// Queue a stream whose items are pushed through the returned sender.
        fn queue(&self) -> Feed {
            let (tx, rx) = mpsc::unbounded_channel();
            self.streams
                .lock()
                .unwrap()
                .insert(0, Box::pin(UnboundedReceiverStream::new(rx)));
            tx
        }

        fn requests(&self) -> Vec<Request> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Provider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn open_stream(&self, req: Request) -> UnitStream {
            self.requests.lock().unwrap().push(req);
            self.streams
                .lock()
                .unwrap()
                .pop()
                .expect("no stream queued")
        }
    }

    fn unit(s: &str) -> Result<StreamUnit, StreamTransportError> {
        Ok(StreamUnit::new(s))
    }

    fn setup(
        settings: Settings,
    ) -> (Arc<ScriptedProvider>, Arc<MemorySink>, Arc<SessionController>) {
        let provider = Arc::new(ScriptedProvider::default());
        let sink = Arc::new(MemorySink::new());
        let ctl = Arc::new(SessionController::new(provider.clone(), sink.clone(), settings));
        (provider, sink, ctl)
    }

    fn kinds(updates: &[Update]) -> Vec<UpdateKind> {
        updates.iter().map(|u| u.kind).collect()
    }

    #[test]
    fn prompt_composition() {
        assert_eq!(compose_prompt("Explain", Some("fn f() {}")), "Explain\nfn f() {}\n");
        assert_eq!(compose_prompt("Explain", Some("")), "Explain");
        assert_eq!(compose_prompt("hi", None), "hi");
    }

    #[tokio::test]
    async fn streams_partials_then_final() {
        let (provider, sink, ctl) = setup(Settings::default());
        let feed = provider.queue();
        feed.send(unit("fn")).unwrap();
        feed.send(unit(" main")).unwrap();
        drop(feed);

        let session = ctl
            .search(Operation::Explain, None, Some("fn main() {}".into()))
            .await;

        assert_eq!(session.sequence, 1);
        assert_eq!(session.settled_text(), Some("fn main"));
        assert!(!session.superseded);

        let updates = sink.updates();
        assert_eq!(
            kinds(&updates),
            vec![
                UpdateKind::Prompt,
                UpdateKind::Placeholder,
                UpdateKind::Partial,
                UpdateKind::Partial,
                UpdateKind::Final,
            ]
        );
        assert_eq!(updates[1].text, PLACEHOLDER);
        assert_eq!(updates[2].text, "fn");
        assert_eq!(updates[3].text, "fn main");
        assert_eq!(updates[4].text, "fn main");
        assert!(updates.iter().all(|u| u.session == 1));

        let req = &provider.requests()[0];
        assert_eq!(req.operation, Operation::Explain);
        assert_eq!(
            req.prompt,
            "Explain what the following code does\nfn main() {}\n"
        );
    }

    #[tokio::test]
    async fn missing_endpoint_short_circuits() {
        let settings = Settings::default().with_endpoint(Operation::FreeformChat, "");
        let (provider, sink, ctl) = setup(settings);

        let session = ctl.chat("hello").await;

        assert_eq!(session.settled_text(), Some(CONFIG_ERROR_MESSAGE));
        assert!(session.failed);
        assert!(provider.requests().is_empty());
        let updates = sink.updates();
        assert_eq!(kinds(&updates), vec![UpdateKind::Error]);
        assert_eq!(updates[0].text, CONFIG_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn transport_failure_is_appended_to_partial_text() {
        let (provider, sink, ctl) = setup(Settings::default());
        let feed = provider.queue();
        feed.send(unit("one")).unwrap();
        feed.send(unit("two")).unwrap();
        feed.send(Err(StreamTransportError::Status {
            status: StatusCode::BAD_GATEWAY,
            body: "upstream gone".into(),
        }))
        .unwrap();
        feed.send(unit("never")).unwrap();

        let session = ctl.chat("go").await;

        let updates = sink.updates();
        assert_eq!(
            kinds(&updates[2..]),
            vec![UpdateKind::Partial, UpdateKind::Partial, UpdateKind::Error]
        );
        let last = updates.last().unwrap();
        assert_eq!(
            last.text,
            "onetwo\n\n---\n[ERROR] HTTP 502 Bad Gateway: upstream gone"
        );
        assert_eq!(session.settled_text(), Some(last.text.as_str()));
        assert!(session.failed);
    }

    #[tokio::test]
    async fn newer_session_silences_older_one() {
        let (provider, sink, ctl) = setup(Settings::default());
        let old_feed = provider.queue();
        let new_feed = provider.queue();

        old_feed.send(unit("old-1")).unwrap();
        let old = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.chat("first").await }
        });

        // Wait until the first session has published its first unit.
        while sink.latest_text().as_deref() != Some("old-1") {
            tokio::task::yield_now().await;
        }

        new_feed.send(unit("new-1")).unwrap();
        drop(new_feed);
        let newer = ctl.chat("second").await;

        old_feed.send(unit("old-2")).unwrap();
        drop(old_feed);
        let old = old.await.unwrap();

        assert_eq!(newer.sequence, 2);
        assert!(!newer.superseded);
        assert!(old.superseded);
        // The stale session still drained its stream.
        assert_eq!(old.settled_text(), Some("old-1old-2"));

        let updates = sink.updates();
        let second_placeholder = updates
            .iter()
            .position(|u| u.session == 2 && u.kind == UpdateKind::Placeholder)
            .unwrap();
        assert!(updates[second_placeholder..].iter().all(|u| u.session == 2));
        assert_eq!(updates.last().unwrap().kind, UpdateKind::Final);
        assert_eq!(updates.last().unwrap().text, "new-1");
    }

    #[tokio::test]
    async fn abort_superseded_stops_reading_stale_stream() {
        let (provider, sink, ctl) = setup(Settings::default().with_abort_superseded(true));
        let old_feed = provider.queue();
        let new_feed = provider.queue();
        drop(new_feed);

        let old = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.chat("first").await }
        });
        while sink.updates().len() < 2 {
            tokio::task::yield_now().await;
        }

        ctl.chat("second").await;

        old_feed.send(unit("late")).unwrap();
        let old = old.await.unwrap();

        assert!(old.superseded);
        assert_eq!(old.settled_text(), Some("late"));
        // Receiver dropped once the stale unit was seen.
        assert!(old_feed.send(unit("after")).is_err());
    }

    #[tokio::test]
    async fn superseded_error_is_swallowed() {
        let (provider, sink, ctl) = setup(Settings::default());
        let old_feed = provider.queue();
        let new_feed = provider.queue();
        drop(new_feed);

        let old = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.chat("first").await }
        });
        while sink.updates().len() < 2 {
            tokio::task::yield_now().await;
        }
        ctl.chat("second").await;
        let before = sink.updates().len();

        old_feed
            .send(Err(StreamTransportError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: String::new(),
            }))
            .unwrap();
        let old = old.await.unwrap();

        assert!(old.superseded);
        assert_eq!(sink.updates().len(), before);
        assert!(sink.updates().iter().all(|u| u.kind != UpdateKind::Error));
    }

    #[tokio::test]
    async fn settings_updates_apply_to_next_request() {
        let (provider, _sink, ctl) = setup(Settings::default());
        let mut changes = ctl.subscribe();

        drop(provider.queue());
        ctl.update_settings(
            ctl.settings()
                .as_ref()
                .clone()
                .with_endpoint(Operation::Refactor, "http://refactor.local/run"),
        );
        assert!(changes.has_changed().unwrap());

        ctl.search(Operation::Refactor, Some("tidy".into()), None).await;
        assert_eq!(
            provider.requests()[0].endpoint.as_str(),
            "http://refactor.local/run"
        );
        assert_eq!(
            changes.borrow_and_update().endpoints[&Operation::Refactor],
            "http://refactor.local/run"
        );
    }
}

use async_trait::async_trait;
use botpack_launcher::{CreateSpec, DockerLike, ImageContract, LogChunk};
use futures::channel::mpsc;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Exit code reported for a bot stopped by SIGTERM.
pub const SIGTERM_EXIT: i64 = 143;

#[derive(Default)]
struct State {
    images: HashMap<String, ImageContract>,
    created: Vec<CreateSpec>,
    started: Vec<String>,
    stopped: Vec<(String, u64)>,
    removed: Vec<(String, bool)>,
    next_id: u64,
    exit_code: i64,
    start_error: Option<String>,
    logs: Vec<LogChunk>,
    live_logs: Option<mpsc::UnboundedReceiver<LogChunk>>,
    run_until_stopped: bool,
    was_stopped: bool,
}

fn default_contract() -> ImageContract {
    ImageContract {
        cmd: vec!["python".into(), "-u".into(), "bot.py".into()],
        env: vec![
            ("PATH".into(), "/usr/local/bin:/usr/bin:/bin".into()),
            ("PYTHONUNBUFFERED".into(), "1".into()),
            ("TZ".into(), "UTC".into()),
        ],
    }
}

/// In-memory stand-in for the Docker daemon.
#[derive(Clone, Default)]
pub struct FakeDocker {
    state: Arc<Mutex<State>>,
    stop_signal: Arc<Notify>,
}

impl FakeDocker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake docker state poisoned")
    }

    /// An image built with the stock launch contract.
    pub fn with_image(self, image: &str) -> Self {
        self.with_image_contract(image, default_contract())
    }

    pub fn with_image_contract(self, image: &str, contract: ImageContract) -> Self {
        self.state().images.insert(image.to_string(), contract);
        self
    }

    pub fn exit_with(self, code: i64) -> Self {
        self.state().exit_code = code;
        self
    }

    pub fn fail_start(self, reason: &str) -> Self {
        self.state().start_error = Some(reason.to_string());
        self
    }

    pub fn emit(self, chunk: LogChunk) -> Self {
        self.state().logs.push(chunk);
        self
    }

    /// The container keeps running until `stop` is called.
    pub fn run_until_stopped(self) -> Self {
        self.state().run_until_stopped = true;
        self
    }

    /// Log chunks sent on the returned channel are delivered while the
    /// container runs; the stream ends when the sender is dropped.
    pub fn live_logs(&self) -> mpsc::UnboundedSender<LogChunk> {
        let (tx, rx) = mpsc::unbounded();
        self.state().live_logs = Some(rx);
        tx
    }

    pub fn created(&self) -> Vec<CreateSpec> {
        self.state().created.clone()
    }

    pub fn last_created(&self) -> CreateSpec {
        self.state().created.last().cloned().expect("no create")
    }

    pub fn started(&self) -> Vec<String> {
        self.state().started.clone()
    }

    pub fn stopped(&self) -> Vec<(String, u64)> {
        self.state().stopped.clone()
    }

    pub fn removed(&self) -> Vec<(String, bool)> {
        self.state().removed.clone()
    }
}

#[async_trait]
impl DockerLike for FakeDocker {
    async fn inspect_image(&self, image: &str) -> anyhow::Result<Option<ImageContract>> {
        Ok(self.state().images.get(image).cloned())
    }

    async fn create(&self, spec: CreateSpec) -> anyhow::Result<String> {
        let mut state = self.state();
        if !state.images.contains_key(&spec.image) {
            anyhow::bail!("No such image: {}", spec.image);
        }
        state.created.push(spec);
        state.next_id += 1;
        Ok(format!("ctr-{}", state.next_id))
    }

    async fn start(&self, container_id: &str) -> anyhow::Result<()> {
        let mut state = self.state();
        if let Some(reason) = &state.start_error {
            anyhow::bail!("{reason}");
        }
        state.started.push(container_id.to_string());
        Ok(())
    }

    async fn stop(&self, container_id: &str, timeout_secs: u64) -> anyhow::Result<()> {
        {
            let mut state = self.state();
            state.stopped.push((container_id.to_string(), timeout_secs));
            state.was_stopped = true;
        }
        self.stop_signal.notify_waiters();
        Ok(())
    }

    async fn remove(&self, container_id: &str, force: bool) -> anyhow::Result<()> {
        self.state()
            .removed
            .push((container_id.to_string(), force));
        Ok(())
    }

    async fn wait(&self, _container_id: &str) -> anyhow::Result<i64> {
        let notified = self.stop_signal.notified();
        let (until_stopped, already_stopped, exit_code) = {
            let state = self.state();
            (state.run_until_stopped, state.was_stopped, state.exit_code)
        };
        if !until_stopped {
            return Ok(exit_code);
        }
        if !already_stopped {
            notified.await;
        }
        Ok(SIGTERM_EXIT)
    }

    fn logs(&self, _container_id: &str) -> BoxStream<'static, anyhow::Result<LogChunk>> {
        let mut state = self.state();
        let recorded = stream::iter(state.logs.clone().into_iter().map(Ok));
        match state.live_logs.take() {
            Some(live) => recorded.chain(live.map(Ok)).boxed(),
            None => recorded.boxed(),
        }
    }
}

//! Scripted record sources shared by the pool tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::sleep;

use crate::schema::Record;
use crate::source::{FetchError, RecordSource};

pub(crate) fn record(id: &str) -> Record {
    Record {
        id: id.to_string(),
        author: "Tester".to_string(),
        content: format!("content of {id}"),
        tags: vec!["test".to_string()],
        author_slug: "tester".to_string(),
        length: 11 + id.len() as i64,
        date_added: "2024-01-01".to_string(),
        date_modified: "2024-01-02".to_string(),
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Ok { id: String, latency: Duration },
    Transport { latency: Duration },
    Decode,
}

impl Step {
    pub(crate) fn ok(id: &str, latency: Duration) -> Self {
        Step::Ok {
            id: id.to_string(),
            latency,
        }
    }

    pub(crate) fn transport_error() -> Self {
        Step::Transport {
            latency: Duration::ZERO,
        }
    }

    pub(crate) fn decode_error() -> Self {
        Step::Decode
    }
}

enum Script {
    /// Every worker pops from the same queue.
    Shared(Mutex<VecDeque<Step>>),
    /// One queue per worker id.
    PerWorker(Vec<Mutex<VecDeque<Step>>>),
    /// Endless successes with a fixed latency.
    Repeating(Duration),
}

/// In-process source replaying a fixed script.
///
/// An exhausted script answers with a transport error, so a test
/// always ends with every worker stopped.
pub(crate) struct ScriptedSource {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub(crate) fn shared(steps: Vec<Step>) -> Self {
        Self {
            script: Script::Shared(Mutex::new(steps.into())),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn per_worker(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            script: Script::PerWorker(
                scripts
                    .into_iter()
                    .map(|steps| Mutex::new(steps.into()))
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn repeating(latency: Duration) -> Self {
        Self {
            script: Script::Repeating(latency),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self, worker: usize, call: usize) -> Option<Step> {
        match &self.script {
            Script::Shared(queue) => queue.lock().unwrap().pop_front(),
            Script::PerWorker(queues) => queues
                .get(worker)
                .and_then(|queue| queue.lock().unwrap().pop_front()),
            Script::Repeating(latency) => Some(Step::ok(&format!("r{call}"), *latency)),
        }
    }
}

#[async_trait::async_trait]
impl RecordSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch(&self, worker: usize) -> Result<Record, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step(worker, call) {
            Some(Step::Ok { id, latency }) => {
                sleep(latency).await;
                Ok(record(&id))
            }
            Some(Step::Transport { latency }) => {
                sleep(latency).await;
                Err(FetchError::Transport("connection refused".to_string()))
            }
            Some(Step::Decode) => Err(serde_json::from_str::<Record>("{").unwrap_err().into()),
            None => Err(FetchError::Transport("script exhausted".to_string())),
        }
    }
}

use std::io::Write;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{config::OutputFormat, schema::Record, util};

/// ============================================================
/// RecordSink
/// ============================================================
///
/// Side-effecting end of the pipeline: receives every record the
/// consumer loop takes off the collector channel.
///
/// A sink error stops the consumer loop and is returned to the caller.
#[async_trait::async_trait]
pub trait RecordSink: Send {
    async fn deliver(&mut self, record: &Record) -> Result<()>;

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Human readable output:
///
/// ```text
/// Author: <author>
/// Quote: <content>
/// Tags: [<tag> <tag>]
/// ```
pub struct TextSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait::async_trait]
impl<W: Write + Send> RecordSink for TextSink<W> {
    async fn deliver(&mut self, record: &Record) -> Result<()> {
        writeln!(
            self.out,
            "Author: {}\nQuote: {}\nTags: {}\n",
            record.author,
            record.content,
            util::format_tags(&record.tags)
        )?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// One JSON object per line, stamped with the time it was received.
pub struct JsonSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait::async_trait]
impl<W: Write + Send> RecordSink for JsonSink<W> {
    async fn deliver(&mut self, record: &Record) -> Result<()> {
        let line = json!({
            "received_at": Utc::now().to_rfc3339(),
            "record": record,
        });
        writeln!(self.out, "{}", serde_json::to_string(&line)?)?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Stdout sink for the configured output format.
pub fn stdout_sink(format: OutputFormat) -> Box<dyn RecordSink> {
    match format {
        OutputFormat::Text => Box::new(TextSink::new(std::io::stdout())),
        OutputFormat::Json => Box::new(JsonSink::new(std::io::stdout())),
    }
}

/// Consumer loop.
///
/// Receives records until the collector channel is closed and hands
/// each one to `sink`. Returns the number of records delivered.
///
/// SHUTDOWN:
/// - Once `shutdown` fires the loop stops waiting on the token and
///   keeps draining; the channel closes as soon as the workers have
///   noticed the same token, so nothing already buffered is lost
pub async fn run_consumer<S>(
    mut records: mpsc::Receiver<Record>,
    sink: &mut S,
    shutdown: &CancellationToken,
) -> Result<u64>
where
    S: RecordSink + ?Sized,
{
    let mut delivered = 0u64;
    let mut draining = false;

    loop {
        let next = if draining {
            records.recv().await
        } else {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    log::info!("shutdown requested, draining {} buffered records", records.len());
                    draining = true;
                    continue;
                }
                next = records.recv() => next,
            }
        };

        let Some(record) = next else {
            break;
        };

        sink.deliver(&record).await?;
        delivered += 1;
    }

    sink.flush().await?;
    log::info!("collector channel closed after {delivered} records");
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::testing::record;

    /// Collects ids; optionally fails on a given id.
    #[derive(Default)]
    struct VecSink {
        ids: Vec<String>,
        fail_on: Option<String>,
    }

    #[async_trait::async_trait]
    impl RecordSink for VecSink {
        async fn deliver(&mut self, record: &Record) -> Result<()> {
            if self.fail_on.as_deref() == Some(record.id.as_str()) {
                anyhow::bail!("sink rejected {}", record.id);
            }
            self.ids.push(record.id.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_everything_until_closure() {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for id in ["a", "b", "c", "d", "e", "f"] {
                tx.send(record(id)).await.unwrap();
            }
        });

        let mut sink = VecSink::default();
        let delivered = run_consumer(rx, &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(delivered, 6);
        assert_eq!(sink.ids, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[tokio::test]
    async fn shutdown_drains_buffered_records() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(record("x")).await.unwrap();
        tx.send(record("y")).await.unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let closer = tokio::spawn(async move {
            tokio::task::yield_now().await;
            drop(tx);
        });

        let mut sink = VecSink::default();
        let delivered = run_consumer(rx, &mut sink, &shutdown).await.unwrap();
        closer.await.unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(sink.ids, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn sink_errors_stop_the_loop() {
        let (tx, rx) = mpsc::channel(4);
        for id in ["ok", "bad", "late"] {
            tx.send(record(id)).await.unwrap();
        }
        drop(tx);

        let mut sink = VecSink {
            fail_on: Some("bad".into()),
            ..VecSink::default()
        };
        let err = run_consumer(rx, &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert_eq!(sink.ids, vec!["ok"]);
    }

    #[tokio::test]
    async fn text_sink_renders_author_quote_and_tags() {
        let mut sink = TextSink::new(Vec::new());
        sink.deliver(&record("q")).await.unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "Author: Tester\nQuote: content of q\nTags: [test]\n\n");
    }

    #[tokio::test]
    async fn json_sink_writes_one_object_per_line() {
        let mut sink = JsonSink::new(Vec::new());
        sink.deliver(&record("a")).await.unwrap();
        sink.deliver(&record("b")).await.unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();

        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["record"]["_id"], "a");
        assert_eq!(lines[1]["record"]["authorSlug"], "tester");
        assert!(lines[0]["received_at"].is_string());
    }
}

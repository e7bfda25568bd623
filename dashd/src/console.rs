//! Console transport
//!
//! Streams live-status sessions as JSON lines, one `{"tool", "data"}` object
//! per snapshot.

use anyhow::{Context, Result};
use deskcheck_tools::{AppContext, Session};
use serde_json::{json, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Open sessions on `tool_ids`, or on every monitorable tool when empty
pub fn open_sessions(ctx: &AppContext, tool_ids: &[String]) -> Result<Vec<Session>> {
    let ids: Vec<String> = if tool_ids.is_empty() {
        ctx.dashboard()
            .into_iter()
            .filter(|s| s.monitorable)
            .map(|s| s.id)
            .collect()
    } else {
        tool_ids.to_vec()
    };

    ids.iter()
        .map(|id| ctx.watch(id).with_context(|| format!("Cannot watch {id}")))
        .collect()
}

/// Forward every session's snapshots to `out` until `cancel` fires or all
/// sessions end
pub async fn stream<W>(sessions: Vec<Session>, out: &mut W, cancel: CancellationToken) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::channel::<Value>(64);
    info!("Streaming {} session(s)", sessions.len());

    for mut session in sessions {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let snapshot = tokio::select! {
                    _ = cancel.cancelled() => break,
                    snapshot = session.recv() => snapshot,
                };
                let Some(data) = snapshot else { break };
                let line = json!({ "tool": session.tool_id(), "data": data });
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = rx.recv() => line,
        };
        let Some(line) = line else { break };

        let mut bytes = serde_json::to_vec(&line)?;
        bytes.push(b'\n');
        if let Err(e) = out.write_all(&bytes).await {
            warn!("Console output closed: {e}");
            break;
        }
        out.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskcheck_tools::{status_fn, strategy_fn, MonitorSpec, ResultMap, Tool, ToolboxConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn context(dir: &TempDir) -> AppContext {
        let mut config = ToolboxConfig::with_data_dir(dir.path());
        config.monitor.interval_ms = 1000;
        let ctx = AppContext::bootstrap(config).await.unwrap();

        let polls = Arc::new(AtomicUsize::new(0));
        ctx.register(
            Tool::executable("internet", strategy_fn(|_| async { Ok(ResultMap::new()) }))
                .with_monitor(MonitorSpec::new(status_fn(move || {
                    let polls = polls.clone();
                    async move {
                        let n = polls.fetch_add(1, Ordering::SeqCst);
                        json!({ "is_connected": n > 0 })
                    }
                }))),
        )
        .unwrap();
        ctx.register(Tool::toggle("low-wifi-notifs")).unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_default_watches_monitorable_tools() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;

        let sessions = open_sessions(&ctx, &[]).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].tool_id(), "internet");
    }

    #[tokio::test]
    async fn test_unmonitored_tool_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;

        let err = open_sessions(&ctx, &["low-wifi-notifs".to_string()]).unwrap_err();
        assert!(format!("{err:#}").contains("not monitorable"));

        let sessions = open_sessions(&ctx, &["internet".to_string()]).unwrap();
        assert!(format!("{sessions:?}").contains("internet"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_writes_json_lines() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;
        let sessions = open_sessions(&ctx, &[]).unwrap();

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            stopper.cancel();
        });

        let mut out = Vec::new();
        stream(sessions, &mut out, cancel).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        // the baseline is only replayed to later viewers, so the change is the
        // sole line
        assert_eq!(
            lines,
            vec![json!({"tool": "internet", "data": {"is_connected": true}})]
        );
    }
}

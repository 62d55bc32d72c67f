// ===============================
// src/recorder.rs
// ===============================
//
// JSONL recorder untuk event sesi (tick, signal, fill, note):
// - Satu Event per baris (dengan timestamp wall-clock ms), append ke file.
// - BufWriter, flush tiap 1s dan/atau tiap 256 event.
// - Parent directory dibuat otomatis.
// - Gagal tulis -> reopen sekali, kalau masih gagal event di-drop.
//
// Ini tap operasional saja; ledger in-memory tetap sumber kebenaran.
//
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 256;

#[derive(Debug, Serialize, Deserialize)]
pub struct Record {
    pub ts_ms: i64,
    pub event: Event,
}

async fn open_writer(path: &str) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, recording disabled");
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let rec = Record { ts_ms: Utc::now().timestamp_millis(), event: ev };
                let line = match serde_json::to_string(&rec) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip event");
                        continue;
                    }
                };

                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(?e, "recorder: write failed, attempting reopen");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e2) => {
                            error!(?e2, "recorder: reopen failed, stopped");
                            break;
                        }
                    }
                    if let Err(e2) = write_line(&mut writer, &line).await {
                        error!(?e2, "recorder: write failed again after reopen, drop event");
                        continue;
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TickEvent;

    #[tokio::test]
    async fn writes_one_json_object_per_line() {
        let dir = std::env::temp_dir().join(format!("straddle_rec_{}", std::process::id()));
        let path = dir.join("events.jsonl").to_string_lossy().to_string();
        let _ = std::fs::remove_file(&path);

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(rx, path.clone()));
        tx.send(Event::Note("hello".into())).await.unwrap();
        tx.send(Event::Tick(TickEvent { tick: 3, spot: 50.1, atm_strike: 50, atm_iv: Some(0.21), rv: 0.2 }))
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let rec: Record = serde_json::from_str(lines[1]).unwrap();
        assert!(rec.ts_ms > 0);
        assert!(matches!(rec.event, Event::Tick(t) if t.atm_strike == 50));
        let _ = std::fs::remove_dir_all(&dir);
    }
}

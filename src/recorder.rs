// ===============================
// src/recorder.rs
// ===============================
//
// JSONL recorder:
// - Satu `Event` per baris (md, ack, fill, action, snapshot, note).
// - BufWriter, flush tiap 1s dan/atau tiap 1000 event.
// - Parent directory dibuat otomatis.
// - Jika tulis gagal, coba reopen file dan lanjut.
//
// File hasil rekaman bisa diputar ulang sebagai backtest (REPLAY_FILE,
// lihat feed::ReplayFeed): hanya baris `Md` yang dipakai.
//
use std::path::Path;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::domain::{EngineEvent, Event};

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

/// Recorder line for an intake event. Timers are not recorded.
pub fn intake_event(ev: &EngineEvent) -> Option<Event> {
    match ev {
        EngineEvent::MarketData(md) => Some(Event::Md(md.clone())),
        EngineEvent::Ack(a) => Some(Event::Ack(a.clone())),
        EngineEvent::Fill(f) => Some(Event::Fill(f.clone())),
        EngineEvent::Timer { .. } => None,
    }
}

/// Non-blocking hand-off; a full recorder queue drops the line.
pub fn record(tx: &Option<mpsc::Sender<Event>>, ev: Event) {
    if let Some(tx) = tx {
        if let Err(e) = tx.try_send(ev) {
            warn!(error = %e, "recorder queue full, event dropped");
        }
    }
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
            error!(%path, error = %e, "recorder: open failed, recording disabled");
            return;
        }
    };
    info!(%path, "recorder: started");

    // Flush periodik (tiap 1 detik) + flush berbasis jumlah event
    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    // Channel closed: flush dan keluar
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let line = match serde_json::to_string(&ev) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(error = %e, "recorder: serialize error, skip event");
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(error = %e, "recorder: write failed, attempting reopen");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e) => {
                            error!(error = %e, "recorder: reopen failed, stopped");
                            break;
                        }
                    }
                    // coba lagi sekali setelah reopen
                    if let Err(e2) = write_line(&mut writer, &line).await {
                        error!(error = %e2, "recorder: write failed again after reopen, drop event");
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

use std::io::{stdout, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use clap::{ArgAction, Parser};
use crossterm::cursor::MoveToColumn;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::execute;
use crossterm::style::Print;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use upqueue::config::{Config, DEFAULT_CONFIG_FILE};
use upqueue::logging::init_logging;
use upqueue::{HttpTransport, UploadEvent, UploadManager, UploadStatus};

#[derive(Parser, Debug)]
#[command(name = "upqueue", version, about = "Resumable chunked file uploads")]
struct Cli {
    /// Config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Increase log verbosity (-v warn, -vv info, -vvv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Read p/r/c/q from the keyboard to pause, resume, cancel or quit
    #[arg(short, long)]
    interactive: bool,

    /// Print the files the server already holds and exit
    #[arg(long)]
    list: bool,

    /// Files to upload
    #[arg(required_unless_present = "list")]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let transport = HttpTransport::new(&config.endpoint, config.token.clone(), config.timeout())?;
    let handle = UploadManager::new(Arc::new(transport), config.upload_config());
    let manager = handle.manager.clone();

    if cli.list {
        for file in manager.list_files().await? {
            println!("{}\t{}\t{}", file.id, file.size, file.name);
        }
        handle.shutdown().await?;
        return Ok(());
    }

    let event_rx = manager.subscribe_events();
    let identifiers = manager.enqueue_many(cli.files.iter().cloned()).await?;
    info!("Queued {} file(s)", identifiers.len());

    let failed = if cli.interactive {
        enable_raw_mode()?;
        let keys = spawn_keyboard_reader();
        let outcome = watch(&manager, event_rx, Some(keys)).await;
        disable_raw_mode()?;
        outcome?
    } else {
        watch(&manager, event_rx, None).await?
    };

    handle.shutdown().await?;
    println!();

    if failed > 0 {
        anyhow::bail!("{} upload(s) failed", failed);
    }
    Ok(())
}

/// Render progress until nothing is left to transfer; returns the failed item count.
async fn watch(
    manager: &UploadManager,
    mut event_rx: broadcast::Receiver<UploadEvent>,
    mut keys: Option<mpsc::UnboundedReceiver<KeyCode>>,
) -> anyhow::Result<usize> {
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Ok(UploadEvent::OverallProgress { percent }) => render(percent)?,
                    Ok(UploadEvent::Completed { item, file }) => {
                        info!("{} uploaded as {}", item.file_name, file.path);
                    }
                    Ok(UploadEvent::Failed { identifier, reason }) => {
                        warn!("Upload {} failed: {}", identifier, reason);
                    }
                    Ok(UploadEvent::Cancelled { .. }) => {}
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            Some(code) = recv_key(&mut keys) => {
                if !handle_key(manager, code).await? {
                    break;
                }
            }
        }

        let items = manager.items().await?;
        if items.iter().all(|item| item.status == UploadStatus::Failed) {
            break;
        }
    }

    let items = manager.items().await?;
    Ok(items.iter().filter(|item| item.status == UploadStatus::Failed).count())
}

async fn recv_key(keys: &mut Option<mpsc::UnboundedReceiver<KeyCode>>) -> Option<KeyCode> {
    match keys {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Apply one key to every live item. `false` means quit.
async fn handle_key(manager: &UploadManager, code: KeyCode) -> anyhow::Result<bool> {
    let items = manager.items().await?;
    for item in items {
        let outcome = match (code, item.status) {
            (KeyCode::Char('q'), _) => return Ok(false),
            (KeyCode::Char('p'), UploadStatus::Pending) => manager.pause(&item.identifier).await,
            (KeyCode::Char('r'), UploadStatus::Paused) => manager.resume(&item.identifier).await,
            (KeyCode::Char('r'), UploadStatus::Failed) => manager.retry(&item.identifier).await,
            (KeyCode::Char('c'), _) => manager.cancel(&item.identifier).await,
            _ => Ok(()),
        };

        // The item may have moved on since the snapshot was taken.
        if let Err(err) = outcome {
            warn!("{}: {}", item.file_name, err);
        }
    }
    Ok(code != KeyCode::Char('q'))
}

fn render(percent: u8) -> anyhow::Result<()> {
    let mut out = stdout();
    execute!(
        out,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(format!("Uploading: {:>3}%", percent)),
    )?;
    out.flush()?;
    Ok(())
}

fn spawn_keyboard_reader() -> mpsc::UnboundedReceiver<KeyCode> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::task::spawn_blocking(move || {
        loop {
            match event::poll(Duration::from_millis(100)) {
                Ok(true) => {}
                Ok(false) => {
                    if tx.is_closed() {
                        break;
                    }
                    continue;
                }
                Err(_) => break,
            }

            if let Ok(Event::Key(KeyEvent { code, kind, .. })) = event::read() {
                if kind != KeyEventKind::Press {
                    continue;
                }
                if tx.send(code).is_err() {
                    break;
                }
            }
        }
    });

    rx
}

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use codedrop_core::{TransferDescriptor, generate_short_code};
use codedrop_peer::{
    PeerError, TransferEvent, host_session, join_session, receive_file, send_file,
};
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "codedrop")]
struct PeerArgs {
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    relay_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host a session and stream a file to whoever joins with the code.
    Send { file: PathBuf },
    /// Join a hosted session and save the received file.
    Recv {
        code: String,
        /// Destination path; defaults to the sender's file name.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = PeerArgs::parse();
    if let Err(err) = run(args).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(args: PeerArgs) -> Result<(), PeerError> {
    match args.command {
        Command::Send { file } => send(&args.relay_url, &file).await,
        Command::Recv { code, output } => recv(&args.relay_url, &code, output).await,
    }
}

async fn send(relay_url: &str, path: &Path) -> Result<(), PeerError> {
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_owned();
    let descriptor = TransferDescriptor {
        name: name.clone(),
        size,
        file_type: guess_file_type(path).to_owned(),
        thumbnail: None,
    };

    let code = generate_short_code();
    info!("hosting session {}; share this code with the receiver", code);

    let mut conn = host_session(relay_url, &code).await?;
    let events = spawn_event_logger();
    send_file(&mut conn, descriptor, &mut file, &events).await
}

async fn recv(relay_url: &str, code: &str, output: Option<PathBuf>) -> Result<(), PeerError> {
    let mut conn = join_session(relay_url, code).await?;
    let events = spawn_event_logger();
    let received = receive_file(&mut conn, &events).await?;

    // Never trust the sender's name as a path; keep the final component only.
    let default_name = Path::new(&received.descriptor.name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("received.bin")
        .to_owned();
    let path = output.unwrap_or_else(|| PathBuf::from(default_name));
    tokio::fs::write(&path, &received.contents).await?;
    info!("saved {} ({} bytes)", path.display(), received.contents.len());
    Ok(())
}

/// MIME type from the file extension. The descriptor carries it so the
/// receiving side can preview the file without sniffing bytes.
fn guess_file_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("txt" | "md" | "log") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        Some("zip") => "application/zip",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

fn spawn_event_logger() -> mpsc::UnboundedSender<TransferEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut last_logged_percent = 0_u64;
        while let Some(event) = rx.recv().await {
            match event {
                TransferEvent::PeerConnected => info!("peer connected"),
                TransferEvent::Started { descriptor } => {
                    info!("transferring {} ({} bytes)", descriptor.name, descriptor.size);
                    last_logged_percent = 0;
                }
                TransferEvent::Progress { transferred, total } => {
                    let percent = if total == 0 {
                        100
                    } else {
                        transferred * 100 / total
                    };
                    if percent >= last_logged_percent + 10 || percent == 100 {
                        info!("progress {}%", percent);
                        last_logged_percent = percent;
                    }
                }
                TransferEvent::Completed => info!("transfer complete"),
            }
        }
    });
    tx
}

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedWriteHalf},
    select,
};
use tracing::warn;

use crate::{cli::ConnectArgs, config::DEFAULT_MAX_CHUNK};

/// Inputs that end the client without telling the relay anything.
const QUIT_COMMANDS: &[&str] = &["!q", "quit", "exit"];

pub async fn run(args: ConnectArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    write_stdout(&format!("*** connected to {}", args.server)).await?;

    let (mut reader, mut writer) = stream.into_split();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut incoming = vec![0u8; DEFAULT_MAX_CHUNK];

    loop {
        select! {
            read = reader.read(&mut incoming) => {
                if !handle_incoming(read, &incoming).await? {
                    break;
                }
            }
            line = stdin.next_line() => {
                if !handle_stdin_line(line, &mut writer).await? {
                    break;
                }
            }
        }
    }

    shutdown_connection(&mut writer).await;
    Ok(())
}

pub fn is_quit_command(input: &str) -> bool {
    QUIT_COMMANDS.contains(&input.trim())
}

async fn handle_incoming(read: io::Result<usize>, buffer: &[u8]) -> Result<bool> {
    let len = read.context("failed to read from relay")?;
    if len == 0 {
        write_stdout("*** server closed the connection").await?;
        return Ok(false);
    }

    let text = String::from_utf8_lossy(&buffer[..len]);
    write_stdout(text.trim_end_matches(['\r', '\n'])).await?;
    Ok(true)
}

async fn handle_stdin_line(
    line: io::Result<Option<String>>,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let Some(line) = line? else {
        return Ok(false);
    };

    if is_quit_command(&line) {
        write_stdout("*** leaving").await?;
        return Ok(false);
    }

    let text = line.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    let mut outgoing = Vec::with_capacity(text.len() + 1);
    outgoing.extend_from_slice(text.as_bytes());
    outgoing.push(b'\n');
    writer
        .write_all(&outgoing)
        .await
        .context("failed to send line to relay")?;
    Ok(true)
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

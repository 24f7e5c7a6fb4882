//! Line-protocol TCP server: one task per connection.
//!
//! The wire codec for real MySQL clients is an external collaborator; this
//! server speaks the shell's statement language over newline-delimited
//! text, which is enough to drive the engine end-to-end. Responses are the
//! rendered outcome followed by an `OK` line, or a single
//! `ERR <code> <sqlstate> <message>` line. A failed connection never takes
//! down the accept loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use sqlexec::storage::ExecCtx;

use crate::engine::{Engine, SessionState};
use crate::show::render;
use crate::statement::{parse, Statement};

/// Binds and serves until `running` goes false. Bind failures surface to the
/// caller (exit code 2 at the binary edge).
pub async fn serve(
    engine: Arc<Engine>,
    host: &str,
    port: u16,
    running: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    log::info!("listening on {}:{}", host, port);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        log::debug!("connection from {}", peer);
                        let engine = engine.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(engine, socket).await {
                                log::debug!("connection {} ended: {}", peer, err);
                            }
                        });
                    }
                    Err(err) => {
                        log::error!("accept failed: {}", err);
                    }
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }
    log::info!("server stopped");
    Ok(())
}

async fn handle_connection(engine: Arc<Engine>, socket: TcpStream) -> std::io::Result<()> {
    let (read_half, mut writer) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut state = SessionState::new();

    writer.write_all(b"sqlexec ready\n").await?;
    while let Some(line) = lines.next_line().await? {
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        let statement = match parse(query) {
            Ok(statement) => statement,
            Err(err) => {
                let reply =
                    format!("ERR {} {} {}\n", err.code(), err.sqlstate(), err);
                writer.write_all(reply.as_bytes()).await?;
                continue;
            }
        };
        if statement == Statement::Exit {
            writer.write_all(b"OK bye\n").await?;
            break;
        }
        match engine.execute(&ExecCtx::none(), &mut state, statement) {
            Ok(outcome) => {
                writer.write_all(render(&outcome).as_bytes()).await?;
                writer.write_all(b"\nOK\n").await?;
            }
            Err(err) => {
                // Statement errors keep the connection open.
                let reply =
                    format!("ERR {} {} {}\n", err.code(), err.sqlstate(), err);
                writer.write_all(reply.as_bytes()).await?;
            }
        }
    }
    Ok(())
}

//! Interactive and piped sessions against the engine.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use colored::Colorize;
use log::info;
use rustyline::config::Builder;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Editor};
use tokio::time::Instant;

use sqlexec::storage::ExecCtx;

use crate::config::DEFAULT_PROMPT;
use crate::engine::{Engine, SessionState};
use crate::show::{render, timing_line};
use crate::statement::{parse, Statement};

/// One client session: engine handle, open-transaction state, and the REPL
/// or reader loop driving it.
pub struct Session {
    engine: Arc<Engine>,
    state: SessionState,
    is_repl: bool,
    running: Arc<AtomicBool>,
}

impl Session {
    pub fn new(engine: Arc<Engine>, is_repl: bool, running: Arc<AtomicBool>) -> Self {
        if is_repl {
            println!("Welcome to {}.", DEFAULT_PROMPT);
            println!();
        }
        Session { engine, state: SessionState::new(), is_repl, running }
    }

    fn prompt(&self) -> String {
        if self.state.in_transaction() {
            format!("{}*> ", DEFAULT_PROMPT)
        } else {
            format!("{} > ", DEFAULT_PROMPT)
        }
    }

    pub async fn handle_repl(&mut self) {
        let config = Builder::new()
            .completion_prompt_limit(5)
            .completion_type(CompletionType::Circular)
            .build();
        let mut rl = match Editor::<(), DefaultHistory>::with_config(config) {
            Ok(rl) => rl,
            Err(err) => {
                eprintln!("cannot start line editor: {}", err);
                return;
            }
        };
        let _ = rl.load_history(&get_history_path());

        'F: loop {
            if !self.running.load(Ordering::SeqCst) {
                break 'F;
            }
            match rl.readline(&self.prompt()) {
                Ok(line) => {
                    let query = line.trim();
                    if query.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(query);
                    match self.handle_query(query) {
                        Ok(true) => {}
                        Ok(false) => break 'F,
                        Err(err) => {
                            eprintln!(
                                "{} {} ({}): {}",
                                "error".red(),
                                err.code(),
                                err.sqlstate(),
                                err
                            );
                        }
                    }
                }
                Err(e) => match e {
                    ReadlineError::Io(err) => {
                        eprintln!("io err: {err}");
                    }
                    ReadlineError::Interrupted => {
                        println!("^C");
                        self.running.store(false, Ordering::SeqCst);
                    }
                    ReadlineError::Eof => {
                        break;
                    }
                    _ => {}
                },
            }
        }

        println!("Bye~");
        let _ = rl.save_history(&get_history_path());
    }

    /// Runs statements from a reader (piped stdin), one per line.
    pub async fn handle_reader<R: BufRead>(&mut self, r: R) -> Result<()> {
        let start = Instant::now();
        for line in r.lines() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let line = line.map_err(|e| anyhow!("read lines err: {}", e))?;
            let query = line.trim();
            if query.is_empty() {
                continue;
            }
            match self.handle_query(query) {
                Ok(true) => {}
                Ok(false) => break,
                // Statement errors leave the session alive, piped or not.
                Err(err) => eprintln!("error: {}", err),
            }
        }
        info!("reader session finished in {:.3}s", start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Executes one statement; false means the session asked to end.
    fn handle_query(&mut self, query: &str) -> sqlexec::error::CResult<bool> {
        let started = Instant::now();
        let statement = parse(query)?;
        if statement == Statement::Exit {
            return Ok(false);
        }
        info!("execute: {}", query);
        let outcome = self.engine.execute(&ExecCtx::none(), &mut self.state, statement)?;
        println!("{}", render(&outcome));
        if self.is_repl {
            eprintln!("{}", timing_line(started.elapsed().as_secs_f64()));
            eprintln!();
        }
        Ok(true)
    }
}

fn get_history_path() -> String {
    format!(
        "{}/.sqlexec_history",
        std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
    )
}

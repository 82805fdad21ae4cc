//! Interactive command loop.
//!
//! Reads whitespace-terminated lines from stdin and dispatches to the
//! search engine. A running `find` is interrupted by the next input line,
//! whatever it is.

use anyhow::Result;
use findex_engine::{SearchEngine, StatusResult};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::logging::LogToggle;

/// Matches shown per `find` before the stream is cut off.
const FIND_LIMIT: usize = 20;

const HELP: &str = "\
commands:
  find <query>    stream up to 20 matches (interrupted by the next input line)
  status          print index status
  enable-logging  verbose logging on
  <empty line>    verbose logging off
  gc | memory     report process memory
  error           force an index failure (tests the restart path)
  help            this list
  stop            shut down and exit";

pub async fn run(engine: SearchEngine, logs: LogToggle) -> Result<()> {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut active_find: Option<tokio::task::JoinHandle<()>> = None;

  println!("findex ready; type `help` for commands");

  loop {
    let line = tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        println!();
        break;
      }
      line = lines.next_line() => match line? {
        Some(line) => line,
        None => break, // stdin closed
      },
    };

    // Any new input interrupts a streaming find.
    if let Some(task) = active_find.take() {
      task.abort();
    }

    let trimmed = line.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    match parts.next().unwrap_or("") {
      "" => {
        logs.set_verbose(false);
      }
      "find" => {
        let query = parts.next().unwrap_or("").trim().to_string();
        let engine = engine.clone();
        active_find = Some(tokio::spawn(run_find(engine, query)));
      }
      "status" => {
        print_status(&engine.index_status().await);
      }
      "enable-logging" => {
        logs.set_verbose(true);
        println!("verbose logging enabled (empty line disables)");
      }
      "gc" | "memory" => {
        println!("{}", memory_report());
      }
      "error" => {
        debug!("injecting index failure on request");
        engine.inject_failure("requested from shell").await;
        println!("failure injected; watch `status` while the index restarts");
      }
      "help" => {
        println!("{HELP}");
      }
      "stop" => break,
      other => {
        println!("unknown command `{other}`; type `help` for the list");
      }
    }
  }

  engine.shutdown().await;
  println!("stopped");
  Ok(())
}

async fn run_find(engine: SearchEngine, query: String) {
  let mut stream = engine.find(&query).await;
  if stream.is_incomplete() {
    println!("warning: results may be incomplete (index is syncing or broken)");
  }

  let mut shown = 0usize;
  while shown < FIND_LIMIT {
    match stream.recv().await {
      Some(result) => {
        println!("{}:{}: {}", result.path, result.line_no, result.line);
        shown += 1;
      }
      None => break,
    }
  }
  if shown == FIND_LIMIT {
    println!("(stopped after {FIND_LIMIT} matches)");
  } else {
    println!("({shown} matches)");
  }

  if engine.changed_since(&stream).await {
    println!("warning: directory changed during search");
  }
}

fn print_status(status: &StatusResult) {
  if status.is_broken {
    println!("index is broken; queries will miss results until a generation restarts");
  }
  println!("indexed files:  {}", status.indexed_files);
  println!("known tokens:   {}", status.known_tokens);
  println!(
    "modifications:  {} handled / {} observed",
    status.handled_modifications, status.total_modifications
  );
  match status.watcher_start_time {
    Some(elapsed) => println!("watcher start:  {elapsed:?}"),
    None => println!("watcher start:  n/a"),
  }
  match status.initial_sync_time {
    Some(elapsed) => println!("initial sync:   {elapsed:?}"),
    None => println!("initial sync:   not finished"),
  }
}

#[cfg(target_os = "linux")]
fn memory_report() -> String {
  let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
    return "process memory info not available".to_string();
  };
  let mut out = String::new();
  for line in status.lines() {
    if let Some(rest) = line.strip_prefix("VmRSS:") {
      out.push_str(&format!("resident set: {}", rest.trim()));
    } else if let Some(rest) = line.strip_prefix("VmPeak:") {
      out.push_str(&format!("peak virtual: {}\n", rest.trim()));
    }
  }
  if out.is_empty() {
    "process memory info not available".to_string()
  } else {
    out
  }
}

#[cfg(not(target_os = "linux"))]
fn memory_report() -> String {
  "process memory info not available on this platform".to_string()
}

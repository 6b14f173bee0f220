pub mod helper;
pub mod history;
pub mod multiline;

use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Config, Editor, ExternalPrinter};

use crate::eval;
use crate::eval::session::ConsoleSession;
use crate::repl::helper::{ReplHelper, SharedIndex};
use crate::repl::history::History;

const PROMPT: &str = ">> ";
const EVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the interactive loop needs from the console orchestration.
pub struct ReplOptions {
    pub scratch_dir: PathBuf,
    pub state_path: PathBuf,
    pub var_files: Vec<String>,
    pub index: SharedIndex,
}

/// A boxed printer the refresher can use to write above the active prompt.
pub type Printer = Box<dyn ExternalPrinter + Send>;

/// Run the interactive loop on the current (blocking) thread. `handle` drives
/// evaluations on the async runtime; the created external printer is handed
/// back through `printer_tx` for background notifications. rustyline owns raw
/// mode, bracketed paste and terminal restoration on exit.
pub fn run(
    handle: tokio::runtime::Handle,
    opts: ReplOptions,
    printer_tx: std_mpsc::Sender<Printer>,
) -> Result<()> {
    let config = Config::builder()
        .completion_type(CompletionType::Circular)
        .auto_add_history(false)
        .build();
    let mut rl: Editor<ReplHelper, DefaultHistory> =
        Editor::with_config(config).context("init line editor")?;
    rl.set_helper(Some(ReplHelper::new(opts.index.clone())));

    let history_path = opts.scratch_dir.join(".terraflow_history");
    let mut history = History::load(&history_path);
    for entry in history.entries() {
        let _ = rl.add_history_entry(entry);
    }

    if let Ok(printer) = rl.create_external_printer() {
        let _ = printer_tx.send(Box::new(printer));
    }
    drop(printer_tx);

    loop {
        match rl.readline(PROMPT) {
            Ok(raw) => {
                if raw.trim().is_empty() {
                    continue;
                }
                if matches!(raw.trim(), "exit" | "quit") {
                    return Ok(());
                }
                // Pasted multi-line collections gain the commas the
                // single-line form needs; history stores the flattened line.
                let eval_input = multiline::normalize_commas(&raw);
                let history_line = multiline::normalize_for_history(&raw);
                let _ = rl.add_history_entry(history_line.as_str());
                if let Err(err) = history.record(&history_line) {
                    tracing::warn!(error = %err, "history write failed");
                }
                let (stdout, stderr) = handle.block_on(evaluate_line(&opts, &eval_input));
                if !stdout.is_empty() {
                    print!("{stdout}");
                    if !stdout.ends_with('\n') {
                        println!();
                    }
                }
                if !stderr.is_empty() {
                    eprint!("{stderr}");
                    if !stderr.ends_with('\n') {
                        eprintln!();
                    }
                }
            }
            // Ctrl+C clears the current input without touching evaluations in
            // flight.
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return Ok(()),
            Err(err) => return Err(err).context("read input"),
        }
    }
}

/// Dual-path prompt evaluation: the in-process fast path, then the persistent
/// multiplexed console, then a short-lived `terraform console` whose output
/// (including stderr diagnostics) is mirrored verbatim.
pub async fn evaluate_line(opts: &ReplOptions, line: &str) -> (String, String) {
    if let Some(v) = eval::fast::try_eval_in_process(&opts.scratch_dir, &opts.var_files, line) {
        return (render_value(&v), String::new());
    }
    let pe = eval::persistent::get_or_start(&opts.scratch_dir, &opts.state_path, &opts.var_files);
    if let Some(v) = pe.evaluate_json(line, EVAL_TIMEOUT).await {
        return (render_value(&v), String::new());
    }
    let session = ConsoleSession::new(&opts.scratch_dir, Some(&opts.state_path), &opts.var_files);
    match session.evaluate(line, EVAL_TIMEOUT).await {
        Ok((stdout, stderr)) => (stdout, stderr),
        Err(err) => (String::new(), format!("{err}")),
    }
}

fn render_value(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

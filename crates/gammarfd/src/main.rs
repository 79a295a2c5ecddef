//! `gammarfd` — the gammarf station daemon binary (spec.md §6.4).
//!
//! Boots the kernel against `gammarf.conf` in the current directory,
//! then drives an interactive REPL with history and tab completion until
//! `quit` is entered or the process receives SIGINT/SIGTERM.
//!
//! Vendor SDR driver bindings (spec.md §6.3) are external collaborators
//! out of scope for this crate; this binary wires [`gammarf::devices::NoWideBandDriver`]
//! and [`gammarf::devices::NoNarrowBandDriver`] by default; a deployment with real
//! hardware attached links in a crate that implements [`gammarf::devices::WideBandDriver`]
//! / [`gammarf::devices::NarrowBandDriver`] against libhackrf/librtlsdr and passes
//! those instead.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use rustyline::completion::{extract_word, Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context as RlContext, Editor, Helper};

use gammarf::devices::{NoNarrowBandDriver, NoWideBandDriver};
use gammarf::kernel::{Kernel, KernelContext};
use gammarf::modules::ModuleRegistry;
use gammarf::repl::{self, DispatchOutcome};

/// gammarf radio-sensing station node
#[derive(Parser, Debug)]
#[command(name = "gammarfd", version, about)]
struct Args {
    /// Path to the station's configuration file.
    #[arg(long, default_value = "gammarf.conf")]
    config: PathBuf,

    /// Log level passed to env_logger (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct GammarfHelper {
    ctx: KernelContext,
    modules: Arc<ModuleRegistry>,
}

impl Completer for GammarfHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _rl_ctx: &RlContext<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let (start, word) = extract_word(line, pos, None, char::is_whitespace);
        let prior_words: Vec<&str> = line[..start].split_whitespace().collect();
        let word_index = prior_words.len();

        let candidates = repl::complete(&self.ctx, &self.modules, &prior_words, word_index);
        let pairs = candidates
            .into_iter()
            .filter(|c| c.starts_with(word))
            .map(|c| Pair {
                display: c.clone(),
                replacement: c,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Hinter for GammarfHelper {
    type Hint = String;
}

impl Highlighter for GammarfHelper {}
impl Validator for GammarfHelper {}
impl Helper for GammarfHelper {}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level)).init();

    let kernel = match Kernel::boot(&args.config, &NoWideBandDriver, &NoNarrowBandDriver) {
        Ok(k) => k,
        Err(e) => {
            eprintln!("fatal: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let ctrlc_stop = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        ctrlc_stop.store(true, Ordering::SeqCst);
    }) {
        log::warn!("could not install signal handler: {}", e);
    }

    run_repl(&kernel, stop);

    kernel.shutdown();
    ExitCode::SUCCESS
}

fn run_repl(kernel: &Kernel, stop: Arc<AtomicBool>) {
    let stationid = kernel.config.connector.station_id.clone();
    let ctx = kernel.context();
    let modules = kernel.modules.clone();

    let mut rl = match Editor::<GammarfHelper, DefaultHistory>::new() {
        Ok(rl) => rl,
        Err(e) => {
            log::error!("could not start REPL: {}", e);
            return;
        }
    };
    rl.set_helper(Some(GammarfHelper {
        ctx: ctx.clone(),
        modules: modules.clone(),
    }));

    let prompt = repl::prompt(&stationid);

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        match rl.readline(&prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                let Some((cmd, rest)) = repl::split_input(&line) else {
                    continue;
                };
                match repl::dispatch(&ctx, &modules, &stationid, &cmd, rest.as_deref()) {
                    DispatchOutcome::Quit => break,
                    DispatchOutcome::Continue => {}
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                log::error!("readline error: {}", e);
                break;
            }
        }
    }
}

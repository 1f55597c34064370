use anyhow::{bail, Context as _, Result};
use crossbeam_channel::Sender;
use scopes_core::client::{ListenerBase, SearchListener};
use scopes_core::completion::{CompletionDetails, CompletionStatus};
use scopes_core::config::RuntimeConfig;
use scopes_core::provider::{PreviewQueryBase, QueryBase, ScopeBase, SearchQueryBase};
use scopes_core::query::{ActionMetadata, CannedQuery, ScopeResult, SearchMetadata};
use scopes_core::reply::{PreviewReplyProxy, SearchReplyProxy};
use scopes_core::runtime::Runtime;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(cmd) = args.next() else {
        print_help();
        return Ok(());
    };

    match cmd.as_str() {
        "race-soak" => cmd_race_soak(args.collect()),
        "gate" => cmd_gate(args.collect()),
        "help" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => {
            print_help();
            bail!("unknown xtask command: {other}");
        }
    }
}

fn print_help() {
    eprintln!(
        r#"xtask (scopes)

Commands:
  race-soak   Race run against cancel and check every query finishes exactly once
  gate        Run the workspace gate (tests, checks, race soak)

Examples:
  cargo run -p xtask -- race-soak --queries 500 --seed 7 --kind thread
  cargo run -p xtask -- gate --queries 200
"#
    );
}

#[derive(Clone)]
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u64(&mut self) -> u64 {
        // splitmix64
        self.0 = self.0.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    fn gen_range_u64(&mut self, max_exclusive: u64) -> u64 {
        if max_exclusive == 0 {
            return 0;
        }
        self.next_u64() % max_exclusive
    }
}

/// Search provider whose query string is `"{sleep_ms}:{pushes}"`.
struct SoakScope;

struct SoakQuery {
    sleep: Duration,
    pushes: u32,
}

impl QueryBase for SoakQuery {}

impl SearchQueryBase for SoakQuery {
    fn run(&self, reply: SearchReplyProxy) -> Result<()> {
        thread::sleep(self.sleep);
        for ix in 0..self.pushes {
            if !reply.push(&ScopeResult::new(format!("soak:{ix}"), "soak")) {
                break;
            }
        }
        Ok(())
    }
}

impl PreviewQueryBase for SoakQuery {
    fn run(&self, _reply: PreviewReplyProxy) -> Result<()> {
        Ok(())
    }
}

impl ScopeBase for SoakScope {
    fn search(
        &self,
        query: &CannedQuery,
        _metadata: &SearchMetadata,
    ) -> Result<Arc<dyn SearchQueryBase>> {
        let (sleep, pushes) = query
            .query_string
            .split_once(':')
            .context("soak query must be sleep:pushes")?;
        Ok(Arc::new(SoakQuery {
            sleep: Duration::from_millis(sleep.parse()?),
            pushes: pushes.parse()?,
        }))
    }

    fn preview(
        &self,
        _result: &ScopeResult,
        _metadata: &ActionMetadata,
    ) -> Result<Arc<dyn PreviewQueryBase>> {
        Ok(Arc::new(SoakQuery {
            sleep: Duration::ZERO,
            pushes: 0,
        }))
    }
}

struct SoakListener {
    id: usize,
    finished: Sender<(usize, CompletionStatus)>,
}

impl ListenerBase for SoakListener {
    fn finished(&self, details: CompletionDetails) {
        let _ = self.finished.send((self.id, details.status));
    }
}

impl SearchListener for SoakListener {
    fn push(&self, _result: ScopeResult) {}
}

struct RaceSoakArgs {
    queries: usize,
    seed: u64,
    kind: String,
    max_delay_ms: u64,
}

fn cmd_race_soak(args: Vec<String>) -> Result<()> {
    let args = parse_race_soak_args(args)?;
    let endpoint_dir = std::env::temp_dir()
        .join(format!("scopes-race-soak-{}", std::process::id()))
        .display()
        .to_string();
    let config = RuntimeConfig {
        default_middleware: args.kind.clone(),
        ..RuntimeConfig::with_endpoint_dir(endpoint_dir)
    };
    let runtime = Runtime::with_config("race-soak", config)?;
    let scope = runtime.run_scope("soak", Arc::new(SoakScope))?;

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut rng = Rng::new(args.seed);
    let started = Instant::now();
    let mut cancelled = 0usize;

    for id in 0..args.queries {
        let sleep = rng.gen_range_u64(args.max_delay_ms + 1);
        let pushes = rng.gen_range_u64(4);
        let listener = Arc::new(SoakListener {
            id,
            finished: tx.clone(),
        });
        let ctrl = scope
            .search(&format!("{sleep}:{pushes}"), SearchMetadata::default(), listener)
            .with_context(|| format!("start query {id}"))?;
        if rng.gen_range_u64(2) == 0 {
            thread::sleep(Duration::from_millis(rng.gen_range_u64(args.max_delay_ms + 1)));
            ctrl.cancel();
            cancelled += 1;
        }
    }
    drop(tx);

    let mut outcomes: BTreeMap<usize, Vec<CompletionStatus>> = BTreeMap::new();
    let deadline = Instant::now() + Duration::from_secs(30);
    while outcomes.values().map(Vec::len).sum::<usize>() < args.queries {
        let left = deadline.saturating_duration_since(Instant::now());
        let Ok((id, status)) = rx.recv_timeout(left) else {
            bail!(
                "race-soak: only {} of {} queries finished",
                outcomes.len(),
                args.queries
            );
        };
        outcomes.entry(id).or_default().push(status);
    }
    // Late duplicates would show up here.
    thread::sleep(Duration::from_millis(100));
    while let Ok((id, status)) = rx.try_recv() {
        outcomes.entry(id).or_default().push(status);
    }

    if outcomes.len() != args.queries {
        bail!(
            "race-soak: {} of {} queries finished",
            outcomes.len(),
            args.queries
        );
    }
    let mut by_status: BTreeMap<&'static str, usize> = BTreeMap::new();
    for (id, statuses) in &outcomes {
        if statuses.len() != 1 {
            bail!("query {id} finished {} times: {statuses:?}", statuses.len());
        }
        if statuses[0] == CompletionStatus::Error {
            bail!("query {id} finished with an error");
        }
        *by_status.entry(statuses[0].as_tag()).or_default() += 1;
    }

    runtime.destroy();
    eprintln!(
        "race-soak: OK\n  kind: {}\n  queries: {}\n  cancel_requests: {}\n  outcomes: {:?}\n  time_ms: {}",
        args.kind,
        args.queries,
        cancelled,
        by_status,
        started.elapsed().as_millis()
    );
    Ok(())
}

fn parse_race_soak_args(args: Vec<String>) -> Result<RaceSoakArgs> {
    let mut queries: usize = 200;
    let mut seed: u64 = 1;
    let mut kind = "queue".to_string();
    let mut max_delay_ms: u64 = 5;

    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--queries" => queries = it.next().context("--queries requires a value")?.parse()?,
            "--seed" => seed = it.next().context("--seed requires a value")?.parse()?,
            "--kind" => kind = it.next().context("--kind requires a value")?,
            "--max-delay-ms" => {
                max_delay_ms = it
                    .next()
                    .context("--max-delay-ms requires a value")?
                    .parse()?
            }
            other => bail!("unknown race-soak arg: {other}"),
        }
    }

    Ok(RaceSoakArgs {
        queries,
        seed,
        kind,
        max_delay_ms,
    })
}

fn cmd_gate(args: Vec<String>) -> Result<()> {
    let mut queries = "200".to_string();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--queries" => {
                let raw = it.next().context("--queries requires a value")?;
                raw.parse::<usize>()
                    .with_context(|| format!("invalid --queries: {raw}"))?;
                queries = raw;
            }
            other => bail!("unknown gate arg: {other}"),
        }
    }

    let workspace_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .canonicalize()
        .context("resolve workspace root")?;

    run_command_step(
        "core-tests",
        &workspace_root,
        "cargo",
        &["test", "-p", "scopes-core"],
    )?;
    run_command_step(
        "demo-runner",
        &workspace_root,
        "cargo",
        &["run", "-q", "-p", "scopes-demo-runner"],
    )?;
    run_command_step(
        "xtask-check",
        &workspace_root,
        "cargo",
        &["check", "-p", "xtask"],
    )?;
    for kind in ["queue", "thread"] {
        run_command_step(
            &format!("race-soak-{kind}"),
            &workspace_root,
            "cargo",
            &[
                "run", "-q", "-p", "xtask", "--", "race-soak", "--kind", kind, "--queries",
                &queries,
            ],
        )?;
    }

    eprintln!("gate: OK");
    Ok(())
}

fn run_command_step(name: &str, cwd: &std::path::Path, program: &str, args: &[&str]) -> Result<()> {
    eprintln!("\n==> [{name}] {program} {}", args.join(" "));
    let status = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .status()
        .with_context(|| format!("spawn step failed: {name}"))?;
    if !status.success() {
        bail!("step failed: {name}");
    }
    Ok(())
}

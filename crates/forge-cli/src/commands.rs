//! Subcommand handlers; each returns the process exit code

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::ArgMatches;
use tokio::sync::mpsc::UnboundedReceiver;

use forge_core::guard::{StabilityGuard, SystemClock};
use forge_core::sandbox::{CancelToken, Sandbox};
use forge_core::sprt::{Decision, SequentialValidator, SprtParams, Trial};
use forge_core::{
    BacklogFile, BreachScanner, EventSink, ForgeConfig, ForgeError, MutationTask, Orchestrator,
    PrioritizedSource, ProgressEvent, TaskSource,
};
use forge_uplink::Uplink;

use crate::output::{guard_table, Output, SprtReport};

/// Settings shared by every subcommand
struct Context {
    root: PathBuf,
    config: ForgeConfig,
    output: Output,
}

impl Context {
    fn load(matches: &ArgMatches) -> Result<Self> {
        let root = matches
            .get_one::<PathBuf>("root")
            .cloned()
            .unwrap_or_else(|| PathBuf::from("."));
        let root = std::fs::canonicalize(&root)
            .with_context(|| format!("project root {} not found", root.display()))?;
        let config = match matches.get_one::<PathBuf>("config") {
            Some(path) => ForgeConfig::load(path)?,
            None => ForgeConfig::discover(&root)?,
        };
        Ok(Self {
            root,
            config,
            output: Output::new(matches.get_flag("json")),
        })
    }

    fn guard(&self) -> StabilityGuard {
        StabilityGuard::with_config(&self.root, self.config.guard.clone(), Arc::new(SystemClock))
    }

    async fn orchestrator(
        &self,
        native: bool,
        tasks: Option<Arc<dyn TaskSource>>,
    ) -> Result<Orchestrator> {
        let mut sandbox_config = self.config.sandbox.clone();
        if native {
            sandbox_config = sandbox_config.native_only();
        }
        let sandbox = Arc::new(Sandbox::connect(sandbox_config).await);
        let uplink = Arc::new(Uplink::from_env(&self.config.uplink)?);
        let mut builder = Orchestrator::builder(&self.root)
            .config(self.config.clone())
            .generator(uplink.clone())
            .test_generator(uplink)
            .sandbox(sandbox);
        if let Some(tasks) = tasks {
            builder = builder.tasks(tasks);
        }
        Ok(builder.build()?)
    }
}

pub(crate) async fn dispatch(matches: &ArgMatches) -> Result<i32> {
    let ctx = Context::load(matches)?;
    match matches.subcommand() {
        Some(("run", args)) => run(&ctx, args).await,
        Some(("next", args)) => next(&ctx, args).await,
        Some(("guard", args)) => match args.subcommand() {
            Some(("status", args)) => guard_status(&ctx, args.get_one::<PathBuf>("file")),
            Some(("unlock", args)) => match args.get_one::<PathBuf>("file") {
                Some(file) => guard_unlock(&ctx, file),
                None => bail!("guard unlock needs a file"),
            },
            _ => bail!("unknown guard command"),
        },
        Some(("sprt", args)) => sprt(&ctx, args),
        _ => bail!("no command given"),
    }
}

async fn run(ctx: &Context, args: &ArgMatches) -> Result<i32> {
    let (Some(task), Some(file)) = (
        args.get_one::<String>("task"),
        args.get_one::<PathBuf>("file"),
    ) else {
        bail!("run needs --task and --file");
    };
    let forge = ctx.orchestrator(args.get_flag("native"), None).await?;
    let task = MutationTask::new(file.clone(), task.clone());
    tracing::info!(task = %task.id, file = %file.display(), "starting");

    let cancel = CancelToken::new();
    let (sink, events) = EventSink::channel();
    let result = stream(forge.run(task, &sink, &cancel), events, &cancel, ctx.output).await;
    Ok(exit_code(&result.map(|_| ())))
}

async fn next(ctx: &Context, args: &ArgMatches) -> Result<i32> {
    let backlog: Arc<dyn TaskSource> =
        Arc::new(BacklogFile::new(ctx.root.join(&ctx.config.tasks.backlog)));
    let tasks: Arc<dyn TaskSource> = if args.get_flag("scan") || ctx.config.tasks.scan_breaches {
        Arc::new(
            PrioritizedSource::new()
                .then(Arc::new(BreachScanner::new(&ctx.root)))
                .then(backlog),
        )
    } else {
        backlog
    };
    let forge = ctx.orchestrator(args.get_flag("native"), Some(tasks)).await?;

    let cancel = CancelToken::new();
    let (sink, events) = EventSink::channel();
    let result = stream(forge.run_next(&sink, &cancel), events, &cancel, ctx.output).await;
    Ok(exit_code(&result.map(|_| ())))
}

fn guard_status(ctx: &Context, file: Option<&PathBuf>) -> Result<i32> {
    let guard = ctx.guard();
    let mut records = guard.records()?;
    if let Some(file) = file {
        let key = relative_key(&ctx.root, file);
        records.retain(|path, _| *path == key);
    }
    if ctx.output.is_json() {
        ctx.output.value(&records);
    } else {
        ctx.output.text(&guard_table(&records, guard.config()));
    }
    Ok(0)
}

fn guard_unlock(ctx: &Context, file: &Path) -> Result<i32> {
    let guard = ctx.guard();
    let key = relative_key(&ctx.root, file);
    if !guard.unlock(Path::new(&key))? {
        bail!("no stability record for {key}");
    }
    if ctx.output.is_json() {
        ctx.output.value(&serde_json::json!({ "unlocked": key }));
    } else {
        ctx.output.text(&format!("unlocked {key}\n"));
    }
    Ok(0)
}

fn sprt(ctx: &Context, args: &ArgMatches) -> Result<i32> {
    let Some(source) = args.get_one::<String>("observations") else {
        bail!("sprt needs an observation array");
    };
    let observations = parse_observations(source)?;

    let defaults = ctx.config.sprt;
    let rate = |name: &str, default: f64| args.get_one::<f64>(name).copied().unwrap_or(default);
    let params = SprtParams::new(
        rate("alpha", defaults.alpha),
        rate("beta", defaults.beta),
        rate("p0", defaults.p0),
        rate("p1", defaults.p1),
    )?;
    let trials = Trial::from_observations(&observations)?;
    let verdict = SequentialValidator::new(params).evaluate(&trials);

    let report = SprtReport::new(params, verdict);
    if ctx.output.is_json() {
        ctx.output.value(&report);
    } else {
        ctx.output.text(&report.render());
    }
    Ok(i32::from(verdict.decision != Decision::Accept))
}

/// Print events until the pipeline finishes; Ctrl-C cancels it.
async fn stream<T>(
    pipeline: impl Future<Output = Result<T, ForgeError>>,
    mut events: UnboundedReceiver<ProgressEvent>,
    cancel: &CancelToken,
    output: Output,
) -> Result<T, ForgeError> {
    tokio::pin!(pipeline);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            result = &mut pipeline => {
                while let Ok(event) = events.try_recv() {
                    output.event(&event);
                }
                return result;
            }
            Some(event) = events.recv() => output.event(&event),
            _ = &mut interrupt, if !cancel.is_cancelled() => {
                tracing::warn!("interrupted, rolling back");
                cancel.cancel();
            }
        }
    }
}

fn exit_code(result: &Result<(), ForgeError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            tracing::debug!("pipeline ended: {}", e);
            e.exit_code()
        }
    }
}

/// Guard key of `file`: `/`-joined and relative to `root`
fn relative_key(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Inline JSON array, or `@path` to a file holding one
fn parse_observations(source: &str) -> Result<Vec<i64>> {
    let text = match source.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read observations from {path}"))?,
        None => source.to_string(),
    };
    serde_json::from_str(&text).context("observations must be a JSON array of integers")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observations_inline_and_from_file() {
        assert_eq!(parse_observations("[0, 1, 0]").unwrap(), vec![0, 1, 0]);
        assert!(parse_observations("{\"a\": 1}").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.json");
        std::fs::write(&path, "[1,1]").unwrap();
        let source = format!("@{}", path.display());
        assert_eq!(parse_observations(&source).unwrap(), vec![1, 1]);
        assert!(parse_observations("@/definitely/missing.json").is_err());
    }

    #[test]
    fn keys_are_root_relative() {
        let root = Path::new("/work/project");
        assert_eq!(relative_key(root, Path::new("/work/project/src/a.py")), "src/a.py");
        assert_eq!(relative_key(root, Path::new("src/a.py")), "src/a.py");
    }

    #[test]
    fn exit_codes_follow_errors() {
        assert_eq!(exit_code(&Ok(())), 0);
        assert_eq!(exit_code(&Err(ForgeError::Cancelled)), 2);
        let locked = ForgeError::FileLocked {
            path: "a.py".into(),
            holder: None,
        };
        assert_eq!(exit_code(&Err(locked)), 3);
    }

    #[tokio::test]
    async fn stream_returns_pipeline_result() {
        let cancel = CancelToken::new();
        let (sink, events) = EventSink::channel();
        let pipeline = async {
            drop(sink);
            Ok::<_, ForgeError>(7)
        };
        let value = stream(pipeline, events, &cancel, Output::new(true))
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}

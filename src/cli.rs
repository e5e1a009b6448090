use crate::api::error::ApiError;
use crate::api::{ConsoleApi, HttpConsoleApi};
use crate::classify::{filter_by_tab, Category, Tab};
use crate::config::ConsoleConfig;
use crate::dispatcher::{Action, ActionOutcome};
use crate::model::{AutoBackupPolicy, EnvVars, RegisterRequest, ScalingConfig, StorageRequest};
use crate::orchestrator::Console;
use crate::session::{SessionGuard, SessionStore};
use crate::text_summary::{self, TextSummary};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "tenant-console",
    version,
    about = "Terminal console for managing tenant workloads"
)]
pub struct Cli {
    /// Backend base URL
    #[arg(long, env = "TENANT_CONSOLE_BACKEND_URL", global = true)]
    pub base_url: Option<String>,

    /// Config file (default: <config dir>/tenant-console/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Inventory poll interval
    #[arg(long, global = true)]
    pub poll_interval: Option<humantime::Duration>,

    /// Refresh interval of the metrics facet
    #[arg(long, global = true)]
    pub metrics_interval: Option<humantime::Duration>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Exchange credentials for a session
    Login {
        username: String,
        /// Read from stdin when omitted
        #[arg(long, env = "TENANT_CONSOLE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create a tenant account
    Register {
        username: String,
        #[arg(long)]
        company: String,
        #[arg(long, env = "TENANT_CONSOLE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// List workloads
    List {
        /// bundle, single, database, cache, monitoring or other
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        json: bool,
    },
    /// Inventory totals, costs and bundles
    Summary {
        #[arg(long)]
        json: bool,
    },
    /// Deploy a new workload
    Create {
        service_type: String,
        /// Container image, only for the `custom` type
        #[arg(long)]
        image: Option<String>,
    },
    /// Delete a workload
    Delete {
        name: String,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    Restart {
        name: String,
    },
    Logs {
        name: String,
    },
    Metrics {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Environment variables (set replaces the whole set)
    Env {
        #[command(subcommand)]
        op: EnvOp,
    },
    /// Persistent volumes
    Storage {
        #[command(subcommand)]
        op: StorageOp,
    },
    /// Horizontal autoscaling
    Scaling {
        #[command(subcommand)]
        op: ScalingOp,
    },
    Backups {
        #[command(subcommand)]
        op: BackupOp,
    },
    AutoBackup {
        #[command(subcommand)]
        op: AutoBackupOp,
    },
    /// Interactive dashboard (default)
    Dashboard,
}

#[derive(Debug, Subcommand, Clone)]
pub enum EnvOp {
    Get {
        name: String,
    },
    /// Replace the environment with exactly these KEY=VALUE pairs
    Set {
        name: String,
        vars: Vec<String>,
    },
    /// Remove every variable
    Clear {
        name: String,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum StorageOp {
    List {
        name: String,
    },
    Add {
        name: String,
        #[arg(long)]
        size_gb: u32,
        #[arg(long)]
        mount_path: String,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum ScalingOp {
    Get {
        name: String,
    },
    Set {
        name: String,
        #[arg(long, default_value_t = 1)]
        min: u32,
        #[arg(long, default_value_t = 3)]
        max: u32,
        #[arg(long, default_value_t = 70)]
        cpu_target: u32,
    },
    Remove {
        name: String,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum BackupOp {
    List { name: String },
    Create { name: String },
    Restore { name: String, backup: String },
}

#[derive(Debug, Subcommand, Clone)]
pub enum AutoBackupOp {
    Get {
        name: String,
    },
    Set {
        name: String,
        /// Cron schedule
        #[arg(long, default_value = "0 2 * * *")]
        schedule: String,
        /// Backups to keep
        #[arg(long, default_value_t = 7)]
        retention: u32,
    },
    Disable {
        name: String,
    },
}

impl Cli {
    pub fn is_dashboard(&self) -> bool {
        matches!(self.command, None | Some(Command::Dashboard))
    }
}

/// Build the effective configuration: defaults, then file, then env/flags.
pub fn build_config(args: &Cli) -> Result<ConsoleConfig> {
    let mut cfg = ConsoleConfig::load(args.config.as_deref())?;
    if let Some(url) = &args.base_url {
        cfg.base_url = url.clone();
    }
    if let Some(d) = args.poll_interval {
        cfg.poll_interval = d.into();
    }
    if let Some(d) = args.metrics_interval {
        cfg.metrics_refresh_interval = d.into();
    }
    cfg.validated()
}

fn read_password(given: Option<String>) -> Result<String> {
    if let Some(p) = given {
        return Ok(p);
    }
    eprint!("Password: ");
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("read password from stdin")?;
    let p = line.trim_end_matches(['\r', '\n']).to_string();
    if p.is_empty() {
        bail!("password must not be empty");
    }
    Ok(p)
}

/// Map a read failure to a CLI error; auth failures clear the stored session.
fn api_failure(guard: &SessionGuard, err: ApiError, generic: &str) -> anyhow::Error {
    if err.is_auth_failure() {
        guard.on_auth_failure();
        return anyhow::anyhow!("session expired or missing; run `tenant-console login <username>`");
    }
    anyhow::anyhow!(err.user_message(generic))
}

fn outcome_to_result(outcome: ActionOutcome) -> Result<String> {
    match outcome {
        ActionOutcome::Succeeded(msg) => Ok(msg),
        ActionOutcome::Failed(msg) => bail!(msg),
        ActionOutcome::SessionExpired => {
            bail!("session expired or missing; run `tenant-console login <username>`")
        }
        ActionOutcome::Busy => bail!("another request for this workload is still running"),
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    let store = SessionStore::new(cfg.session_path());
    let guard = Arc::new(SessionGuard::from_store(store)?);
    let http = Arc::new(HttpConsoleApi::new(&cfg, guard.clone())?);

    let Some(command) = args.command.clone().filter(|c| !matches!(c, Command::Dashboard)) else {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(cfg, guard, http).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            bail!("built without the `tui` feature; use `list` or `summary`");
        }
    };

    let (out_tx, out_handle) = spawn_output_writer();
    let res = run_command(command, cfg, guard, http, &out_tx).await;
    drop(out_tx);
    let _ = out_handle.await;
    res
}

fn emit(out: &mpsc::UnboundedSender<OutputLine>, summary: TextSummary) {
    for line in summary.lines {
        let _ = out.send(OutputLine::Stdout(line));
    }
}

fn emit_json<T: serde::Serialize>(out: &mpsc::UnboundedSender<OutputLine>, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    let _ = out.send(OutputLine::Stdout(s));
    Ok(())
}

async fn run_command(
    command: Command,
    cfg: ConsoleConfig,
    guard: Arc<SessionGuard>,
    http: Arc<HttpConsoleApi>,
    out: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    match command {
        Command::Login { username, password } => {
            let password = read_password(password)?;
            let session = http
                .login(&username, &password)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message("Login failed")))?;
            let tenant = session.tenant.clone();
            guard.establish(session)?;
            let _ = out.send(OutputLine::Stderr(format!("Logged in to {tenant}")));
            return Ok(());
        }
        Command::Register {
            username,
            company,
            password,
        } => {
            let password = read_password(password)?;
            http.register(&RegisterRequest {
                username,
                password,
                company_name: company,
            })
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message("Registration failed")))?;
            let _ = out.send(OutputLine::Stderr(
                "Registered; run `tenant-console login <username>`".into(),
            ));
            return Ok(());
        }
        Command::Logout => {
            guard.logout();
            let _ = out.send(OutputLine::Stderr("Logged out".into()));
            return Ok(());
        }
        _ => {}
    }

    if !guard.is_active() {
        bail!("not logged in; run `tenant-console login <username>`");
    }
    let api: Arc<dyn ConsoleApi> = http;
    let console = Console::new(cfg, guard.clone(), api.clone());
    let dispatch = |key: String, action: Action| {
        let dispatcher = console.dispatcher.clone();
        async move { outcome_to_result(dispatcher.dispatch(&key, action).await) }
    };

    let message = match command {
        Command::List { category, json } => {
            let pods = api
                .list_pods()
                .await
                .map_err(|e| api_failure(&guard, e, "Failed to load workloads"))?;
            let tab = category.map(Tab::Only).unwrap_or_default();
            let shown = filter_by_tab(&pods, tab);
            if json {
                emit_json(out, &shown)?;
            } else {
                emit(out, text_summary::workload_table(&shown));
            }
            None
        }
        Command::Summary { json } => {
            let pods = api
                .list_pods()
                .await
                .map_err(|e| api_failure(&guard, e, "Failed to load workloads"))?;
            if json {
                emit_json(out, &crate::classify::InventorySummary::from_workloads(&pods))?;
            } else {
                emit(out, text_summary::inventory_summary(&pods));
            }
            None
        }
        Command::Create {
            service_type,
            image,
        } => Some(
            dispatch(
                service_type.clone(),
                Action::Create {
                    service_type,
                    custom_image: image,
                },
            )
            .await?,
        ),
        Command::Delete { name, yes } => {
            if !yes {
                bail!("refusing to delete {name} without --yes");
            }
            Some(dispatch(name, Action::Delete).await?)
        }
        Command::Restart { name } => Some(dispatch(name, Action::Restart).await?),
        Command::Logs { name } => {
            let logs = api
                .pod_logs(&name)
                .await
                .map_err(|e| api_failure(&guard, e, "Failed to load logs"))?;
            let _ = out.send(OutputLine::Stdout(logs));
            None
        }
        Command::Metrics { name, json } => {
            let m = api
                .pod_metrics(&name)
                .await
                .map_err(|e| api_failure(&guard, e, "Failed to load metrics"))?;
            if json {
                emit_json(out, &m)?;
            } else {
                emit(out, text_summary::metrics_lines(&m));
            }
            None
        }
        Command::Env { op } => match op {
            EnvOp::Get { name } => {
                let env = api
                    .get_env(&name)
                    .await
                    .map_err(|e| api_failure(&guard, e, "Failed to load environment"))?;
                emit(out, text_summary::env_lines(&env));
                None
            }
            EnvOp::Set { name, vars } => {
                let env = EnvVars::parse_assignments(&vars)?;
                Some(dispatch(name, Action::SetEnvironment(env)).await?)
            }
            EnvOp::Clear { name } => {
                Some(dispatch(name, Action::SetEnvironment(EnvVars::default())).await?)
            }
        },
        Command::Storage { op } => match op {
            StorageOp::List { name } => {
                let vols = api
                    .list_storage(&name)
                    .await
                    .map_err(|e| api_failure(&guard, e, "Failed to load storage"))?;
                emit(out, text_summary::storage_lines(&vols));
                None
            }
            StorageOp::Add {
                name,
                size_gb,
                mount_path,
            } => Some(
                dispatch(
                    name,
                    Action::AddStorage(StorageRequest {
                        size_gb,
                        mount_path,
                    }),
                )
                .await?,
            ),
        },
        Command::Scaling { op } => match op {
            ScalingOp::Get { name } => {
                let cfg = api
                    .get_scaling(&name)
                    .await
                    .map_err(|e| api_failure(&guard, e, "Failed to load autoscaling"))?;
                emit(out, text_summary::scaling_lines(cfg.as_ref()));
                None
            }
            ScalingOp::Set {
                name,
                min,
                max,
                cpu_target,
            } => Some(
                dispatch(
                    name,
                    Action::ConfigureScaling(ScalingConfig {
                        min_replicas: min,
                        max_replicas: max,
                        cpu_target_percent: cpu_target,
                    }),
                )
                .await?,
            ),
            ScalingOp::Remove { name } => Some(dispatch(name, Action::RemoveScaling).await?),
        },
        Command::Backups { op } => match op {
            BackupOp::List { name } => {
                let list = api
                    .list_backups(&name)
                    .await
                    .map_err(|e| api_failure(&guard, e, "Failed to load backups"))?;
                emit(out, text_summary::backup_lines(&list));
                None
            }
            BackupOp::Create { name } => Some(dispatch(name, Action::CreateBackup).await?),
            BackupOp::Restore { name, backup } => {
                Some(dispatch(name, Action::RestoreBackup { backup }).await?)
            }
        },
        Command::AutoBackup { op } => match op {
            AutoBackupOp::Get { name } => {
                let policy = api
                    .get_auto_backup(&name)
                    .await
                    .map_err(|e| api_failure(&guard, e, "Failed to load backup policy"))?;
                emit(out, text_summary::auto_backup_lines(policy.as_ref()));
                None
            }
            AutoBackupOp::Set {
                name,
                schedule,
                retention,
            } => Some(
                dispatch(
                    name,
                    Action::ConfigureAutoBackup(AutoBackupPolicy {
                        enabled: true,
                        schedule,
                        retention,
                    }),
                )
                .await?,
            ),
            AutoBackupOp::Disable { name } => {
                Some(dispatch(name, Action::DisableAutoBackup).await?)
            }
        },
        Command::Login { .. } | Command::Register { .. } | Command::Logout | Command::Dashboard => {
            None
        }
    };

    if let Some(msg) = message {
        let _ = out.send(OutputLine::Stderr(msg));
    }
    Ok(())
}

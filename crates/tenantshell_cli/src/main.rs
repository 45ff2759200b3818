//! Tenant shell command-line host.
//!
//! # Usage
//!
//! ```bash
//! tenantshell --sites ./App_Data/Sites list
//! tenantshell --sites ./App_Data/Sites --db ./features.db probe Default
//! ```

use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tenantshell_core::kernel::KernelParts;
use tenantshell_core::{
    default_log_level, init_logging, FeatureSetStore, FileSettingsStore, KernelOptions,
    RuntimeFactory, ScopeBuilder, SettingsStore, SqliteFeatureSetStore, TenantKernel,
    TenantStatus, WorkContextAccessor,
};

mod host;

#[derive(Parser)]
#[command(name = "tenantshell")]
#[command(version)]
#[command(about = "Multi-tenant shell host", long_about = None)]
struct Cli {
    /// Directory holding one `<tenant>/Settings.txt` per tenant
    #[arg(long, env = "TENANTSHELL_SITES", default_value = "App_Data/Sites")]
    sites: PathBuf,

    /// Feature-set database; in-memory when omitted
    #[arg(long, env = "TENANTSHELL_DB")]
    db: Option<PathBuf>,

    /// Log directory; logging stays off when omitted
    #[arg(long, env = "TENANTSHELL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// trace | debug | info | warn | error
    #[arg(long, env = "TENANTSHELL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Create a running `Default` tenant when the sites directory is empty
    #[arg(long)]
    bootstrap: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tenants and their runtime status
    List,
    /// Build a tenant runtime and print its blueprint
    Probe { tenant: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("event=cli_exit module=cli status=error error={message}");
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        let log_dir = absolute(log_dir)?;
        init_logging(level, &log_dir.to_string_lossy()).map_err(|err| err.to_string())?;
    }
    info!(
        "event=cli_start module=cli status=ok version={} sites={}",
        tenantshell_core::core_version(),
        cli.sites.display()
    );

    let kernel = build_kernel(&cli)?;
    let result = match &cli.command {
        Commands::List => list(&kernel),
        Commands::Probe { tenant } => probe(&kernel, tenant),
    };
    kernel.shutdown();
    result
}

fn build_kernel(cli: &Cli) -> Result<Arc<TenantKernel>, String> {
    let settings: Arc<dyn SettingsStore> = Arc::new(FileSettingsStore::new(&cli.sites));
    let feature_sets: Arc<dyn FeatureSetStore> = match &cli.db {
        Some(path) => Arc::new(SqliteFeatureSetStore::open(path).map_err(|err| err.to_string())?),
        None => Arc::new(SqliteFeatureSetStore::open_in_memory().map_err(|err| err.to_string())?),
    };
    let factory = RuntimeFactory::new(ScopeBuilder::root("host").finish(), Arc::new(host::universe()?));

    TenantKernel::new(KernelParts {
        settings,
        feature_sets,
        composer: host::composer()?,
        factory,
        options: KernelOptions {
            bootstrap_default: cli.bootstrap,
            ..KernelOptions::default()
        },
    })
    .map_err(|err| err.to_string())
}

fn list(kernel: &TenantKernel) -> Result<(), String> {
    let tenants = kernel.tenants();
    if tenants.is_empty() {
        println!("no tenants");
        return Ok(());
    }
    println!("{:<24} {:<14} {:<8} STATUS", "NAME", "STATE", "REVISION");
    for record in tenants {
        let revision = kernel
            .feature_sets()
            .revision(record.name())
            .map_err(|err| err.to_string())?;
        println!(
            "{:<24} {:<14} {:<8} {}",
            record.name(),
            record.state().as_str(),
            revision,
            describe(&kernel.status(record.name()))
        );
    }
    Ok(())
}

fn probe(kernel: &Arc<TenantKernel>, tenant: &str) -> Result<(), String> {
    let runtime = kernel.get_runtime(tenant).map_err(|err| err.to_string())?;
    let blueprint = runtime.blueprint();
    println!("tenant:   {}", runtime.tenant());
    println!("runtime:  {}", runtime.id());
    println!("revision: {}", runtime.revision());
    println!("features: {}", blueprint.enabled_features().join(", "));
    for tag in blueprint.tags() {
        println!("[{tag}]");
        for item in blueprint.items(tag) {
            println!("  {}", item.logical_name());
        }
    }

    // Exercise one unit of work so observers and state providers run.
    let accessor = WorkContextAccessor::new(Arc::clone(kernel));
    let work = accessor.begin(tenant).map_err(|err| err.to_string())?;
    work.end().map_err(|err| err.to_string())?;
    Ok(())
}

fn describe(status: &TenantStatus) -> String {
    match status {
        TenantStatus::Unknown => "unknown".to_string(),
        TenantStatus::Empty => "not built".to_string(),
        TenantStatus::Building => "building".to_string(),
        TenantStatus::Ready { runtime, revision } => format!("ready {runtime} r{revision}"),
        TenantStatus::Stale => "stale".to_string(),
        TenantStatus::Unavailable { reason } => format!("unavailable: {reason}"),
        TenantStatus::Disposed => "disposed".to_string(),
    }
}

fn absolute(path: &Path) -> Result<PathBuf, String> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|err| format!("cannot resolve `{}`: {err}", path.display()))
}

//! AVD Init - Custom Image Template Prerequisites
//!
//! Ensures the cloud resources an Azure Virtual Desktop Custom Image
//! Template build needs, idempotently:
//! - Resource group, managed identity, image-builder role definition and
//!   assignment
//! - Optionally: networking roles for an existing virtual network, a compute
//!   gallery, and an image definition
//!
//! Also carries the in-VM application install sequence (`avd-init apps`).

mod providers;

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result, bail};
use avd_provision::{
    apps::{ExeInstall, FetchBundle, InstallRunner, InstallTask, MsiInstall, SystemExec,
           WingetInstall},
    AvdConfig, Failure, Observer, Outcome, Plan, ProviderStatus, Provisioner,
    ProvisioningResult, ProvisioningSummary, ResourceSpec,
};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{Cell as TableCell, Color, Table, presets::UTF8_FULL_CONDENSED};
use console::{Emoji, style};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use providers::AzCli;

static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

const DEFAULT_WINGET_ID: &str = "Notepad++.Notepad++";

/// Configuration file structure
/// Path: ~/.config/avd-init/init.toml
#[derive(Debug, Default, Serialize, Deserialize)]
struct Config {
    #[serde(default)]
    azure: AzureConfig,
    #[serde(default)]
    identity: IdentityConfig,
    #[serde(default)]
    network: NetworkConfig,
    #[serde(default)]
    gallery: GalleryConfig,
    #[serde(default)]
    apps: AppsConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AzureConfig {
    subscription: Option<String>,
    resource_group: Option<String>,
    location: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdentityConfig {
    name: Option<String>,
    /// Seconds to pause after identity creation
    settle_delay: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NetworkConfig {
    resource_group: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GalleryConfig {
    name: Option<String>,
    image_definition: Option<String>,
    publisher: Option<String>,
    offer: Option<String>,
    sku: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AppsConfig {
    bundle_url: Option<String>,
    msi: Option<String>,
    exe: Option<String>,
    winget_id: Option<String>,
    log_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(
    name = "avd-init",
    version,
    about = "Provision Azure Virtual Desktop Custom Image Template prerequisites"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (global)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show config file path and exit
    #[arg(long)]
    show_config: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ensure the prerequisite resources exist (default)
    Provision(ProvisionArgs),

    /// Print the dependency-ordered resource plan without creating anything
    Plan(PlanArgs),

    /// Download and silently install the application set (runs in the build
    /// VM)
    Apps(AppsArgs),
}

#[derive(Parser, Debug, Default)]
struct EnvironmentArgs {
    /// Resource group for the image-build resources
    #[arg()]
    resource_group: Option<String>,

    /// Subscription identifier
    #[arg(short, long)]
    subscription: Option<String>,

    /// Region (e.g., eastus, westeurope)
    #[arg(short, long)]
    location: Option<String>,

    /// Managed identity name
    #[arg(long)]
    identity: Option<String>,

    /// Existing resource group holding the virtual network to attach builds
    /// to
    #[arg(long)]
    network_resource_group: Option<String>,

    /// Compute gallery name (created or reused)
    #[arg(short, long)]
    gallery: Option<String>,

    /// Image definition name within the gallery (created or reused)
    #[arg(long)]
    image_definition: Option<String>,

    /// Image definition publisher
    #[arg(long)]
    publisher: Option<String>,

    /// Image definition offer
    #[arg(long)]
    offer: Option<String>,

    /// Image definition sku
    #[arg(long)]
    sku: Option<String>,
}

#[derive(Parser, Debug, Default)]
struct ProvisionArgs {
    #[command(flatten)]
    env: EnvironmentArgs,

    /// Seconds to pause after identity creation, for directory propagation
    #[arg(long)]
    settle_delay: Option<u64>,

    /// Show the plan without creating anything
    #[arg(long)]
    dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,

    /// Output format for the final summary
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    #[command(flatten)]
    env: EnvironmentArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct AppsArgs {
    /// URL of the zip bundle holding the MSI/EXE installers
    #[arg(long)]
    bundle_url: Option<String>,

    /// MSI file name inside the bundle
    #[arg(long)]
    msi: Option<String>,

    /// EXE installer file name inside the bundle
    #[arg(long)]
    exe: Option<String>,

    /// Winget package identifier
    #[arg(long)]
    winget: Option<String>,

    /// Skip the winget package
    #[arg(long)]
    skip_winget: bool,

    /// Directory for the timestamped install log
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// Output format for summaries
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON for downstream consumption
    Json,
}

/// Config path - XDG-style, same convention as the main avd tooling
fn config_path() -> PathBuf {
    env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("avd-init")
        .join("init.toml")
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let path = path.cloned().unwrap_or_else(config_path);

    if path.exists() {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    } else {
        Ok(Config::default())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.show_config {
        let path = args.config.clone().unwrap_or_else(config_path);
        println!("{} Config: {}", FOLDER, path.display());
        if path.exists() {
            println!("  {CHECK} exists");
        } else {
            println!("  {} not found (will use defaults)", style("!").yellow());
        }
        return Ok(());
    }

    let file_config = load_config(args.config.as_ref())?;

    match args.command {
        Some(Commands::Provision(provision_args)) => run_provision(&provision_args, &file_config),
        Some(Commands::Plan(plan_args)) => run_plan(&plan_args, &file_config),
        Some(Commands::Apps(apps_args)) => run_apps(&apps_args, &file_config),
        None => run_provision(&ProvisionArgs::default(), &file_config),
    }
}

/// Resolve the target environment.
/// Priority: CLI args > env vars > config file > defaults.
fn resolve_environment(args: &EnvironmentArgs, config: &Config) -> AvdConfig {
    let subscription = args
        .subscription
        .clone()
        .or_else(|| env::var("AZURE_SUBSCRIPTION_ID").ok())
        .or_else(|| config.azure.subscription.clone());

    let resource_group = args
        .resource_group
        .clone()
        .or_else(|| env::var("AVD_RESOURCE_GROUP").ok())
        .or_else(|| config.azure.resource_group.clone());

    let location = args
        .location
        .clone()
        .or_else(|| env::var("AZURE_LOCATION").ok())
        .or_else(|| config.azure.location.clone());

    let missing: Vec<&str> = [
        subscription.is_none().then_some("azure.subscription"),
        resource_group.is_none().then_some("azure.resource_group"),
        location.is_none().then_some("azure.location"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if !missing.is_empty() {
        let config_path = config_path();
        eprintln!(
            "{} Missing required settings: {}",
            CROSS,
            missing.join(", ")
        );
        eprintln!();
        eprintln!(
            "Pass them as arguments, or add to config file: {}",
            style(config_path.display()).cyan()
        );
        eprintln!();
        eprintln!("  [azure]");
        eprintln!("  subscription = \"00000000-...\"");
        eprintln!("  resource_group = \"avd-images\"");
        eprintln!("  location = \"eastus\"");
        std::process::exit(1);
    }

    let mut builder = AvdConfig::builder()
        .subscription(subscription.unwrap())
        .resource_group(resource_group.unwrap())
        .location(location.unwrap())
        .network_resource_group(
            args.network_resource_group
                .clone()
                .or_else(|| config.network.resource_group.clone()),
        )
        .gallery_name(args.gallery.clone().or_else(|| config.gallery.name.clone()))
        .image_definition_name(
            args.image_definition
                .clone()
                .or_else(|| config.gallery.image_definition.clone()),
        );

    if let Some(identity) = args.identity.clone().or_else(|| config.identity.name.clone()) {
        builder = builder.identity_name(identity);
    }
    if let Some(publisher) = args.publisher.clone().or_else(|| config.gallery.publisher.clone()) {
        builder = builder.publisher(publisher);
    }
    if let Some(offer) = args.offer.clone().or_else(|| config.gallery.offer.clone()) {
        builder = builder.offer(offer);
    }
    if let Some(sku) = args.sku.clone().or_else(|| config.gallery.sku.clone()) {
        builder = builder.sku(sku);
    }

    builder.build()
}

/// Run prerequisite provisioning
fn run_provision(args: &ProvisionArgs, config: &Config) -> Result<()> {
    let mut resolved = resolve_environment(&args.env, config);
    if let Some(secs) = args.settle_delay.or(config.identity.settle_delay) {
        resolved.settle_delay = Duration::from_secs(secs);
    }

    print_banner();
    print_config_table(&resolved);

    let plan = Plan::prerequisites(&resolved);

    if args.dry_run {
        println!("\n{} Dry run - not creating anything", style("i").cyan());
        print_plan_table(&plan);
        return Ok(());
    }

    if !AzCli::available() {
        bail!("az CLI not found - install it and run `az login` first");
    }

    let client = AzCli::new(&resolved.subscription);

    if let Some(network_rg) = &resolved.network_resource_group {
        match client.list_virtual_networks(network_rg) {
            Ok(Some(vnets)) if vnets.is_empty() => println!(
                "\n{} No virtual networks found in '{network_rg}'",
                style("!").yellow()
            ),
            Ok(Some(vnets)) => println!(
                "\n{} Virtual networks in '{network_rg}': {}",
                style("->").dim(),
                vnets.join(", ")
            ),
            Ok(None) => println!(
                "\n{} Network resource group '{network_rg}' not readable",
                style("!").yellow()
            ),
            Err(e) => println!(
                "\n{} Could not list virtual networks: {}",
                style("!").yellow(),
                style(e).dim()
            ),
        }
    }

    if !args.yes {
        let confirm = dialoguer::Confirm::new()
            .with_prompt("Proceed with provisioning?")
            .default(true)
            .interact()?;
        if !confirm {
            println!("Aborted.");
            return Ok(());
        }
    }

    println!("\n{GEAR} Ensuring {} resources...\n", plan.len());

    let observer = SpinnerObserver::new(plan.len());
    let summary = Provisioner::new(&client)
        .settle_delay(resolved.settle_delay)
        .observer(&observer)
        .run(&plan)?;

    match args.output {
        OutputFormat::Table => print_summary(&summary),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }

    if summary.has_failures() {
        eprintln!(
            "\n{} Some resources could not be provisioned; fix the failures above and re-run",
            CROSS
        );
        std::process::exit(1);
    }

    println!("\n{SPARKLE} Environment ready for image builds");
    Ok(())
}

/// Print the plan without touching the control plane
fn run_plan(args: &PlanArgs, config: &Config) -> Result<()> {
    let resolved = resolve_environment(&args.env, config);
    let plan = Plan::prerequisites(&resolved);

    match args.output {
        OutputFormat::Table => {
            print_banner();
            print_config_table(&resolved);
            print_plan_table(&plan);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
    }
    Ok(())
}

/// Run the in-VM application install sequence
fn run_apps(args: &AppsArgs, config: &Config) -> Result<()> {
    let bundle_url = args
        .bundle_url
        .clone()
        .or_else(|| config.apps.bundle_url.clone());
    let msi = args.msi.clone().or_else(|| config.apps.msi.clone());
    let exe = args.exe.clone().or_else(|| config.apps.exe.clone());
    let winget_id = args
        .winget
        .clone()
        .or_else(|| config.apps.winget_id.clone())
        .unwrap_or_else(|| DEFAULT_WINGET_ID.to_string());
    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| config.apps.log_dir.clone())
        .unwrap_or_else(|| PathBuf::from("logs"));

    let mut tasks: Vec<Box<dyn InstallTask>> = vec![];
    if let Some(url) = bundle_url {
        tasks.push(Box::new(FetchBundle::new(url)));
        if let Some(msi) = msi {
            tasks.push(Box::new(MsiInstall::new(msi)));
        }
        if let Some(exe) = exe {
            tasks.push(Box::new(ExeInstall::new(exe)));
        }
    } else if msi.is_some() || exe.is_some() {
        bail!("--msi/--exe need --bundle-url to download them from");
    }
    if !args.skip_winget {
        tasks.push(Box::new(WingetInstall::new(winget_id)));
    }

    if tasks.is_empty() {
        bail!("nothing to install - supply --bundle-url or drop --skip-winget");
    }

    let exec = SystemExec;
    let mut runner = InstallRunner::new(&exec, &log_dir)
        .with_context(|| format!("Failed to create install log under {}", log_dir.display()))?;
    println!("{} Logging to {}\n", FOLDER, runner.log_path().display());

    let report = runner.run(&tasks);

    println!();
    for (desc, outcome) in &report.results {
        let marker = if outcome.is_failed() {
            style("x").red()
        } else {
            style("v").green()
        };
        println!("{marker} {desc}: {}", outcome.label());
    }

    if report.has_failures() {
        eprintln!("\n{CROSS} Some applications failed to install; see the log");
        std::process::exit(1);
    }

    println!("\n{SPARKLE} All applications installed");
    Ok(())
}

/// Progress rendering for provisioning steps
struct SpinnerObserver {
    total: usize,
    index: Cell<usize>,
    current: RefCell<Option<ProgressBar>>,
}

impl SpinnerObserver {
    fn new(total: usize) -> Self {
        Self {
            total,
            index: Cell::new(0),
            current: RefCell::new(None),
        }
    }
}

impl Observer for SpinnerObserver {
    fn provider_checked(&self, namespace: &str, status: &ProviderStatus) {
        match status {
            ProviderStatus::AlreadyRegistered => {}
            ProviderStatus::Registered => println!(
                "  {} registered resource provider {namespace}",
                style("->").dim()
            ),
            ProviderStatus::Unavailable(detail) => println!(
                "  {} provider {namespace}: {}",
                style("!").yellow(),
                style(detail).dim()
            ),
        }
    }

    fn step_started(&self, spec: &ResourceSpec) {
        self.index.set(self.index.get() + 1);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap(),
        );
        spinner.set_message(format!(
            "[{}/{}] Ensuring {} '{}'...",
            self.index.get(),
            self.total,
            spec.kind,
            spec.name
        ));
        spinner.enable_steady_tick(Duration::from_millis(100));
        *self.current.borrow_mut() = Some(spinner);
    }

    fn step_finished(&self, result: &ProvisioningResult) {
        if let Some(spinner) = self.current.borrow_mut().take() {
            spinner.finish_and_clear();
        }
        let prefix = format!("[{}/{}]", self.index.get(), self.total);
        match &result.outcome {
            Outcome::Created { .. } => println!(
                "{prefix} {} {} '{}' created",
                style("v").green(),
                result.kind,
                result.name
            ),
            Outcome::AlreadyExisted { .. } => println!(
                "{prefix} {} {} '{}' already exists",
                style("o").yellow(),
                result.kind,
                result.name
            ),
            Outcome::Failed(failure) => println!(
                "{prefix} {} {} '{}' failed: {failure}",
                style("x").red(),
                result.kind,
                result.name
            ),
        }
    }
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("╔═══════════════════════════════════════╗").cyan().bold()
    );
    println!(
        "{}",
        style("║      AVD IMAGE BUILD PREREQUISITES    ║").cyan().bold()
    );
    println!(
        "{}",
        style("╚═══════════════════════════════════════╝").cyan().bold()
    );
}

fn print_config_table(cfg: &AvdConfig) {
    println!("\n{} Configuration\n", style("▸").blue().bold());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        TableCell::new("Setting").fg(Color::Cyan),
        TableCell::new("Value").fg(Color::Cyan),
    ]);

    table.add_row(vec!["Subscription", &cfg.subscription]);
    table.add_row(vec!["Resource group", &cfg.resource_group]);
    table.add_row(vec!["Location", &cfg.location]);
    table.add_row(vec!["Identity", &cfg.identity_name]);
    table.add_row(vec![
        "Network RG",
        cfg.network_resource_group.as_deref().unwrap_or("(none)"),
    ]);
    table.add_row(vec![
        "Gallery",
        cfg.gallery_name.as_deref().unwrap_or("(none)"),
    ]);
    table.add_row(vec![
        "Image definition",
        cfg.image_definition_name.as_deref().unwrap_or("(none)"),
    ]);
    if cfg.image_definition_name.is_some() {
        table.add_row(vec![
            "Image metadata",
            &format!("{} / {} / {}", cfg.publisher, cfg.offer, cfg.sku),
        ]);
    }

    println!("{table}");
}

fn print_plan_table(plan: &Plan) {
    println!("\n{} Plan ({} resources)\n", style("▸").blue().bold(), plan.len());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        TableCell::new("#").fg(Color::Cyan),
        TableCell::new("Kind").fg(Color::Cyan),
        TableCell::new("Name").fg(Color::Cyan),
        TableCell::new("Depends on").fg(Color::Cyan),
    ]);

    match plan.ordered() {
        Ok(ordered) => {
            for (index, spec) in ordered.iter().enumerate() {
                let deps = if spec.depends_on.is_empty() {
                    "-".to_string()
                } else {
                    spec.depends_on
                        .iter()
                        .map(|d| d.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                table.add_row(vec![
                    (index + 1).to_string(),
                    spec.kind.to_string(),
                    spec.name.clone(),
                    deps,
                ]);
            }
            println!("{table}");
        }
        Err(e) => println!("{} invalid plan: {e}", style("x").red()),
    }

    for skipped in &plan.skipped {
        println!("  {} skipped: {skipped}", style("o").yellow());
    }
}

fn print_summary(summary: &ProvisioningSummary) {
    println!("\n{} Summary\n", style("▸").blue().bold());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        TableCell::new("Kind").fg(Color::Cyan),
        TableCell::new("Name").fg(Color::Cyan),
        TableCell::new("Outcome").fg(Color::Cyan),
        TableCell::new("Identifier").fg(Color::Cyan),
    ]);

    for result in &summary.results {
        let outcome_cell = match &result.outcome {
            Outcome::Created { .. } => TableCell::new("created").fg(Color::Green),
            Outcome::AlreadyExisted { .. } => TableCell::new("already existed").fg(Color::Yellow),
            Outcome::Failed(Failure::MissingDependency(dep)) => {
                TableCell::new(format!("failed (needs {dep})")).fg(Color::Red)
            }
            Outcome::Failed(Failure::Api(_)) => TableCell::new("failed").fg(Color::Red),
        };
        let identifier = result
            .outcome
            .handle()
            .map_or_else(|| "-".to_string(), |h| h.resource_id.clone());
        table.add_row(vec![
            TableCell::new(result.kind.to_string()),
            TableCell::new(&result.name),
            outcome_cell,
            TableCell::new(identifier),
        ]);
    }

    println!("{table}");

    for (id, handle) in summary.identifiers() {
        if let Some(principal) = &handle.principal_id {
            println!(
                "  {} {id} principal ID: {}",
                style("->").dim(),
                style(principal).cyan()
            );
        }
    }

    for skipped in &summary.skipped {
        println!("  {} skipped: {skipped}", style("o").yellow());
    }

    for result in &summary.results {
        if let Outcome::Failed(Failure::Api(detail)) = &result.outcome {
            println!(
                "  {} {} '{}': {}",
                style("x").red(),
                result.kind,
                result.name,
                style(detail).dim()
            );
        }
    }
}

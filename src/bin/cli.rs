use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use catalog_promote::catalog::Join;
use catalog_promote::changes::changed_assets;
use catalog_promote::exchange::{
    extract_bundle, extract_bundle_assets, extract_quality_project, load_bundle_assets, load_quality_project,
};
use catalog_promote::mapping::IdentityResolver;
use catalog_promote::output::write_if_changed;
use catalog_promote::transfer::{
    check_relationships, export_asset_values_csv, extract_relationships, load_relationships,
    merge_relationship_files, ExtractRequest, LoadRequest,
};
use catalog_promote::tree::bundle::{filter_bundle, set_import_actions};
use catalog_promote::tree::custom_attr::CustomAttributeFilter;
use catalog_promote::tree::flow::{changed_flows, LineageFlow};
use catalog_promote::tree::glossary::filter_glossary;
use catalog_promote::tree::quality::{filter_quality_project, QualityKeep};
use catalog_promote::workflow::{progress, ProgressionRequest, StartState, WorkflowAction, WorkflowState, WorkflowTable};
use catalog_promote::{
    AssetRef, CatalogError, CatalogSession, Condition, ContextCache, PromoteConfig, Query, ReconcileMode,
    RelationshipFile, RestCatalog, RetryPolicy, XmlTree,
};

#[derive(Parser)]
#[command(name = "promote")]
#[command(
    about = "Promote governed metadata between catalog environments by identity rather than by internal ID",
    version
)]
#[command(after_help = "Connection settings are read from CATALOG_HOST, CATALOG_PORT, CATALOG_USER,
CATALOG_PASSWORD, CATALOG_CERT and CATALOG_BATCH (a .env file is honoured), or from the
[connection] table of the file given with --config. Environment values win.

Quality projects are rewritten with the [[project_mappings]] of the config file.
Time windows (--from / --to) are epoch milliseconds.
Conditions (--conditions) are a JSON array in the catalog's search condition shape, e.g.
   '[{\"property\": \"name\", \"operator\": \"like\", \"value\": \"Cust\"}]'")]
struct Cli {
    /// TOML file with [connection], [cache] and [[mappings]]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for a daily-rolling log file
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move workflow assets toward a final action
    Workflow {
        asset_type: String,

        /// DRAFT, WAITING_APPROVAL, APPROVED or ALL
        #[arg(long, default_value = "ALL")]
        from: String,

        /// request, approve, publish, return or discard
        #[arg(long)]
        action: String,

        #[arg(long, default_value = "")]
        comment: String,

        #[arg(long)]
        conditions: Option<String>,

        /// Combine conditions with OR instead of AND
        #[arg(long)]
        any: bool,

        /// Skip drafts identical to their published copy
        #[arg(long)]
        compare: bool,

        /// State reached by `return` from APPROVED
        #[arg(long, default_value = "WAITING_APPROVAL")]
        return_to: String,
    },

    /// Apply relationships from a transfer file to the target environment
    LoadRelationships {
        file: PathBuf,

        #[arg(short = 't', long = "type")]
        asset_type: String,

        #[arg(short, long)]
        relationship: String,

        /// APPEND, REPLACE_ALL or REPLACE_SOME
        #[arg(short, long, default_value = "APPEND")]
        mode: String,

        /// Member type removed by REPLACE_SOME
        #[arg(long)]
        replace_type: Option<String>,

        #[arg(long)]
        conditions: Option<String>,

        /// Return workflow assets to DRAFT before updating them
        #[arg(long)]
        gate_workflow: bool,
    },

    /// Pull relationships of every matching asset into a transfer file
    ExtractRelationships {
        #[arg(short = 't', long = "type")]
        asset_type: String,

        #[arg(short, long, value_delimiter = ',', required = true)]
        relationships: Vec<String>,

        #[arg(long)]
        conditions: Option<String>,

        #[arg(long, requires = "to")]
        from: Option<i64>,

        #[arg(long, requires = "from")]
        to: Option<i64>,

        /// Only keep related assets of these types
        #[arg(long, value_delimiter = ',')]
        limit: Vec<String>,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Union several transfer files by mapped identity
    MergeRelationships {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Classify the properties of a transfer file
    CheckRelationships { file: PathBuf },

    /// Render a transfer file as asset values CSV
    ExportCsv {
        file: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Prune a business glossary export to the kept assets
    FilterGlossary {
        input: PathBuf,

        #[arg(short = 't', long = "type")]
        asset_type: String,

        /// JSON list of RIDs or of assets carrying `_id`
        #[arg(short, long)]
        keep: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Prune a custom attribute export by modification window and name
    FilterCustomAttributes {
        input: PathBuf,

        #[arg(long)]
        from: i64,

        #[arg(long)]
        to: i64,

        #[arg(long, value_delimiter = ',')]
        names: Vec<String>,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Prune a data quality project export to the kept rules and metrics
    FilterQualityProject {
        input: PathBuf,

        /// JSON list of asset references
        #[arg(short, long)]
        keep: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Prune an asset bundle and set its import actions
    FilterBundle {
        input: PathBuf,

        /// JSON list of RIDs or of assets carrying `_id`
        #[arg(short, long)]
        keep: PathBuf,

        /// Bundle classes imported completely
        #[arg(long, value_delimiter = ',')]
        complete: Vec<String>,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Download a bundle's definition archive
    ExtractBundle {
        bundle: String,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Download a bundle's assets, pruned to the kept ones
    ExtractBundleAssets {
        bundle: String,

        /// JSON list of RIDs or of assets carrying `_id`
        #[arg(short, long)]
        keep: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Upload bundle assets to the target environment
    LoadBundleAssets {
        file: PathBuf,

        /// Bundle classes imported completely
        #[arg(long, value_delimiter = ',')]
        complete: Vec<String>,
    },

    /// Download a data quality project, pruned to the kept rules and metrics
    ExtractQualityProject {
        project: String,

        /// JSON list of asset references
        #[arg(short, long)]
        keep: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Create or update a data quality project from an exported document
    LoadQualityProject {
        file: PathBuf,

        /// Name the project is loaded as
        #[arg(long)]
        project: String,
    },

    /// Point a lineage flow at another host
    ReplaceFlowHost {
        input: PathBuf,

        #[arg(long)]
        host: String,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// List lineage flows that finished within a window
    ChangedFlows {
        dir: PathBuf,

        #[arg(long)]
        from: i64,

        #[arg(long)]
        to: i64,
    },

    /// List export descriptors of assets changed within a window
    ChangedAssets {
        #[arg(short = 't', long = "type")]
        asset_type: String,

        #[arg(long)]
        from: i64,

        #[arg(long)]
        to: i64,

        #[arg(long)]
        conditions: Option<String>,
    },

    /// Run a search and print every result
    Query {
        /// JSON query file
        file: PathBuf,
    },

    /// Resolve an asset reference in the target environment
    Identity {
        /// JSON asset reference
        file: PathBuf,

        /// Also look for workflow drafts
        #[arg(long)]
        include_workflow: bool,
    },
}

/// Everything the connected subcommands share
struct Run {
    config: PromoteConfig,
    session: CatalogSession,
    cache: ContextCache,
    batch: usize,
}

impl Run {
    fn open(config: PromoteConfig) -> Result<Self> {
        let connection = config.connection().context("incomplete connection settings")?;
        eprintln!(
            "{} {}:{} as {}",
            "→ Connecting to".bright_black(),
            connection.host.bright_cyan(),
            connection.port,
            connection.user.bright_white()
        );
        let batch = connection.batch;
        let backend = RestCatalog::new(connection).context("failed to build catalog client")?;
        Ok(Self {
            session: CatalogSession::new(Arc::new(backend)).with_retry_policy(RetryPolicy::default()),
            cache: ContextCache::new(config.cache),
            batch,
            config,
        })
    }

    /// Log out whatever the outcome, then print the result with the audit log
    async fn finish<T: Serialize>(self, outcome: Result<T>) -> Result<()> {
        let closed = self.session.close().await;
        match (outcome, closed) {
            (Ok(result), Ok(audit)) => print_json(&json!({ "result": result, "audit": audit })),
            (Ok(_), Err(e)) => Err(anyhow::Error::new(e).context("logout failed")),
            (Err(e), closed) => {
                if let Err(logout) = closed {
                    tracing::warn!(error = %logout, "logout failed");
                }
                Err(e)
            }
        }
    }
}

fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "promote.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

/// Results are the only thing written to stdout
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Suggestions for the first catalog error anywhere in the chain
fn error_hints(error: &anyhow::Error) -> &'static [&'static str] {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CatalogError>())
        .map(|cause| cause.category().suggestions())
        .unwrap_or(&[])
}

fn report_error(error: &anyhow::Error) {
    eprintln!("{} {:#}", "✗".red(), error);
    for hint in error_hints(error) {
        eprintln!("  {} {}", "→".bright_black(), hint);
    }
}

fn conditions(raw: Option<&str>) -> Result<Vec<Condition>> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("--conditions is not a JSON list of conditions"),
        None => Ok(Vec::new()),
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not JSON", path.display()))
}

/// RIDs from a JSON list of strings or of objects carrying `_id`
fn keep_rids(path: &Path) -> Result<HashSet<String>> {
    let listed = read_json(path)?;
    let items = listed
        .as_array()
        .with_context(|| format!("{} is not a JSON list", path.display()))?;
    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(rid) => Some(rid.clone()),
            other => other.get("_id").and_then(Value::as_str).map(str::to_string),
        })
        .collect())
}

fn quality_keep(path: &Path) -> Result<QualityKeep> {
    let listed = read_json(path)?;
    let refs = listed
        .as_array()
        .with_context(|| format!("{} is not a JSON list", path.display()))?
        .iter()
        .map(AssetRef::from_value)
        .collect::<catalog_promote::Result<Vec<_>>>()?;
    Ok(QualityKeep::from_refs(&refs))
}

fn write_tree(tree: &XmlTree, out: &Path) -> Result<bool> {
    let xml = tree.to_xml_string()?;
    write_if_changed(out, xml.as_bytes()).with_context(|| format!("failed to write {}", out.display()))
}

fn report_write(out: &Path, changed: bool) {
    if changed {
        eprintln!("{} Wrote {}", "✓".green(), out.display().to_string().bright_white());
    } else {
        eprintln!("{} {} unchanged", "●".bright_black(), out.display());
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => PromoteConfig::load(path).with_context(|| format!("failed to load {}", path.display()))?,
        None => PromoteConfig::default(),
    };

    match cli.command {
        Commands::Workflow {
            asset_type,
            from,
            action,
            comment,
            conditions: raw,
            any,
            compare,
            return_to,
        } => {
            let table = WorkflowTable {
                return_from_approved: return_to.parse::<WorkflowState>()?,
            };
            let mut request =
                ProgressionRequest::new(asset_type, from.parse::<StartState>()?, action.parse::<WorkflowAction>()?);
            request.comment = comment;
            request.conditions = conditions(raw.as_deref())?;
            request.join = if any { Join::Or } else { Join::And };
            request.compare_to_published = compare;

            let mut run = Run::open(config)?;
            request.batch = run.batch;
            eprintln!(
                "{}",
                format!("🔄 Progressing {} toward {}...", request.asset_type, request.action)
                    .cyan()
                    .bold()
            );
            let outcome = async {
                let outcome = progress(&mut run.session, &table, &request).await?;
                if !outcome.workflow_enabled {
                    eprintln!("{}", "Workflow is not enabled, nothing to do".yellow());
                } else if outcome.report.failed.is_empty() {
                    eprintln!("{} {} workflow actions taken", "✓".green(), outcome.report.actions.len());
                } else {
                    eprintln!("{} {} workflow actions failed", "✗".red(), outcome.report.failed.len());
                }
                Ok::<_, anyhow::Error>(outcome)
            }
            .await;
            run.finish(outcome).await?;
        }

        Commands::LoadRelationships {
            file,
            asset_type,
            relationship,
            mode,
            replace_type,
            conditions: raw,
            gate_workflow,
        } => {
            let transfer = RelationshipFile::load(&file)?;
            let mut request = LoadRequest::new(asset_type, relationship, mode.parse::<ReconcileMode>()?);
            request.replace_type = replace_type;
            request.conditions = conditions(raw.as_deref())?;
            request.gate_workflow = gate_workflow;

            let mut run = Run::open(config)?;
            request.batch = run.batch;
            let outcome = async {
                let mappings = run.config.mapping_set()?;
                let summary =
                    load_relationships(&mut run.session, &mut run.cache, &mappings, &transfer, &request).await?;
                eprintln!(
                    "{} Updated {} assets with {} relationships",
                    "✓".green(),
                    summary.asset_update_count,
                    summary.relationship_update_count
                );
                Ok::<_, anyhow::Error>(summary)
            }
            .await;
            run.finish(outcome).await?;
        }

        Commands::ExtractRelationships {
            asset_type,
            relationships,
            conditions: raw,
            from,
            to,
            limit,
            out,
        } => {
            let mut request = ExtractRequest::new(asset_type, relationships);
            request.conditions = conditions(raw.as_deref())?;
            request.window = from.zip(to);
            request.limit = limit;

            let mut run = Run::open(config)?;
            request.batch = run.batch;
            let outcome = async {
                let (transfer, summary) = extract_relationships(&mut run.session, &mut run.cache, &request).await?;
                let changed = transfer
                    .save(&out)
                    .with_context(|| format!("failed to write {}", out.display()))?;
                report_write(&out, changed);
                Ok::<_, anyhow::Error>(summary)
            }
            .await;
            run.finish(outcome).await?;
        }

        Commands::MergeRelationships { inputs, out } => {
            let files = inputs
                .iter()
                .map(|path| RelationshipFile::load(path).with_context(|| format!("failed to load {}", path.display())))
                .collect::<Result<Vec<_>>>()?;
            let merged = merge_relationship_files(&files, &config.mapping_set()?)?;
            report_write(&out, merged.save(&out)?);
            print_json(&json!({ "files": files.len(), "asset_count": merged.len() }))?;
        }

        Commands::CheckRelationships { file } => {
            let check = check_relationships(&RelationshipFile::load(&file)?);
            print_json(&check)?;
        }

        Commands::ExportCsv { file, out } => {
            let transfer = RelationshipFile::load(&file)?;
            let mut run = Run::open(config)?;
            let outcome = async {
                let mappings = run.config.mapping_set()?;
                let export = export_asset_values_csv(&mut run.session, &transfer, &mappings).await?;
                report_write(&out, write_if_changed(&out, &export.contents)?);
                Ok::<_, anyhow::Error>(export)
            }
            .await;
            run.finish(outcome).await?;
        }

        Commands::FilterGlossary {
            input,
            asset_type,
            keep,
            out,
        } => {
            let mut tree = XmlTree::from_path(&input)?;
            let report = filter_glossary(&mut tree, &asset_type, &keep_rids(&keep)?)?;
            report_write(&out, write_tree(&tree, &out)?);
            print_json(&report)?;
        }

        Commands::FilterCustomAttributes {
            input,
            from,
            to,
            names,
            out,
        } => {
            let mut tree = XmlTree::from_path(&input)?;
            let report = CustomAttributeFilter::new(from, to).names(names).apply(&mut tree)?;
            report_write(&out, write_tree(&tree, &out)?);
            print_json(&report)?;
        }

        Commands::FilterQualityProject { input, keep, out } => {
            let keep = quality_keep(&keep)?;
            let mut tree = XmlTree::from_path(&input)?;
            let report = filter_quality_project(&mut tree, &keep);
            report_write(&out, write_tree(&tree, &out)?);
            print_json(&report)?;
        }

        Commands::FilterBundle {
            input,
            keep,
            complete,
            out,
        } => {
            let mut tree = XmlTree::from_path(&input)?;
            let report = filter_bundle(&mut tree, &keep_rids(&keep)?)?;
            let (complete_count, partial_count) = set_import_actions(&mut tree, &complete.into_iter().collect())?;
            report_write(&out, write_tree(&tree, &out)?);
            print_json(&json!({
                "filter": report,
                "complete": complete_count,
                "partial": partial_count,
            }))?;
        }

        Commands::ExtractBundle { bundle, out } => {
            let mut run = Run::open(config)?;
            let outcome = async {
                let archive = extract_bundle(&mut run.session, &bundle).await?;
                report_write(&out, write_if_changed(&out, &archive)?);
                Ok::<_, anyhow::Error>(json!({ "bundle": bundle, "bytes": archive.len() }))
            }
            .await;
            run.finish(outcome).await?;
        }

        Commands::ExtractBundleAssets { bundle, keep, out } => {
            let keep = keep_rids(&keep)?;
            let mut run = Run::open(config)?;
            let outcome = async {
                let (tree, report) = extract_bundle_assets(&mut run.session, &bundle, &keep).await?;
                report_write(&out, write_tree(&tree, &out)?);
                Ok::<_, anyhow::Error>(report)
            }
            .await;
            run.finish(outcome).await?;
        }

        Commands::LoadBundleAssets { file, complete } => {
            let mut tree = XmlTree::from_path(&file)?;
            let complete: HashSet<String> = complete.into_iter().collect();
            let mut run = Run::open(config)?;
            let outcome = async {
                let upload = load_bundle_assets(&mut run.session, &mut tree, &complete).await?;
                eprintln!("{} Stored {} bundle assets", "✓".green(), upload.rids.len());
                Ok::<_, anyhow::Error>(upload)
            }
            .await;
            run.finish(outcome).await?;
        }

        Commands::ExtractQualityProject { project, keep, out } => {
            let keep = quality_keep(&keep)?;
            let mut run = Run::open(config)?;
            let outcome = async {
                let (tree, report) = extract_quality_project(&mut run.session, &project, &keep).await?;
                report_write(&out, write_tree(&tree, &out)?);
                Ok::<_, anyhow::Error>(report)
            }
            .await;
            run.finish(outcome).await?;
        }

        Commands::LoadQualityProject { file, project } => {
            let mut tree = XmlTree::from_path(&file)?;
            let mut run = Run::open(config)?;
            let outcome = async {
                let load =
                    load_quality_project(&mut run.session, &mut tree, &project, &run.config.project_mappings).await?;
                eprintln!("{} Sent {} to {}", "✓".green(), load.project.bright_white(), load.submit.as_str());
                Ok::<_, anyhow::Error>(load)
            }
            .await;
            run.finish(outcome).await?;
        }

        Commands::ReplaceFlowHost { input, host, out } => {
            let mut flow = LineageFlow::from_path(&input)?;
            let replacement = flow.replace_host(&host)?;
            let changed = write_if_changed(&out, flow.to_xml_string()?.as_bytes())?;
            report_write(&out, changed);
            print_json(&json!({
                "replacement": replacement,
                "identity": flow.runtime_identity()?,
            }))?;
        }

        Commands::ChangedFlows { dir, from, to } => {
            let flows = changed_flows(&dir, from, to)?;
            eprintln!("{} {} flows in window", "✓".green(), flows.len());
            print_json(&flows)?;
        }

        Commands::ChangedAssets {
            asset_type,
            from,
            to,
            conditions: raw,
        } => {
            let extra = conditions(raw.as_deref())?;
            let mut run = Run::open(config)?;
            let batch = run.batch;
            let outcome = async {
                let changed = changed_assets(&mut run.session, &asset_type, from, to, &extra, batch).await?;
                eprintln!(
                    "{} {} of {} changed assets exportable",
                    "✓".green(),
                    changed.assets.len(),
                    changed.asset_count
                );
                Ok::<_, anyhow::Error>(changed)
            }
            .await;
            run.finish(outcome).await?;
        }

        Commands::Query { file } => {
            let query: Query = serde_json::from_value(read_json(&file)?).context("not a search query")?;
            let mut run = Run::open(config)?;
            let outcome = async {
                let assets = run.session.search_all(&query).await?;
                eprintln!("{} {} assets", "✓".green(), assets.len());
                Ok::<_, anyhow::Error>(assets)
            }
            .await;
            run.finish(outcome).await?;
        }

        Commands::Identity { file, include_workflow } => {
            let reference = AssetRef::from_value(&read_json(&file)?)?;
            let mut run = Run::open(config)?;
            let outcome = async {
                let mappings = run.config.mapping_set()?;
                let mapped = IdentityResolver::new(&mappings).resolve(&reference);
                let found = run
                    .cache
                    .mapped_assets(&mut run.session, &mappings, &reference, include_workflow)
                    .await?;
                if found.is_empty() {
                    eprintln!("{} {} has no counterpart", "✗".red(), mapped.identity.bright_yellow());
                } else {
                    eprintln!("{} {}", "✓".green(), mapped.identity.bright_yellow());
                }
                Ok::<_, anyhow::Error>(json!({
                    "identity": mapped.identity,
                    "mapped": mapped.to_ref(),
                    "query": mapped.query(&["name"], 2),
                    "found": found,
                }))
            }
            .await;
            run.finish(outcome).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_promote::InMemoryCatalog;

    fn run_on(catalog: Arc<InMemoryCatalog>) -> Run {
        let config = PromoteConfig::default();
        Run {
            session: CatalogSession::new(catalog),
            cache: ContextCache::new(config.cache),
            batch: 100,
            config,
        }
    }

    #[tokio::test]
    async fn test_failed_command_still_logs_out() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let outcome: Result<Value> = Err(anyhow::anyhow!("load failed"));
        let err = run_on(catalog.clone()).finish(outcome).await.unwrap_err();
        assert_eq!(err.to_string(), "load failed");
        assert_eq!(catalog.calls().logouts, 1);
    }

    #[tokio::test]
    async fn test_successful_command_logs_out() {
        let catalog = Arc::new(InMemoryCatalog::new());
        run_on(catalog.clone()).finish(Ok(json!({ "done": true }))).await.unwrap();
        assert_eq!(catalog.calls().logouts, 1);
    }

    #[test]
    fn test_hints_come_from_wrapped_catalog_errors() {
        let wrapped = anyhow::Error::new(CatalogError::backend(503, "unavailable")).context("search failed");
        assert!(!error_hints(&wrapped).is_empty());
        assert!(error_hints(&anyhow::anyhow!("bad flag")).is_empty());
    }
}

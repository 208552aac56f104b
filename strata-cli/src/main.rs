//! Command-line interface for strata.
//! Builds a workspace of notation documents once and reports diagnostics.
//!
//! Usage:
//!   strata `<path>` [--categories `<a,b>`] [--format `<format>`]  - Check a file or directory
//!   strata `<path>` --no-validate                               - Build without validation

use std::path::{Path, PathBuf};
use std::process::exit;

use clap::{Arg, ArgAction, Command};
use ignore::WalkBuilder;
use url::Url;

use strata_config::{Loader, StrataConfig};
use strata_engine::{BuildOptions, Diagnostic, ReadPriority, Severity, Workspace};
use strata_notation::{FileTextSource, NotationFrontEnd};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("strata")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Build and validate a workspace of notation documents")
        .arg_required_else_help(true)
        .arg(
            Arg::new("path")
                .help("Notation file or directory to check")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Configuration file layered over the built-in defaults"),
        )
        .arg(
            Arg::new("categories")
                .long("categories")
                .help("Comma-separated validation categories (default: all)"),
        )
        .arg(
            Arg::new("no-validate")
                .long("no-validate")
                .help("Stop after reference indexing instead of validating")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .short('f')
                .help("Output format: human or json")
                .default_value("human"),
        )
        .get_matches();

    let path = PathBuf::from(
        matches
            .get_one::<String>("path")
            .expect("path is a required argument"),
    );
    let format = matches
        .get_one::<String>("format")
        .expect("format has a default");

    let config = load_config(&path, matches.get_one::<String>("config"));
    let mut options = config.build_options();
    if matches.get_flag("no-validate") {
        options.validation = None;
    }
    if let Some(categories) = matches.get_one::<String>("categories") {
        if let Some(validation) = options.validation.as_mut() {
            validation.categories = Some(
                categories
                    .split(',')
                    .map(|category| category.trim().to_string())
                    .filter(|category| !category.is_empty())
                    .collect(),
            );
        }
    }

    let uris = collect_documents(&path, &config);
    if uris.is_empty() {
        eprintln!("no .{} documents under {}", config.workspace.extension, path.display());
        exit(2);
    }

    let report = check_workspace(uris, options).await.unwrap_or_else(|err| {
        eprintln!("build failed: {}", err);
        exit(2);
    });

    match format.as_str() {
        "human" => print_human(&report),
        "json" => print_json(&report),
        other => {
            eprintln!("unknown format '{}', expected human or json", other);
            exit(2);
        }
    }

    let errors = report
        .iter()
        .flat_map(|(_, diagnostics)| diagnostics)
        .filter(|diagnostic| diagnostic.severity == Severity::Error)
        .count();
    if errors > 0 {
        exit(1);
    }
}

fn load_config(workspace_path: &Path, explicit: Option<&String>) -> StrataConfig {
    let loader = match explicit {
        Some(file) => Loader::new().with_file(file),
        None => {
            let root = if workspace_path.is_dir() {
                workspace_path.to_path_buf()
            } else {
                workspace_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default()
            };
            Loader::new().with_optional_file(root.join("strata.toml"))
        }
    };
    loader.build().unwrap_or_else(|err| {
        eprintln!("invalid configuration: {}", err);
        exit(2);
    })
}

/// Collect the documents to build: the file itself, or every matching file
/// under a directory (honoring ignore files, like the rest of the tooling).
fn collect_documents(path: &Path, config: &StrataConfig) -> Vec<Url> {
    let mut files = Vec::new();
    if path.is_file() {
        files.push(path.to_path_buf());
    } else {
        let walker = WalkBuilder::new(path)
            .follow_links(config.workspace.follow_symlinks)
            .build();
        for entry in walker.flatten() {
            let entry_path = entry.path();
            if entry_path.is_file()
                && entry_path
                    .extension()
                    .is_some_and(|ext| ext == config.workspace.extension.as_str())
            {
                files.push(entry_path.to_path_buf());
            }
        }
    }
    files.sort();
    files
        .iter()
        .filter_map(|file| {
            let absolute = file.canonicalize().ok()?;
            Url::from_file_path(absolute).ok()
        })
        .collect()
}

type Report = Vec<(Url, Vec<Diagnostic>)>;

async fn check_workspace(
    uris: Vec<Url>,
    options: BuildOptions,
) -> Result<Report, strata_engine::EngineError> {
    let front_end = NotationFrontEnd::new();
    let services = front_end.services(Box::new(FileTextSource::new()));
    let workspace = Workspace::new(services);
    workspace.build(uris.clone(), options).await?;
    workspace
        .query(ReadPriority::Normal, move |registry| {
            let mut report = Vec::new();
            for uri in uris {
                let Some(doc) = registry.get(&uri) else {
                    continue;
                };
                let mut diagnostics: Vec<Diagnostic> = doc
                    .parse_result()
                    .map(|parse| parse.syntax_errors.clone())
                    .unwrap_or_default();
                diagnostics.extend(doc.diagnostics().unwrap_or_default().iter().cloned());
                diagnostics.sort_by_key(|diagnostic| (diagnostic.line, diagnostic.col_start));
                report.push((uri, diagnostics));
            }
            report
        })
        .await
}

fn print_human(report: &Report) {
    let mut clean = 0usize;
    for (uri, diagnostics) in report {
        if diagnostics.is_empty() {
            clean += 1;
            continue;
        }
        let path = uri
            .to_file_path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| uri.to_string());
        for diagnostic in diagnostics {
            let severity = match diagnostic.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
                Severity::Information => "info",
            };
            println!(
                "{}:{}:{}: {}[{}]: {}",
                path,
                diagnostic.line + 1,
                diagnostic.col_start + 1,
                severity,
                diagnostic.category,
                diagnostic.message
            );
        }
    }
    println!(
        "{} of {} documents clean",
        clean,
        report.len()
    );
}

fn print_json(report: &Report) {
    let payload: Vec<serde_json::Value> = report
        .iter()
        .map(|(uri, diagnostics)| {
            serde_json::json!({
                "uri": uri.as_str(),
                "diagnostics": diagnostics,
            })
        })
        .collect();
    match serde_json::to_string_pretty(&payload) {
        Ok(rendered) => println!("{}", rendered),
        Err(err) => {
            eprintln!("failed to render report: {}", err);
            exit(2);
        }
    }
}

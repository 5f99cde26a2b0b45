//! CLI entry points for `chx`.
//!
//! Each `run_*` function backs one subcommand and prints its result to
//! stdout. Warnings go through `tracing`; short summaries of what was done
//! go to stderr so stdout stays pipeable.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use component_harness_core::error::StoreError;
use component_harness_core::library::{self, PromoteRequest};
use component_harness_core::loader::{LoadedUnit, UnitLoader, UnitRegistry};
use component_harness_core::models::{ChatMessage, GeneratedUnit};
use component_harness_core::render::html;
use component_harness_core::sanitize::{
    extract_unit_name, sanitize, truncation_hints, validate_shape,
};
use component_harness_core::store::UnitStore;

use crate::classify_script::create_classifier;
use crate::config::Config;
use crate::fs_store::FsUnitStore;
use crate::orchestrator::{cancel_pair, Orchestrator};
use crate::providers::Providers;

fn store_for(config: &Config) -> FsUnitStore {
    FsUnitStore::from_config(&config.storage)
}

/// `chx sanitize <file>`: print the cleaned source.
pub fn run_sanitize(path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    for hint in truncation_hints(&raw) {
        warn!(hint = %hint, "input may be truncated");
    }

    let unit = sanitize(&raw).with_context(|| format!("Cannot sanitize {}", path.display()))?;
    for issue in validate_shape(&unit.source_text).issues {
        warn!(unit = %unit.unit_name, issue = %issue, "unit shape");
    }
    if unit.braces_added > 0 {
        eprintln!("closed {} unbalanced brace(s)", unit.braces_added);
    }
    eprintln!("unit: {}", unit.unit_name);

    println!("{}", unit.source_text);
    Ok(())
}

/// `chx save <file> --intent <text>`: sanitize and store a generated unit.
pub async fn run_save(config: &Config, path: &Path, intent: &str) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let unit = sanitize(&raw).with_context(|| format!("Cannot sanitize {}", path.display()))?;

    let unit = GeneratedUnit::for_intent(
        intent,
        unit.unit_name,
        unit.source_text,
        &config.storage.extension,
    );
    store_for(config).save(&unit.filename, &unit.source_text).await?;

    println!("Saved {} as {}", unit.unit_name, unit.filename);
    println!("id: {}", unit.id);
    Ok(())
}

/// `chx units`: list generated unit filenames.
pub async fn run_units(config: &Config) -> Result<()> {
    let units = store_for(config).list_generated().await?;
    if units.is_empty() {
        println!("No generated units.");
        return Ok(());
    }
    for filename in units {
        println!("{}", filename);
    }
    Ok(())
}

/// `chx show <filename>`: print a generated unit's source.
pub async fn run_show(config: &Config, filename: &str) -> Result<()> {
    let source = store_for(config).read(filename).await?;
    println!("{}", source);
    Ok(())
}

/// `chx render <target>`: render a stored unit, or a local file, to an
/// HTML page on stdout.
///
/// A `target` that names an existing file is rendered from disk without
/// touching the store.
pub async fn run_render(
    config: &Config,
    target: &str,
    data_path: Option<&Path>,
    unit_name: Option<&str>,
) -> Result<()> {
    let data = match data_path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read data file {}", p.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Data file {} is not JSON", p.display()))?
        }
        None => serde_json::Value::Null,
    };

    let renderer = config.render.build_renderer()?;
    let local = Path::new(target);

    let output = if local.is_file() {
        let source = std::fs::read_to_string(local)
            .with_context(|| format!("Failed to read {}", local.display()))?;
        let unit = LoadedUnit::RawSource {
            filename: target.to_string(),
            unit_name: unit_name
                .map(str::to_string)
                .or_else(|| extract_unit_name(&source)),
            source,
        };
        renderer.render(&unit, &data)
    } else {
        let store: Arc<dyn UnitStore> = Arc::new(store_for(config));
        let loader = UnitLoader::new(Arc::new(UnitRegistry::new()), store);
        match loader.load(target, unit_name).await {
            Ok(unit) => renderer.render(&unit, &data),
            Err(e) => renderer.render_load_failure(target, &e, &data),
        }
    };

    eprintln!("rendered with {}", output.strategy.as_str());
    for note in &output.notes {
        eprintln!("  {}", note);
    }
    println!("{}", html::page(target, &output.html));
    Ok(())
}

/// `chx generate "<message>"`: run one chat turn. Ctrl-C cancels the turn
/// while it waits on a provider.
pub async fn run_generate(config: &Config, message: &str) -> Result<()> {
    let store: Arc<dyn UnitStore> = Arc::new(store_for(config));
    let providers = Providers::from_config(&config.providers)?;
    let orchestrator = Orchestrator::new(providers, store, &config.storage.extension);

    let (handle, signal) = cancel_pair();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let result = orchestrator
        .run_turn(&[ChatMessage::user(message)], &signal)
        .await;
    watcher.abort();
    let response = result?;

    println!("{}", response.response_text);
    println!();
    match (&response.unit_filename, &response.unit_name) {
        (Some(filename), Some(name)) => {
            println!("unit:     {} ({})", name, filename);
        }
        _ => println!("unit:     (not saved)"),
    }
    println!("origin:   {}", response.origin.as_str());
    if let Some(reason) = &response.fallback_reason {
        println!("fallback: {}", reason);
    }
    if let Some(err) = &response.error {
        println!("error:    {}", err);
    }
    Ok(())
}

/// `chx promote <filename> --name <Name>`: copy a generated unit into the
/// library.
pub async fn run_promote(
    config: &Config,
    filename: &str,
    name: &str,
    category: Option<String>,
    description: Option<String>,
    auto: bool,
) -> Result<()> {
    let store = store_for(config);
    let mut req = PromoteRequest {
        generated_filename: filename.to_string(),
        unit_name: name.to_string(),
        description: description.unwrap_or_default(),
        category: category.unwrap_or_default(),
        tags: Vec::new(),
    };

    if auto {
        let classifier = create_classifier(&config.classifier)?;
        library::fill_metadata(&store, classifier.as_ref(), &mut req).await?;
    }

    let promotion = library::promote(&store, req, &config.storage.extension).await?;
    let record = &promotion.record;
    if promotion.name_modified {
        println!(
            "Name {} was taken in {}; saved as {}",
            promotion.original_name, record.category, record.name
        );
    }
    println!("Promoted {} to {}/{}", filename, record.category, record.filename);
    println!("id:          {}", record.id);
    if !record.description.is_empty() {
        println!("description: {}", record.description);
    }
    if !record.tags.is_empty() {
        println!("tags:        {}", record.tags.join(", "));
    }
    Ok(())
}

/// `chx library list`.
pub async fn run_library_list(config: &Config) -> Result<()> {
    let records = library::list_library(&store_for(config)).await?;
    if records.is_empty() {
        println!("Library is empty.");
        return Ok(());
    }
    println!("{:<28} {:<16} {:<24} TAGS", "ID", "CATEGORY", "NAME");
    for r in records {
        println!(
            "{:<28} {:<16} {:<24} {}",
            r.id,
            r.category,
            r.name,
            r.tags.join(",")
        );
    }
    Ok(())
}

/// `chx library delete <id>`.
pub async fn run_library_delete(config: &Config, id: &str) -> Result<()> {
    match library::delete_library(&store_for(config), id).await {
        Ok(record) => {
            println!("Deleted {} ({}/{})", record.id, record.category, record.filename);
            Ok(())
        }
        Err(StoreError::NotFound(_)) => bail!("library entry not found: {}", id),
        Err(e) => Err(e.into()),
    }
}

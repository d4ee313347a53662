#![deny(warnings)]

//! Headless CLI over the roster store: materials views, conversions and
//! roster/inventory mutations. Output is JSON on stdout.

use anyhow::{bail, Context, Result};
use persistence::{MutationReport, MutationStatus, StoreError, UnitUpdate};
use roster_core::{UnitId, UnitKind};
use roster_plan::{compute_total_materials, material_lines, PlannerConfig, Reference};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: roster [--config FILE] [--db URL] [--reference FILE] <command>

commands:
  materials                 roster-wide requirements against the inventory
  unit <id>                 requirements of one unit
  convert <item> <needed>   tier conversion of one item against the inventory
  list                      stored units
  add <name> <Character|Partner> [json]
                            optional initial stats, same shape as update
  update <id> <json>        e.g. '{\"goal_level\": 70}'
  remove <id>
  upgrade <id>              pay for a unit's goals and promote it
  inventory                 stored item amounts
  set <item>=<amount>...    replace item amounts
  caps                      potential caps from reference data
  version";

struct Args {
    config: Option<PathBuf>,
    db: Option<String>,
    reference: Option<PathBuf>,
    command: Vec<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        db: None,
        reference: None,
        command: Vec::new(),
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = Some(it.next().context("--config needs a path")?.into()),
            "--db" => args.db = Some(it.next().context("--db needs a URL")?),
            "--reference" => {
                args.reference = Some(it.next().context("--reference needs a path")?.into())
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            _ => args.command.push(arg),
        }
    }
    Ok(args)
}

fn load_config(args: &Args) -> Result<PlannerConfig> {
    let mut config = match &args.config {
        Some(path) => PlannerConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => PlannerConfig::default(),
    };
    if let Some(db) = &args.db {
        config.database_url = db.clone();
    }
    if let Some(reference) = &args.reference {
        config.reference_path = reference.clone();
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_id(raw: &str) -> Result<UnitId> {
    Ok(UnitId(raw.parse().with_context(|| format!("bad unit id {raw}"))?))
}

fn parse_amounts(pairs: &[&str]) -> Result<BTreeMap<String, u64>> {
    pairs
        .iter()
        .map(|pair| {
            let (name, amount) = pair
                .split_once('=')
                .with_context(|| format!("expected <item>=<amount>, got {pair}"))?;
            let amount = amount
                .parse()
                .with_context(|| format!("bad amount for {name}"))?;
            Ok((name.to_string(), amount))
        })
        .collect()
}

/// Print the outcome of a mutation and fail the process on error.
fn report<T>(result: Result<T, StoreError>, ok: impl FnOnce(&T) -> MutationReport) -> Result<()> {
    let report = match &result {
        Ok(value) => ok(value),
        Err(e) => MutationReport::from(e),
    };
    print_json(&report)?;
    if report.status != MutationStatus::Ok {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let command: Vec<&str> = args.command.iter().map(String::as_str).collect();
    if command.first() == Some(&"version") {
        println!(
            "roster {} ({} {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        );
        return Ok(());
    }
    if command.is_empty() {
        bail!("{USAGE}");
    }

    let config = load_config(&args)?;
    debug!(?config, "configuration");
    let reference = Reference::load(&config.reference_path)
        .with_context(|| format!("loading {}", config.reference_path.display()))?;
    if command[0] == "caps" {
        return print_json(reference.potential_caps());
    }

    persistence::ensure_db_dir(&config.database_url)?;
    let pool = persistence::init_db(&config.database_url).await?;
    persistence::seed_items(&pool, reference.catalog_items()).await?;
    let policy = config.regression_policy;
    info!(command = command[0], "running");

    match command.as_slice() {
        ["materials"] => {
            let roster = persistence::load_roster(&pool).await?;
            let inventory = persistence::load_inventory(&pool).await?;
            let report = compute_total_materials(&roster, &reference, policy)?;
            let lines = material_lines(&report.total, &inventory, &reference);
            print_json(&json!({ "lines": lines, "by_unit": report.by_unit }))
        }
        ["unit", id] => {
            let id = parse_id(id)?;
            let unit = persistence::get_unit(&pool, id).await?;
            let inventory = persistence::load_inventory(&pool).await?;
            let materials = roster_plan::requirements_for(&unit, &reference, policy)?;
            let lines = material_lines(&materials, &inventory, &reference);
            print_json(&json!({ "unit": unit, "lines": lines }))
        }
        ["convert", item, needed] => {
            let needed: u64 = needed.parse().context("bad amount")?;
            let inventory = persistence::load_inventory(&pool).await?;
            let available = inventory.amount(item);
            print_json(&roster_econ::convert(item, needed, available, &inventory))
        }
        ["list"] => print_json(&persistence::load_roster(&pool).await?),
        ["inventory"] => print_json(&persistence::load_inventory(&pool).await?),
        ["add", name, kind, rest @ ..] if rest.len() <= 1 => {
            let kind: UnitKind = kind.parse()?;
            let initial: UnitUpdate = match rest.first() {
                Some(body) => serde_json::from_str(body).context("bad unit JSON")?,
                None => UnitUpdate::default(),
            };
            let result =
                persistence::create_unit(&pool, &reference, policy, name, kind, &initial).await;
            report(result, |id| MutationReport::ok(format!("{name} added"), Some(*id)))
        }
        ["update", id, body] => {
            let id = parse_id(id)?;
            let update: UnitUpdate = serde_json::from_str(body).context("bad update JSON")?;
            let result = persistence::update_unit(&pool, &reference, policy, id, &update).await;
            report(result, |unit| {
                MutationReport::ok(format!("{} updated", unit.name), unit.id)
            })
        }
        ["remove", id] => {
            let id = parse_id(id)?;
            let result = persistence::delete_unit(&pool, id).await;
            report(result, |_| MutationReport::ok("unit removed", Some(id)))
        }
        ["upgrade", id] => {
            let id = parse_id(id)?;
            let result = persistence::upgrade_unit(&pool, &reference, policy, id).await;
            report(result, |upgrade| {
                MutationReport::ok(
                    format!(
                        "{} upgraded, {} items spent",
                        upgrade.unit.name,
                        upgrade.deltas.values().filter(|d| **d < 0).count()
                    ),
                    Some(id),
                )
            })
        }
        ["set", pairs @ ..] if !pairs.is_empty() => {
            let amounts = parse_amounts(pairs)?;
            let result = persistence::replace_inventory(&pool, &amounts).await;
            report(result, |update| {
                let mut report = MutationReport::ok(
                    format!("{} items updated", update.updated.len()),
                    None,
                );
                if !update.unknown.is_empty() {
                    report.message = format!(
                        "{}; unknown: {}",
                        report.message,
                        update.unknown.join(", ")
                    );
                }
                report
            })
        }
        _ => bail!("{USAGE}"),
    }
}

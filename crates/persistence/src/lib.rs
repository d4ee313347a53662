#![deny(warnings)]

//! Persistence layer: SQLite schema, roster and inventory storage, and the
//! upgrade transaction.

use roster_core::{
    validate_unit, Inventory, PotentialLevels, PotentialType, Unit, UnitId, UnitKind,
    ValidationError,
};
use roster_econ::{settle, EconError};
use roster_plan::{requirements_for, CatalogItem, PlanError, Reference, RegressionPolicy};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

/// Returns the default SQLite URL used for local saves.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./saves/roster.db"
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Insufficient(#[from] EconError),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Db(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        StoreError::Db(e.to_string())
    }
}

impl StoreError {
    pub fn status(&self) -> MutationStatus {
        match self {
            StoreError::Db(_) | StoreError::Corrupt(_) => MutationStatus::StoreFailure,
            StoreError::NotFound(_) => MutationStatus::NotFound,
            StoreError::Validation(_) | StoreError::Plan(PlanError::Validation { .. }) => {
                MutationStatus::ValidationError
            }
            StoreError::Plan(PlanError::Computation { .. }) => MutationStatus::ComputationFailure,
            StoreError::Insufficient(_) => MutationStatus::InsufficientMaterials,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Ok,
    ValidationError,
    NotFound,
    ComputationFailure,
    InsufficientMaterials,
    StoreFailure,
}

/// Outcome of a mutation, as reported to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReport {
    pub status: MutationStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UnitId>,
}

impl MutationReport {
    pub fn ok(message: impl Into<String>, id: Option<UnitId>) -> Self {
        Self {
            status: MutationStatus::Ok,
            message: message.into(),
            id,
        }
    }
}

impl From<&StoreError> for MutationReport {
    fn from(e: &StoreError) -> Self {
        Self {
            status: e.status(),
            message: e.to_string(),
            id: None,
        }
    }
}

/// Create the parent directory of a file-backed SQLite URL.
pub fn ensure_db_dir(url: &str) -> std::io::Result<()> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"));
    match path {
        Some(path) if !path.starts_with(":memory:") => {
            let path = path.split('?').next().unwrap_or(path);
            match Path::new(path).parent() {
                Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
                _ => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

/// Open the database and run the embedded migrations.
pub async fn init_db(url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);
    // every connection to :memory: is its own database
    let pool = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(4)
    }
    .connect_with(options)
    .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!(url, "database ready");
    Ok(pool)
}

fn to_sql(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

fn column_u32(row: &SqliteRow, column: &str) -> Result<u32, StoreError> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} = {value}")))
}

fn unit_not_found(id: UnitId) -> StoreError {
    StoreError::NotFound(format!("unit {id}"))
}

/// Insert the catalog items that are not stored yet. Existing amounts are
/// left alone. Returns the number of new rows.
pub async fn seed_items(pool: &SqlitePool, items: &[CatalogItem]) -> Result<u64, StoreError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for item in items {
        inserted += sqlx::query("INSERT OR IGNORE INTO items (name, type, amount) VALUES (?, ?, ?)")
            .bind(&item.name)
            .bind(&item.kind)
            .bind(to_sql(item.amount))
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;
    info!(inserted, "catalog items seeded");
    Ok(inserted)
}

async fn read_inventory(conn: &mut SqliteConnection) -> Result<Inventory, StoreError> {
    let rows = sqlx::query("SELECT name, type, amount FROM items")
        .fetch_all(&mut *conn)
        .await?;
    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get("name")?;
        let kind: String = row.try_get("type")?;
        let amount: i64 = row.try_get("amount")?;
        entries.push((name, kind, amount));
    }
    Ok(Inventory::from_signed(entries))
}

pub async fn load_inventory(pool: &SqlitePool) -> Result<Inventory, StoreError> {
    let mut conn = pool.acquire().await?;
    read_inventory(&mut conn).await
}

/// Result of an inventory replacement.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub updated: Vec<String>,
    /// Names with no stored item; nothing was inserted for them.
    pub unknown: Vec<String>,
}

/// Overwrite the amounts of known items.
pub async fn replace_inventory(
    pool: &SqlitePool,
    amounts: &BTreeMap<String, u64>,
) -> Result<InventoryUpdate, StoreError> {
    let mut tx = pool.begin().await?;
    let mut update = InventoryUpdate::default();
    for (name, amount) in amounts {
        let affected = sqlx::query("UPDATE items SET amount = ? WHERE name = ?")
            .bind(to_sql(*amount))
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if affected == 0 {
            warn!(item = %name, "unknown item ignored");
            update.unknown.push(name.clone());
        } else {
            update.updated.push(name.clone());
        }
    }
    tx.commit().await?;
    Ok(update)
}

fn unit_from_row(row: &SqliteRow) -> Result<Unit, StoreError> {
    let kind: String = row.try_get("kind")?;
    let kind = UnitKind::from_str(&kind).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let id: i64 = row.try_get("id")?;
    Ok(Unit {
        id: Some(UnitId(id)),
        name: row.try_get("name")?,
        kind,
        current_level: column_u32(row, "current_level")?,
        goal_level: column_u32(row, "goal_level")?,
        current_ascension: column_u32(row, "current_ascension")?,
        goal_ascension: column_u32(row, "goal_ascension")?,
        potentials: BTreeMap::new(),
    })
}

fn potential_from_row(row: &SqliteRow) -> Result<(PotentialType, PotentialLevels), StoreError> {
    let name: String = row.try_get("potential_type")?;
    let potential =
        PotentialType::from_str(&name).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let levels = PotentialLevels {
        current: column_u32(row, "current_level")?,
        goal: column_u32(row, "goal_level")?,
    };
    Ok((potential, levels))
}

const UNIT_COLUMNS: &str =
    "id, name, kind, current_level, goal_level, current_ascension, goal_ascension";

async fn read_unit(conn: &mut SqliteConnection, id: UnitId) -> Result<Unit, StoreError> {
    let row = sqlx::query(&format!("SELECT {UNIT_COLUMNS} FROM units WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| unit_not_found(id))?;
    let mut unit = unit_from_row(&row)?;
    let rows = sqlx::query(
        "SELECT potential_type, current_level, goal_level FROM potentials WHERE unit_id = ?",
    )
    .bind(id.0)
    .fetch_all(&mut *conn)
    .await?;
    for row in &rows {
        let (potential, levels) = potential_from_row(row)?;
        unit.potentials.insert(potential, levels);
    }
    Ok(unit)
}

/// All units in display order, with their potentials.
pub async fn load_roster(pool: &SqlitePool) -> Result<Vec<Unit>, StoreError> {
    let mut conn = pool.acquire().await?;
    let rows = sqlx::query(&format!(
        "SELECT {UNIT_COLUMNS} FROM units ORDER BY display_order, id"
    ))
    .fetch_all(&mut *conn)
    .await?;
    let mut roster = rows
        .iter()
        .map(unit_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let rows = sqlx::query("SELECT unit_id, potential_type, current_level, goal_level FROM potentials")
        .fetch_all(&mut *conn)
        .await?;
    let mut by_unit: BTreeMap<i64, Vec<(PotentialType, PotentialLevels)>> = BTreeMap::new();
    for row in &rows {
        let unit_id: i64 = row.try_get("unit_id")?;
        by_unit.entry(unit_id).or_default().push(potential_from_row(row)?);
    }
    for unit in &mut roster {
        if let Some(UnitId(id)) = unit.id {
            unit.potentials.extend(by_unit.remove(&id).unwrap_or_default());
        }
    }
    Ok(roster)
}

pub async fn get_unit(pool: &SqlitePool, id: UnitId) -> Result<Unit, StoreError> {
    let mut conn = pool.acquire().await?;
    read_unit(&mut conn, id).await
}

async fn write_potentials(conn: &mut SqliteConnection, unit: &Unit, id: UnitId) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM potentials WHERE unit_id = ?")
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    for (potential, levels) in &unit.potentials {
        sqlx::query(
            "INSERT INTO potentials (unit_id, potential_type, current_level, goal_level) VALUES (?, ?, ?, ?)",
        )
        .bind(id.0)
        .bind(potential.as_str())
        .bind(i64::from(levels.current))
        .bind(i64::from(levels.goal))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn write_unit(conn: &mut SqliteConnection, unit: &Unit, id: UnitId) -> Result<(), StoreError> {
    let affected = sqlx::query(
        "UPDATE units SET current_level = ?, goal_level = ?, current_ascension = ?, goal_ascension = ? WHERE id = ?",
    )
    .bind(i64::from(unit.current_level))
    .bind(i64::from(unit.goal_level))
    .bind(i64::from(unit.current_ascension))
    .bind(i64::from(unit.goal_ascension))
    .bind(id.0)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if affected == 0 {
        return Err(unit_not_found(id));
    }
    write_potentials(conn, unit, id).await
}

/// Add a unit. Stats start at the creation defaults, overridden by
/// `initial`. The name must be in the catalog for its kind.
pub async fn create_unit(
    pool: &SqlitePool,
    reference: &Reference,
    policy: RegressionPolicy,
    name: &str,
    kind: UnitKind,
    initial: &UnitUpdate,
) -> Result<UnitId, StoreError> {
    let known = match kind {
        UnitKind::Character => reference.character(name).is_some(),
        UnitKind::Partner => reference.partner(name).is_some(),
    };
    if !known {
        return Err(ValidationError::UnknownUnit {
            kind,
            name: name.to_string(),
        }
        .into());
    }
    let mut unit = Unit::new(name, kind);
    initial.apply(&mut unit);
    validate_unit(&unit, reference.potential_caps())?;
    if policy == RegressionPolicy::Reject {
        if let Some(err) = unit.regression() {
            return Err(err.into());
        }
    }

    let mut tx = pool.begin().await?;
    let id = sqlx::query(
        "INSERT INTO units (name, kind, current_level, goal_level, current_ascension, goal_ascension, display_order) \
         VALUES (?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(display_order), 0) + 1 FROM units))",
    )
    .bind(&unit.name)
    .bind(kind.as_str())
    .bind(i64::from(unit.current_level))
    .bind(i64::from(unit.goal_level))
    .bind(i64::from(unit.current_ascension))
    .bind(i64::from(unit.goal_ascension))
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();
    let id = UnitId(id);
    write_potentials(&mut tx, &unit, id).await?;
    tx.commit().await?;
    info!(%id, name, %kind, "unit created");
    Ok(id)
}

/// Stat changes for an existing unit. Absent fields are kept; `potentials`,
/// when given, replaces the stored set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitUpdate {
    #[serde(default)]
    pub current_level: Option<u32>,
    #[serde(default)]
    pub goal_level: Option<u32>,
    #[serde(default)]
    pub current_ascension: Option<u32>,
    #[serde(default)]
    pub goal_ascension: Option<u32>,
    #[serde(default)]
    pub potentials: Option<BTreeMap<PotentialType, PotentialLevels>>,
}

impl UnitUpdate {
    pub fn apply(&self, unit: &mut Unit) {
        let fields = [
            (&mut unit.current_level, self.current_level),
            (&mut unit.goal_level, self.goal_level),
            (&mut unit.current_ascension, self.current_ascension),
            (&mut unit.goal_ascension, self.goal_ascension),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                *field = value;
            }
        }
        if let Some(potentials) = &self.potentials {
            unit.potentials = potentials.clone();
        }
    }
}

pub async fn update_unit(
    pool: &SqlitePool,
    reference: &Reference,
    policy: RegressionPolicy,
    id: UnitId,
    update: &UnitUpdate,
) -> Result<Unit, StoreError> {
    let mut tx = pool.begin().await?;
    let mut unit = read_unit(&mut tx, id).await?;
    update.apply(&mut unit);
    validate_unit(&unit, reference.potential_caps())?;
    if policy == RegressionPolicy::Reject {
        if let Some(err) = unit.regression() {
            return Err(err.into());
        }
    }
    write_unit(&mut tx, &unit, id).await?;
    tx.commit().await?;
    info!(%id, "unit updated");
    Ok(unit)
}

pub async fn delete_unit(pool: &SqlitePool, id: UnitId) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM potentials WHERE unit_id = ?")
        .bind(id.0)
        .execute(&mut *tx)
        .await?;
    let affected = sqlx::query("DELETE FROM units WHERE id = ?")
        .bind(id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(unit_not_found(id));
    }
    tx.commit().await?;
    info!(%id, "unit deleted");
    Ok(())
}

/// A committed upgrade.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upgrade {
    pub unit: Unit,
    pub deltas: BTreeMap<String, i64>,
}

/// Pay for a unit's goals from the inventory and promote the unit to them.
///
/// Runs in one transaction: the unit row is touched first so the write lock
/// is held before the inventory is read. On any failure nothing changes.
pub async fn upgrade_unit(
    pool: &SqlitePool,
    reference: &Reference,
    policy: RegressionPolicy,
    id: UnitId,
) -> Result<Upgrade, StoreError> {
    let mut tx = pool.begin().await?;
    let locked = sqlx::query("UPDATE units SET display_order = display_order WHERE id = ?")
        .bind(id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if locked == 0 {
        return Err(unit_not_found(id));
    }
    let mut unit = read_unit(&mut tx, id).await?;
    let requirements = requirements_for(&unit, reference, policy)?;
    let inventory = read_inventory(&mut tx).await?;
    let settlement = settle(&requirements, &inventory, reference.universals())?;

    for name in settlement.deltas.keys() {
        let (kind, amount) = settlement
            .inventory
            .get(name)
            .map(|item| (item.kind.as_str(), item.amount))
            .unwrap_or(("", 0));
        sqlx::query(
            "INSERT INTO items (name, type, amount) VALUES (?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET amount = excluded.amount",
        )
        .bind(name)
        .bind(kind)
        .bind(to_sql(amount))
        .execute(&mut *tx)
        .await?;
    }
    unit.promote_to_goal();
    write_unit(&mut tx, &unit, id).await?;
    tx.commit().await?;
    info!(%id, name = %unit.name, items = settlement.deltas.len(), "unit upgraded");
    Ok(Upgrade {
        unit,
        deltas: settlement.deltas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = r#"
characters:
  - name: Aria
    class: Striker
    attribute: Void
partners:
  - name: Kit
    class: Hunter
char_levels:
  - { level: 2, xp: 300 }
  - { level: 3, xp: 300 }
part_levels:
  - { level: 2, xp: 200 }
char_ascension:
  - { step: 1, suffix: "1", cost: 4, credits: 1000 }
part_ascension:
  - { step: 1, suffix: "1", cost: 3, credits: 500 }
potentials:
  - { node: Comm_Basic_Level, level: 0, suffix: "1", cost: 2, credits: 100 }
  - { node: Comm_Basic_Level, level: 1, suffix: "1", cost: 2, credits: 100 }
  - { node: Comm_Basic_Level, level: 2, suffix: "2", cost: 1 }
  - { node: Comm_Basic_Level, level: 3, suffix: "2", cost: 1 }
  - { node: Comm_Basic_Level, level: 4, suffix: "2", cost: 1 }
  - { node: Comm_Basic_Level, level: 5, suffix: "2", cost: 1 }
  - { node: Comm_Basic_Level, level: 6, suffix: "2", cost: 1 }
  - { node: Comm_Basic_Level, level: 7, suffix: "2", cost: 1 }
  - { node: Comm_Basic_Level, level: 8, suffix: "2", cost: 1 }
  - { node: Comm_Basic_Level, level: 9, suffix: "2", cost: 1 }
  - { node: Comm_Common_Level, level: 0, suffix: "2", cost: 1 }
  - { node: Comm_Common_Level, level: 1, suffix: "2", cost: 1 }
  - { node: Comm_Common_Level, level: 2, suffix: "2", cost: 1 }
  - { node: Comm_Common_Level, level: 3, suffix: "2", cost: 1 }
  - { node: Comm_Common_Level, level: 4, suffix: "2", cost: 1 }
  - { node: Comm_Common_Level, level: 5, suffix: "2", cost: 1 }
  - { node: Comm_Common_Level, level: 6, suffix: "2", cost: 1 }
  - { node: Comm_Unique_Level, level: 0, suffix: "2", cost: 1 }
  - { node: Comm_Unique_Level, level: 1, suffix: "2", cost: 1 }
  - { node: Comm_Unique_Level, level: 2, suffix: "2", cost: 1 }
  - { node: Comm_Unique_Level, level: 3, suffix: "2", cost: 1 }
  - { node: Comm_Unique_Level, level: 4, suffix: "2", cost: 1 }
  - { node: Comm_Unique_Level, level: 5, suffix: "2", cost: 1 }
  - { node: Comm_Unique_Level, level: 6, suffix: "2", cost: 1 }
  - { node: Crit_Chance_Level, level: 0, suffix: "2", cost: 1 }
  - { node: Crit_Chance_Level, level: 1, suffix: "2", cost: 1 }
  - { node: Crit_Chance_Level, level: 2, suffix: "2", cost: 1 }
  - { node: Crit_Dmg_Level, level: 0, suffix: "2", cost: 1 }
  - { node: Crit_Dmg_Level, level: 1, suffix: "2", cost: 1 }
  - { node: Crit_Dmg_Level, level: 2, suffix: "2", cost: 1 }
  - { node: Unique_1, level: 0, suffix: "2", cost: 1 }
  - { node: Unique_2, level: 0, suffix: "2", cost: 1 }
  - { node: Unique_3, level: 0, suffix: "2", cost: 1 }
  - { node: Unique_4, level: 0, suffix: "2", cost: 1 }
items:
  - { name: Unit, type: Credit, amount: 0 }
  - { name: Char_Level_1, type: XP }
  - { name: Char_Level_2, type: XP }
  - { name: Char_Ascend_Striker_1, type: Ascension }
  - { name: Char_Ascend_Striker_2, type: Ascension }
  - { name: Void_1, type: Potential }
"#;

    fn reference() -> Reference {
        Reference::from_yaml_str(REFERENCE).unwrap()
    }

    async fn store(reference: &Reference) -> SqlitePool {
        let pool = init_db("sqlite::memory:").await.unwrap();
        seed_items(&pool, reference.catalog_items()).await.unwrap();
        pool
    }

    async fn create(pool: &SqlitePool, reference: &Reference, name: &str, kind: UnitKind) -> UnitId {
        create_unit(pool, reference, RegressionPolicy::Clamp, name, kind, &UnitUpdate::default())
            .await
            .unwrap()
    }

    /// Aria at level 1, goal 3 and ascension 0 -> 1, one Comm_Basic step.
    async fn small_goal(pool: &SqlitePool, reference: &Reference) -> UnitId {
        let mut potentials: BTreeMap<_, _> = PotentialType::ALL
            .into_iter()
            .map(|p| (p, PotentialLevels { current: 0, goal: 0 }))
            .collect();
        potentials.insert(PotentialType::CommBasic, PotentialLevels { current: 1, goal: 2 });
        let update = UnitUpdate {
            goal_level: Some(3),
            goal_ascension: Some(1),
            potentials: Some(potentials),
            ..UnitUpdate::default()
        };
        let policy = RegressionPolicy::Clamp;
        create_unit(pool, reference, policy, "Aria", UnitKind::Character, &update)
            .await
            .unwrap()
    }

    fn amounts(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(n, a)| (n.to_string(), *a)).collect()
    }

    #[test]
    fn url_is_sqlite() {
        assert!(default_sqlite_url().starts_with("sqlite://"));
    }

    #[tokio::test]
    async fn created_units_round_trip() {
        let r = reference();
        let pool = store(&r).await;
        let a = create(&pool, &r, "Aria", UnitKind::Character).await;
        let k = create(&pool, &r, "Kit", UnitKind::Partner).await;
        let roster = load_roster(&pool).await.unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].id, Some(a));
        assert_eq!(roster[1].id, Some(k));
        assert_eq!(roster[0].potentials.len(), 9);
        assert!(roster[1].potentials.is_empty());
        assert_eq!(roster[0].goal_level, Unit::DEFAULT_GOAL_LEVEL);
        assert_eq!(get_unit(&pool, a).await.unwrap(), roster[0]);
    }

    #[tokio::test]
    async fn unknown_names_are_rejected() {
        let r = reference();
        let pool = store(&r).await;
        let err = create_unit(
            &pool,
            &r,
            RegressionPolicy::Clamp,
            "Aria",
            UnitKind::Partner,
            &UnitUpdate::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), MutationStatus::ValidationError);
        assert!(load_roster(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_replaces_potentials_and_checks_caps() {
        let r = reference();
        let pool = store(&r).await;
        let id = small_goal(&pool, &r).await;
        let unit = get_unit(&pool, id).await.unwrap();
        assert_eq!(unit.goal_level, 3);
        assert_eq!(unit.potential(PotentialType::CommBasic).goal, 2);

        let update = UnitUpdate {
            current_level: Some(2),
            ..UnitUpdate::default()
        };
        let unit = update_unit(&pool, &r, RegressionPolicy::Clamp, id, &update)
            .await
            .unwrap();
        assert_eq!((unit.current_level, unit.goal_level), (2, 3));
        assert_eq!(unit.potentials.len(), 9);

        let mut potentials = BTreeMap::new();
        potentials.insert(PotentialType::CommBasic, PotentialLevels { current: 0, goal: 11 });
        let update = UnitUpdate {
            potentials: Some(potentials),
            ..UnitUpdate::default()
        };
        let err = update_unit(&pool, &r, RegressionPolicy::Clamp, id, &update)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::PotentialAboveCap { .. })
        ));

        let err = update_unit(&pool, &r, RegressionPolicy::Clamp, UnitId(99), &UnitUpdate::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), MutationStatus::NotFound);
    }

    #[tokio::test]
    async fn delete_removes_unit() {
        let r = reference();
        let pool = store(&r).await;
        let id = create(&pool, &r, "Aria", UnitKind::Character).await;
        delete_unit(&pool, id).await.unwrap();
        assert!(load_roster(&pool).await.unwrap().is_empty());
        let err = delete_unit(&pool, id).await.unwrap_err();
        assert_eq!(MutationReport::from(&err).status, MutationStatus::NotFound);
    }

    #[tokio::test]
    async fn inventory_replacement_reports_unknown_names() {
        let r = reference();
        let pool = store(&r).await;
        let update = replace_inventory(&pool, &amounts(&[("Unit", 5000), ("Mystery", 3)]))
            .await
            .unwrap();
        assert_eq!(update.updated, vec!["Unit".to_string()]);
        assert_eq!(update.unknown, vec!["Mystery".to_string()]);
        let inv = load_inventory(&pool).await.unwrap();
        assert_eq!(inv.amount("Unit"), 5000);
        assert!(!inv.contains("Mystery"));
        assert_eq!(inv.get("Unit").unwrap().kind, "Credit");
    }

    #[tokio::test]
    async fn upgrade_pays_with_conversion_and_promotes() {
        let r = reference();
        let pool = store(&r).await;
        let id = small_goal(&pool, &r).await;
        // needs Char_Level_1 x6, Char_Ascend_Striker_1 x4, Void_1 x2, Unit x1100
        replace_inventory(
            &pool,
            &amounts(&[
                ("Unit", 1500),
                ("Char_Level_2", 2),
                ("Char_Ascend_Striker_1", 1),
                ("Char_Ascend_Striker_2", 1),
                ("Void_1", 2),
            ]),
        )
        .await
        .unwrap();

        let upgrade = upgrade_unit(&pool, &r, RegressionPolicy::Clamp, id).await.unwrap();
        assert_eq!(upgrade.unit.current_level, 3);
        assert_eq!(upgrade.unit.current_ascension, 1);
        assert_eq!(upgrade.unit.potential(PotentialType::CommBasic).current, 2);

        let inv = load_inventory(&pool).await.unwrap();
        assert_eq!(inv.amount("Unit"), 400);
        assert_eq!(inv.amount("Char_Ascend_Striker_1"), 0);
        assert_eq!(inv.amount("Char_Ascend_Striker_2"), 0);
        assert_eq!(inv.amount("Void_1"), 0);
        // 2 x 5 XP minus 6 leaves 4 in tier-1 change
        assert_eq!(inv.amount("Char_Level_2"), 0);
        assert_eq!(inv.amount("Char_Level_1"), 4);
        assert_eq!(get_unit(&pool, id).await.unwrap(), upgrade.unit);
    }

    #[tokio::test]
    async fn failed_upgrade_changes_nothing() {
        let r = reference();
        let pool = store(&r).await;
        let id = small_goal(&pool, &r).await;
        replace_inventory(&pool, &amounts(&[("Unit", 5000), ("Char_Level_1", 6)]))
            .await
            .unwrap();
        let before_unit = get_unit(&pool, id).await.unwrap();
        let before_inv = load_inventory(&pool).await.unwrap();

        let err = upgrade_unit(&pool, &r, RegressionPolicy::Clamp, id).await.unwrap_err();
        assert_eq!(err.status(), MutationStatus::InsufficientMaterials);
        assert_eq!(get_unit(&pool, id).await.unwrap(), before_unit);
        assert_eq!(load_inventory(&pool).await.unwrap(), before_inv);

        let err = upgrade_unit(&pool, &r, RegressionPolicy::Clamp, UnitId(42))
            .await
            .unwrap_err();
        assert_eq!(err.status(), MutationStatus::NotFound);
    }

    #[tokio::test]
    async fn seeding_keeps_existing_amounts() {
        let r = reference();
        let pool = store(&r).await;
        replace_inventory(&pool, &amounts(&[("Void_1", 9)])).await.unwrap();
        assert_eq!(seed_items(&pool, r.catalog_items()).await.unwrap(), 0);
        assert_eq!(load_inventory(&pool).await.unwrap().amount("Void_1"), 9);
    }

    #[tokio::test]
    async fn creation_takes_initial_stats() {
        let r = reference();
        let pool = store(&r).await;
        let initial = UnitUpdate {
            current_level: Some(2),
            goal_level: Some(3),
            goal_ascension: Some(1),
            ..UnitUpdate::default()
        };
        let id = create_unit(&pool, &r, RegressionPolicy::Clamp, "Aria", UnitKind::Character, &initial)
            .await
            .unwrap();
        let unit = get_unit(&pool, id).await.unwrap();
        assert_eq!((unit.current_level, unit.goal_level), (2, 3));
        assert_eq!((unit.current_ascension, unit.goal_ascension), (0, 1));
        assert_eq!(unit.potentials.len(), 9);

        let mut potentials = BTreeMap::new();
        potentials.insert(PotentialType::CommBasic, PotentialLevels { current: 0, goal: 11 });
        let over_cap = UnitUpdate {
            potentials: Some(potentials),
            ..UnitUpdate::default()
        };
        let err = create_unit(&pool, &r, RegressionPolicy::Clamp, "Aria", UnitKind::Character, &over_cap)
            .await
            .unwrap_err();
        assert_eq!(err.status(), MutationStatus::ValidationError);

        let regressed = UnitUpdate {
            current_level: Some(3),
            goal_level: Some(2),
            ..UnitUpdate::default()
        };
        let err = create_unit(&pool, &r, RegressionPolicy::Reject, "Kit", UnitKind::Partner, &regressed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::GoalBelowCurrent { .. })
        ));
        assert_eq!(load_roster(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shared_materials_pay_for_one_upgrade_only() {
        let r = reference();
        let pool = store(&r).await;
        let first = small_goal(&pool, &r).await;
        let second = small_goal(&pool, &r).await;
        // enough of everything for two, credits for one
        replace_inventory(
            &pool,
            &amounts(&[
                ("Unit", 1500),
                ("Char_Level_1", 12),
                ("Char_Ascend_Striker_1", 8),
                ("Void_1", 4),
            ]),
        )
        .await
        .unwrap();

        upgrade_unit(&pool, &r, RegressionPolicy::Clamp, first).await.unwrap();
        let after_first = load_inventory(&pool).await.unwrap();
        assert_eq!(after_first.amount("Unit"), 400);
        let before_unit = get_unit(&pool, second).await.unwrap();

        let err = upgrade_unit(&pool, &r, RegressionPolicy::Clamp, second)
            .await
            .unwrap_err();
        assert_eq!(err.status(), MutationStatus::InsufficientMaterials);
        assert_eq!(
            MutationReport::from(&err).message,
            "not enough Unit: need 1100, have 400"
        );
        assert_eq!(load_inventory(&pool).await.unwrap(), after_first);
        assert_eq!(get_unit(&pool, second).await.unwrap(), before_unit);
    }

    #[test]
    fn report_serialises_without_missing_id() {
        let report = MutationReport::ok("done", None);
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"status":"ok","message":"done"}"#);
        let err = StoreError::Insufficient(EconError::Shortfall {
            item: "Unit".into(),
            needed: 5,
            available: 1,
        });
        let report = MutationReport::from(&err);
        assert_eq!(report.status, MutationStatus::InsufficientMaterials);
        assert_eq!(report.message, "not enough Unit: need 5, have 1");
    }
}

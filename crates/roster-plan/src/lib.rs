#![deny(warnings)]

//! Material planning for a roster.
//!
//! Loads the reference data (unit catalog and cost tables), derives the
//! materials each unit needs to reach its goals, and aggregates them into
//! the roster-wide view checked against an inventory.

use roster_core::{
    add_material, merge_materials, validate_unit, Inventory, MaterialTable, PotentialType, Unit,
    UnitId, UnitKind, ValidationError, CREDIT_ITEM, EGO_CRYSTAL_ITEM,
};
use roster_econ::{substitute, ConvertedRequirement, UniversalTable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading reference data or configuration.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid reference data: {0}")]
    Invalid(String),
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for LoadError {
    fn from(e: serde_yaml::Error) -> Self {
        LoadError::Parse(e.to_string())
    }
}

/// Errors raised while computing a unit's materials.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("invalid unit {unit}: {source}")]
    Validation {
        unit: String,
        #[source]
        source: ValidationError,
    },
    /// Reference data cannot price a step inside the unit's range.
    #[error("cannot compute materials for {unit}: {reason}")]
    Computation { unit: String, reason: String },
}

/// What to do with a goal below its current value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegressionPolicy {
    /// The dimension costs nothing.
    #[default]
    Clamp,
    /// The unit is rejected with a validation error.
    Reject,
}

/// Planner configuration, usually read from a YAML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub database_url: String,
    pub reference_path: PathBuf,
    pub regression_policy: RegressionPolicy,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./saves/roster.db".to_string(),
            reference_path: PathBuf::from("assets/reference.yaml"),
            regression_policy: RegressionPolicy::Clamp,
        }
    }
}

impl PlannerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

/// Catalog entry of a character.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterDef {
    pub name: String,
    pub class: String,
    /// Prefix of the potential materials, e.g. `Void`.
    pub attribute: String,
    /// Boss slot (as named by potential rows) -> boss material.
    #[serde(default)]
    pub bosses: BTreeMap<String, String>,
}

/// Catalog entry of a partner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerDef {
    pub name: String,
    pub class: String,
}

/// XP needed to reach `level` from the level below.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRow {
    pub level: u32,
    pub xp: u64,
}

/// Cost of reaching ascension `step`. Several rows may share a step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AscensionRow {
    pub step: u32,
    /// Appended to `<Char|Part>_Ascend_<class>_`.
    pub suffix: String,
    pub cost: u64,
    #[serde(default)]
    pub credits: u64,
}

/// Cost of upgrading potential `node` from `level` to `level + 1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotentialRow {
    pub node: PotentialType,
    pub level: u32,
    /// Appended to `<attribute>_`.
    pub suffix: String,
    pub cost: u64,
    #[serde(default)]
    pub credits: u64,
    #[serde(default)]
    pub boss: Option<String>,
    #[serde(default)]
    pub boss_amount: u64,
    #[serde(default)]
    pub ego_crystal: u64,
}

/// An inventory item known to the game, with its starting amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub amount: u64,
}

fn default_xp_per_item() -> u64 {
    100
}

/// Reference data as stored on disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceData {
    #[serde(default)]
    pub characters: Vec<CharacterDef>,
    #[serde(default)]
    pub partners: Vec<PartnerDef>,
    #[serde(default)]
    pub char_levels: Vec<LevelRow>,
    #[serde(default)]
    pub part_levels: Vec<LevelRow>,
    #[serde(default)]
    pub char_ascension: Vec<AscensionRow>,
    #[serde(default)]
    pub part_ascension: Vec<AscensionRow>,
    #[serde(default)]
    pub potentials: Vec<PotentialRow>,
    #[serde(default)]
    pub items: Vec<CatalogItem>,
    /// Overrides the built-in universal families when present.
    #[serde(default)]
    pub universals: Option<UniversalTable>,
    /// XP granted by one tier-1 XP item.
    #[serde(default = "default_xp_per_item")]
    pub xp_per_item: u64,
}

#[derive(Clone, Debug, Default)]
struct KindTables {
    levels: BTreeMap<u32, u64>,
    ascension: BTreeMap<u32, Vec<AscensionRow>>,
}

/// Validated and indexed reference data.
#[derive(Clone, Debug)]
pub struct Reference {
    characters: BTreeMap<String, CharacterDef>,
    partners: BTreeMap<String, PartnerDef>,
    character_tables: KindTables,
    partner_tables: KindTables,
    potentials: BTreeMap<(PotentialType, u32), Vec<PotentialRow>>,
    caps: BTreeMap<PotentialType, u32>,
    items: Vec<CatalogItem>,
    universals: UniversalTable,
    xp_per_item: u64,
    boss_items: BTreeSet<String>,
    attributes: BTreeSet<String>,
}

fn index_unique<T, F>(rows: Vec<T>, what: &str, key: F) -> Result<BTreeMap<String, T>, LoadError>
where
    F: Fn(&T) -> &str,
{
    let mut out = BTreeMap::new();
    for row in rows {
        let name = key(&row).to_string();
        if out.insert(name.clone(), row).is_some() {
            return Err(LoadError::Invalid(format!("duplicate {what} {name}")));
        }
    }
    Ok(out)
}

fn kind_tables(
    levels: Vec<LevelRow>,
    ascension: Vec<AscensionRow>,
    what: &str,
) -> Result<KindTables, LoadError> {
    let mut tables = KindTables::default();
    for row in levels {
        if tables.levels.insert(row.level, row.xp).is_some() {
            return Err(LoadError::Invalid(format!(
                "duplicate {what} level row {}",
                row.level
            )));
        }
    }
    for row in ascension {
        tables.ascension.entry(row.step).or_default().push(row);
    }
    Ok(tables)
}

impl Reference {
    /// Validate and index raw reference data.
    pub fn new(data: ReferenceData) -> Result<Self, LoadError> {
        if data.xp_per_item == 0 {
            return Err(LoadError::Invalid("xp_per_item must be > 0".into()));
        }
        let characters = index_unique(data.characters, "character", |c| c.name.as_str())?;
        let partners = index_unique(data.partners, "partner", |p| p.name.as_str())?;
        let item_names = index_unique(data.items.clone(), "item", |i| i.name.as_str())?;
        debug!(items = item_names.len(), "catalog items indexed");
        let character_tables = kind_tables(data.char_levels, data.char_ascension, "character")?;
        let partner_tables = kind_tables(data.part_levels, data.part_ascension, "partner")?;

        let mut potentials: BTreeMap<(PotentialType, u32), Vec<PotentialRow>> = BTreeMap::new();
        let mut caps: BTreeMap<PotentialType, u32> = BTreeMap::new();
        for row in data.potentials {
            // a row at level L upgrades to L + 1
            let reach = row.level.saturating_add(1);
            let cap = caps.entry(row.node).or_insert(0);
            *cap = (*cap).max(reach);
            potentials.entry((row.node, row.level)).or_default().push(row);
        }

        let boss_items = characters
            .values()
            .flat_map(|c| c.bosses.values().cloned())
            .collect();
        let attributes = characters.values().map(|c| c.attribute.clone()).collect();

        Ok(Self {
            characters,
            partners,
            character_tables,
            partner_tables,
            potentials,
            caps,
            items: data.items,
            universals: data.universals.unwrap_or_default(),
            xp_per_item: data.xp_per_item,
            boss_items,
            attributes,
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, LoadError> {
        Self::new(serde_yaml::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let reference = Self::from_yaml_str(&text)?;
        info!(
            path = %path.display(),
            characters = reference.characters.len(),
            partners = reference.partners.len(),
            "reference data loaded"
        );
        Ok(reference)
    }

    /// Highest reachable level per potential type.
    pub fn potential_caps(&self) -> &BTreeMap<PotentialType, u32> {
        &self.caps
    }

    pub fn universals(&self) -> &UniversalTable {
        &self.universals
    }

    pub fn catalog_items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn character(&self, name: &str) -> Option<&CharacterDef> {
        self.characters.get(name)
    }

    pub fn partner(&self, name: &str) -> Option<&PartnerDef> {
        self.partners.get(name)
    }

    pub fn characters(&self) -> impl Iterator<Item = &CharacterDef> {
        self.characters.values()
    }

    pub fn partners(&self) -> impl Iterator<Item = &PartnerDef> {
        self.partners.values()
    }

    fn tables(&self, kind: UnitKind) -> &KindTables {
        match kind {
            UnitKind::Character => &self.character_tables,
            UnitKind::Partner => &self.partner_tables,
        }
    }

    /// Display grouping of an item name.
    pub fn category(&self, item: &str) -> MaterialCategory {
        if item == CREDIT_ITEM {
            MaterialCategory::Credits
        } else if item.contains(UnitKind::Character.level_family()) {
            MaterialCategory::CharacterXp
        } else if item.contains(UnitKind::Partner.level_family()) {
            MaterialCategory::PartnerXp
        } else if self.boss_items.contains(item) {
            MaterialCategory::BossDrop
        } else if item == EGO_CRYSTAL_ITEM {
            MaterialCategory::EgoCrystal
        } else if item.contains(UnitKind::Character.ascend_prefix()) {
            MaterialCategory::CharacterAscension
        } else if item.contains(UnitKind::Partner.ascend_prefix()) {
            MaterialCategory::PartnerAscension
        } else if item.contains("Potential")
            || self.attributes.iter().any(|a| item.starts_with(a.as_str()))
        {
            MaterialCategory::Potential
        } else {
            MaterialCategory::Other
        }
    }
}

/// Display groups, in display order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MaterialCategory {
    Credits,
    CharacterXp,
    PartnerXp,
    BossDrop,
    EgoCrystal,
    CharacterAscension,
    PartnerAscension,
    Potential,
    Other,
}

enum Profile<'a> {
    Character(&'a CharacterDef),
    Partner(&'a PartnerDef),
}

impl Profile<'_> {
    fn class(&self) -> &str {
        match self {
            Profile::Character(c) => &c.class,
            Profile::Partner(p) => &p.class,
        }
    }
}

fn unit_label(unit: &Unit) -> String {
    match unit.id {
        Some(id) => format!("{} (#{id})", unit.name),
        None => unit.name.clone(),
    }
}

/// Steps strictly above `current` up to and including `goal`.
fn steps(current: u32, goal: u32) -> RangeInclusive<u32> {
    if current < goal {
        current + 1..=goal
    } else {
        1..=0
    }
}

/// Materials one unit needs to go from its current to its goal stats.
pub fn requirements_for(
    unit: &Unit,
    reference: &Reference,
    policy: RegressionPolicy,
) -> Result<MaterialTable, PlanError> {
    let label = unit_label(unit);
    let invalid = |source: ValidationError| PlanError::Validation {
        unit: label.clone(),
        source,
    };
    let failed = |reason: String| PlanError::Computation {
        unit: label.clone(),
        reason,
    };

    validate_unit(unit, reference.potential_caps()).map_err(invalid)?;
    if policy == RegressionPolicy::Reject {
        if let Some(err) = unit.regression() {
            return Err(invalid(err));
        }
    }
    let unknown = || ValidationError::UnknownUnit {
        kind: unit.kind,
        name: unit.name.clone(),
    };
    let profile = match unit.kind {
        UnitKind::Character => reference
            .character(&unit.name)
            .map(Profile::Character)
            .ok_or_else(unknown),
        UnitKind::Partner => reference
            .partner(&unit.name)
            .map(Profile::Partner)
            .ok_or_else(unknown),
    }
    .map_err(invalid)?;

    let tables = reference.tables(unit.kind);
    let mut materials = MaterialTable::new();

    let mut xp: u64 = 0;
    for level in steps(unit.current_level, unit.goal_level) {
        let row = tables
            .levels
            .get(&level)
            .ok_or_else(|| failed(format!("no {} level row for level {level}", unit.kind)))?;
        xp = xp.saturating_add(*row);
    }
    add_material(
        &mut materials,
        &format!("{}_1", unit.kind.level_family()),
        xp / reference.xp_per_item,
    );

    for step in steps(unit.current_ascension, unit.goal_ascension) {
        let rows = tables
            .ascension
            .get(&step)
            .ok_or_else(|| failed(format!("no {} ascension row for step {step}", unit.kind)))?;
        for row in rows {
            let item = format!(
                "{}_{}_{}",
                unit.kind.ascend_prefix(),
                profile.class(),
                row.suffix
            );
            add_material(&mut materials, &item, row.cost);
            add_material(&mut materials, CREDIT_ITEM, row.credits);
        }
    }

    if let Profile::Character(def) = profile {
        for potential in PotentialType::ALL {
            let levels = unit.potential(potential);
            for level in levels.current..levels.goal {
                let rows = reference
                    .potentials
                    .get(&(potential, level))
                    .ok_or_else(|| failed(format!("no {potential} row for level {level}")))?;
                for row in rows {
                    add_material(
                        &mut materials,
                        &format!("{}_{}", def.attribute, row.suffix),
                        row.cost,
                    );
                    add_material(&mut materials, CREDIT_ITEM, row.credits);
                    add_material(&mut materials, EGO_CRYSTAL_ITEM, row.ego_crystal);
                    if let Some(slot) = &row.boss {
                        let boss = def.bosses.get(slot).ok_or_else(|| {
                            failed(format!("{} has no boss material for {slot}", def.name))
                        })?;
                        add_material(&mut materials, boss, row.boss_amount);
                    }
                }
            }
        }
    }

    debug!(unit = %label, items = materials.len(), "unit materials computed");
    Ok(materials)
}

/// Materials of one roster entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMaterials {
    pub unit_id: Option<UnitId>,
    pub name: String,
    pub materials: MaterialTable,
}

/// Roster-wide materials.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialsReport {
    pub total: MaterialTable,
    /// In roster order.
    pub by_unit: Vec<UnitMaterials>,
}

impl MaterialsReport {
    pub fn unit(&self, id: UnitId) -> Option<&UnitMaterials> {
        self.by_unit.iter().find(|u| u.unit_id == Some(id))
    }
}

/// Sum every unit's materials. Fails on the first unit that cannot be priced.
pub fn compute_total_materials(
    roster: &[Unit],
    reference: &Reference,
    policy: RegressionPolicy,
) -> Result<MaterialsReport, PlanError> {
    let mut report = MaterialsReport::default();
    for unit in roster {
        let materials = requirements_for(unit, reference, policy)?;
        merge_materials(&mut report.total, &materials);
        report.by_unit.push(UnitMaterials {
            unit_id: unit.id,
            name: unit.name.clone(),
            materials,
        });
    }
    info!(
        units = roster.len(),
        items = report.total.len(),
        "roster materials computed"
    );
    Ok(report)
}

/// One display-ready requirement line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialLine {
    pub item: String,
    pub category: MaterialCategory,
    #[serde(flatten)]
    pub status: ConvertedRequirement,
}

/// Check a requirement table against the inventory, with tier conversion
/// and universal substitution. Short lines come first, then by category
/// and name.
///
/// Each line converts against the full inventory, so sibling tiers can count
/// toward several lines at once. Paying for the table (`roster_econ::settle`)
/// spends them line by line and may still come up short; its error names
/// the item.
pub fn material_lines(
    requirements: &MaterialTable,
    inventory: &Inventory,
    reference: &Reference,
) -> Vec<MaterialLine> {
    let mut lines: Vec<MaterialLine> = substitute(requirements, inventory, reference.universals())
        .into_iter()
        .map(|(item, status)| MaterialLine {
            category: reference.category(&item),
            item,
            status,
        })
        .collect();
    lines.sort_by(|a, b| {
        a.status
            .fulfilled
            .cmp(&b.status.fulfilled)
            .then(a.category.cmp(&b.category))
            .then_with(|| a.item.cmp(&b.item))
    });
    lines
}

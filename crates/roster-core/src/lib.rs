#![deny(warnings)]

//! Core domain models and invariants for the roster planner.
//!
//! This crate defines the serializable roster and inventory types shared by
//! the conversion engine, the planner and the store, together with the
//! item-name parser and validation helpers that guard unit stats.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Item name -> quantity needed. Ordered so every traversal is by item name.
pub type MaterialTable = BTreeMap<String, u64>;

/// Credits consumed by ascension and potential steps.
pub const CREDIT_ITEM: &str = "Unit";

/// Extra potential material awarded by certain nodes.
pub const EGO_CRYSTAL_ITEM: &str = "Ego_Crystal";

/// Persistent identifier of a roster entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub i64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two kinds of roster entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    Character,
    Partner,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Character => "Character",
            UnitKind::Partner => "Partner",
        }
    }

    /// Base name of the XP item family consumed when leveling this kind.
    pub fn level_family(self) -> &'static str {
        match self {
            UnitKind::Character => "Char_Level",
            UnitKind::Partner => "Part_Level",
        }
    }

    /// Prefix of the ascension materials for this kind.
    pub fn ascend_prefix(self) -> &'static str {
        match self {
            UnitKind::Character => "Char_Ascend",
            UnitKind::Partner => "Part_Ascend",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Character" => Ok(UnitKind::Character),
            "Partner" => Ok(UnitKind::Partner),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

/// Character potential nodes. Names are the persisted wire names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PotentialType {
    #[serde(rename = "Comm_Basic_Level")]
    CommBasic,
    #[serde(rename = "Comm_Common_Level")]
    CommCommon,
    #[serde(rename = "Comm_Unique_Level")]
    CommUnique,
    #[serde(rename = "Crit_Chance_Level")]
    CritChance,
    #[serde(rename = "Crit_Dmg_Level")]
    CritDmg,
    #[serde(rename = "Unique_1")]
    Unique1,
    #[serde(rename = "Unique_2")]
    Unique2,
    #[serde(rename = "Unique_3")]
    Unique3,
    #[serde(rename = "Unique_4")]
    Unique4,
}

impl PotentialType {
    pub const ALL: [PotentialType; 9] = [
        PotentialType::CommBasic,
        PotentialType::CommCommon,
        PotentialType::CommUnique,
        PotentialType::CritChance,
        PotentialType::CritDmg,
        PotentialType::Unique1,
        PotentialType::Unique2,
        PotentialType::Unique3,
        PotentialType::Unique4,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PotentialType::CommBasic => "Comm_Basic_Level",
            PotentialType::CommCommon => "Comm_Common_Level",
            PotentialType::CommUnique => "Comm_Unique_Level",
            PotentialType::CritChance => "Crit_Chance_Level",
            PotentialType::CritDmg => "Crit_Dmg_Level",
            PotentialType::Unique1 => "Unique_1",
            PotentialType::Unique2 => "Unique_2",
            PotentialType::Unique3 => "Unique_3",
            PotentialType::Unique4 => "Unique_4",
        }
    }

    /// Goal level applied when a unit is created without an explicit goal.
    pub fn default_goal(self) -> u32 {
        match self {
            PotentialType::CommBasic => 10,
            PotentialType::CommCommon | PotentialType::CommUnique => 7,
            PotentialType::CritChance | PotentialType::CritDmg => 3,
            PotentialType::Unique1
            | PotentialType::Unique2
            | PotentialType::Unique3
            | PotentialType::Unique4 => 1,
        }
    }
}

impl fmt::Display for PotentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PotentialType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PotentialType::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownPotentialType(s.to_string()))
    }
}

/// Current and goal level of one potential node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotentialLevels {
    pub current: u32,
    pub goal: u32,
}

impl PotentialLevels {
    /// Levels of a node that was never set explicitly.
    pub fn unset(potential: PotentialType) -> Self {
        Self {
            current: 0,
            goal: potential.default_goal(),
        }
    }
}

/// One roster entry with its current and goal progression.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Present once the unit has been stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UnitId>,
    /// Must match a catalog entry of the same kind.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: UnitKind,
    pub current_level: u32,
    pub goal_level: u32,
    pub current_ascension: u32,
    pub goal_ascension: u32,
    /// Explicitly set potential nodes (characters only).
    #[serde(default)]
    pub potentials: BTreeMap<PotentialType, PotentialLevels>,
}

impl Unit {
    pub const DEFAULT_CURRENT_LEVEL: u32 = 1;
    pub const DEFAULT_CURRENT_ASCENSION: u32 = 0;
    pub const DEFAULT_GOAL_LEVEL: u32 = 60;
    pub const DEFAULT_GOAL_ASCENSION: u32 = 5;

    /// A fresh, unsaved unit with default stats. Characters get every
    /// potential node at its default goal.
    pub fn new(name: impl Into<String>, kind: UnitKind) -> Self {
        let potentials = match kind {
            UnitKind::Character => PotentialType::ALL
                .into_iter()
                .map(|p| (p, PotentialLevels::unset(p)))
                .collect(),
            UnitKind::Partner => BTreeMap::new(),
        };
        Self {
            id: None,
            name: name.into(),
            kind,
            current_level: Self::DEFAULT_CURRENT_LEVEL,
            goal_level: Self::DEFAULT_GOAL_LEVEL,
            current_ascension: Self::DEFAULT_CURRENT_ASCENSION,
            goal_ascension: Self::DEFAULT_GOAL_ASCENSION,
            potentials,
        }
    }

    /// Levels of a potential node, falling back to the unset defaults.
    pub fn potential(&self, potential: PotentialType) -> PotentialLevels {
        self.potentials
            .get(&potential)
            .copied()
            .unwrap_or_else(|| PotentialLevels::unset(potential))
    }

    /// Moves every current stat up to its goal. Goals below current are left alone.
    pub fn promote_to_goal(&mut self) {
        self.current_level = self.current_level.max(self.goal_level);
        self.current_ascension = self.current_ascension.max(self.goal_ascension);
        if self.kind == UnitKind::Character {
            for p in PotentialType::ALL {
                let mut levels = self.potential(p);
                levels.current = levels.current.max(levels.goal);
                self.potentials.insert(p, levels);
            }
        }
    }

    /// First dimension whose goal sits below its current value, if any.
    pub fn regression(&self) -> Option<ValidationError> {
        let mut dims = vec![
            ("level".to_string(), self.current_level, self.goal_level),
            (
                "ascension".to_string(),
                self.current_ascension,
                self.goal_ascension,
            ),
        ];
        if self.kind == UnitKind::Character {
            for p in PotentialType::ALL {
                let l = self.potential(p);
                dims.push((p.as_str().to_string(), l.current, l.goal));
            }
        }
        dims.into_iter()
            .find(|(_, current, goal)| goal < current)
            .map(|(dimension, current, goal)| ValidationError::GoalBelowCurrent {
                dimension,
                current,
                goal,
            })
    }
}

/// Validation errors for roster invariants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unit name must not be empty")]
    EmptyName,
    #[error("unknown unit type: {0}")]
    UnknownKind(String),
    #[error("unknown potential type: {0}")]
    UnknownPotentialType(String),
    #[error("unknown {kind} {name:?}")]
    UnknownUnit { kind: UnitKind, name: String },
    /// Levels start at 1.
    #[error("{field} must be >= 1, got {value}")]
    NonPositiveLevel { field: &'static str, value: u32 },
    #[error("partner {0:?} cannot have potentials")]
    PotentialsOnPartner(String),
    #[error("{potential} level {level} exceeds cap {cap}")]
    PotentialAboveCap {
        potential: PotentialType,
        level: u32,
        cap: u32,
    },
    #[error("{dimension} goal {goal} is below current {current}")]
    GoalBelowCurrent {
        dimension: String,
        current: u32,
        goal: u32,
    },
}

/// Validate a unit's stats against the potential caps from reference data.
///
/// Types absent from `caps` are not bounded. Goal-below-current is a policy
/// decision left to the caller, see [`Unit::regression`].
pub fn validate_unit(
    unit: &Unit,
    caps: &BTreeMap<PotentialType, u32>,
) -> Result<(), ValidationError> {
    if unit.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    for (field, value) in [
        ("current_level", unit.current_level),
        ("goal_level", unit.goal_level),
    ] {
        if value == 0 {
            return Err(ValidationError::NonPositiveLevel { field, value });
        }
    }
    match unit.kind {
        UnitKind::Partner if !unit.potentials.is_empty() => {
            Err(ValidationError::PotentialsOnPartner(unit.name.clone()))
        }
        UnitKind::Partner => Ok(()),
        UnitKind::Character => {
            for p in PotentialType::ALL {
                let Some(&cap) = caps.get(&p) else { continue };
                let levels = unit.potential(p);
                let level = levels.current.max(levels.goal);
                if level > cap {
                    return Err(ValidationError::PotentialAboveCap {
                        potential: p,
                        level,
                        cap,
                    });
                }
            }
            Ok(())
        }
    }
}

/// An inventory entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Display grouping only.
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: u64,
}

/// Snapshot of item name -> quantity on hand.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory {
    items: BTreeMap<String, Item>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored rows; negative amounts are treated as zero.
    pub fn from_signed<I, N, K>(rows: I) -> Self
    where
        I: IntoIterator<Item = (N, K, i64)>,
        N: Into<String>,
        K: Into<String>,
    {
        let items = rows
            .into_iter()
            .map(|(name, kind, amount)| {
                (
                    name.into(),
                    Item {
                        kind: kind.into(),
                        amount: u64::try_from(amount).unwrap_or(0),
                    },
                )
            })
            .collect();
        Self { items }
    }

    pub fn insert(&mut self, name: impl Into<String>, kind: impl Into<String>, amount: u64) {
        self.items.insert(
            name.into(),
            Item {
                kind: kind.into(),
                amount,
            },
        );
    }

    /// Quantity on hand; unknown items hold zero.
    pub fn amount(&self, name: &str) -> u64 {
        self.items.get(name).map_or(0, |i| i.amount)
    }

    pub fn get(&self, name: &str) -> Option<&Item> {
        self.items.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    /// Overwrite a quantity, keeping the item's type. Unknown names are added
    /// with an empty type.
    pub fn set_amount(&mut self, name: &str, amount: u64) {
        match self.items.get_mut(name) {
            Some(item) => item.amount = amount,
            None => self.insert(name, String::new(), amount),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Item)> {
        self.items.iter()
    }
}

/// Craft-up level of a convertible family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    One,
    Two,
    Three,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::One, Tier::Two, Tier::Three];

    pub fn number(self) -> u8 {
        match self {
            Tier::One => 1,
            Tier::Two => 2,
            Tier::Three => 3,
        }
    }

    /// Tier-1 equivalents of one XP item of this tier.
    pub fn xp_multiplier(self) -> u64 {
        match self {
            Tier::One => 1,
            Tier::Two => 5,
            Tier::Three => 20,
        }
    }
}

/// How an item converts, as encoded in its name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemFamily {
    /// No tier suffix; never converts.
    Plain,
    /// Tier suffix, 3:1 crafting ratio.
    Tiered,
    /// Tier suffix on a `Level_` item, 1/5/20 multipliers.
    Xp,
    /// Cross-family substitute (`*_Universal`).
    Universal,
}

/// Parsed item name. Build once at the boundary, then pass around.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ItemKey {
    name: String,
    base: String,
    family: ItemFamily,
    tier: Option<Tier>,
}

impl ItemKey {
    pub fn parse(name: &str) -> Self {
        if name.ends_with("_Universal") {
            return Self::plain(name, ItemFamily::Universal);
        }
        let tiered = name.rsplit_once('_').and_then(|(base, suffix)| {
            let tier = match suffix {
                "1" => Tier::One,
                "2" => Tier::Two,
                "3" => Tier::Three,
                _ => return None,
            };
            (!base.is_empty()).then_some((base, tier))
        });
        match tiered {
            Some((base, tier)) => Self {
                name: name.to_string(),
                base: base.to_string(),
                family: if name.contains("Level_") {
                    ItemFamily::Xp
                } else {
                    ItemFamily::Tiered
                },
                tier: Some(tier),
            },
            None => Self::plain(name, ItemFamily::Plain),
        }
    }

    fn plain(name: &str, family: ItemFamily) -> Self {
        Self {
            name: name.to_string(),
            base: name.to_string(),
            family,
            tier: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without the tier suffix.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn family(&self) -> ItemFamily {
        self.family
    }

    pub fn tier(&self) -> Option<Tier> {
        self.tier
    }

    /// Name of the same family at another tier.
    pub fn sibling(&self, tier: Tier) -> String {
        format!("{}_{}", self.base, tier.number())
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Add `amount` of `item` to a table. Zero amounts leave the table untouched.
pub fn add_material(table: &mut MaterialTable, item: &str, amount: u64) {
    if amount == 0 {
        return;
    }
    let slot = table.entry(item.to_string()).or_insert(0);
    *slot = slot.saturating_add(amount);
}

/// Key-wise sum of `other` into `total`.
pub fn merge_materials(total: &mut MaterialTable, other: &MaterialTable) {
    for (item, &amount) in other {
        add_material(total, item, amount);
    }
}

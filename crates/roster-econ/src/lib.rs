#![deny(warnings)]

//! Material economics for the roster planner.
//!
//! This crate provides the arithmetic shared by the materials view and the
//! upgrade transaction:
//! - Tier conversion: effective availability of one item, folding in sibling tiers
//! - Universal substitution: spending shared substitute items on short families
//! - Settlement: verify a requirement table and deduct it from an inventory

use roster_core::{Inventory, ItemFamily, ItemKey, MaterialTable, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Lower-tier units per higher-tier unit for regular materials.
pub const STANDARD_RATIO: u64 = 3;

/// Errors produced when settling requirements against an inventory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EconError {
    /// Even after conversion and substitution the item is short.
    #[error("not enough {item}: need {needed}, have {available}")]
    Shortfall {
        item: String,
        needed: u64,
        available: u64,
    },
}

/// Fulfillment of one requirement line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedRequirement {
    pub needed: u64,
    /// Effective quantity in the item's own tier units.
    pub available: u64,
    pub fulfilled: bool,
    pub excess: u64,
    /// Universal items credited to this line.
    #[serde(default)]
    pub substituted: u64,
}

impl ConvertedRequirement {
    fn direct(needed: u64, available: u64) -> Self {
        Self {
            needed,
            available,
            fulfilled: available >= needed,
            excess: available.saturating_sub(needed),
            substituted: 0,
        }
    }

    pub fn shortage(&self) -> u64 {
        self.needed.saturating_sub(self.available)
    }

    fn credit(&mut self, amount: u64) {
        self.available = self.available.saturating_add(amount);
        self.substituted = self.substituted.saturating_add(amount);
        self.fulfilled = self.available >= self.needed;
    }
}

/// Effective availability of `item`, given its own raw quantity and the
/// inventory holding its sibling tiers.
///
/// Regular tiers convert 3:1: every higher-tier unit counts as 3, and each
/// lower tier contributes `floor(amount / 3)`. XP tiers are compared in
/// tier-1 equivalents (1/5/20) and reported back in the item's own tier.
pub fn resolve(
    item: &ItemKey,
    needed: u64,
    raw_available: u64,
    inventory: &Inventory,
) -> ConvertedRequirement {
    match (item.family(), item.tier()) {
        (ItemFamily::Xp, Some(tier)) => resolve_xp(item, tier, needed, raw_available, inventory),
        (_, Some(tier)) => resolve_tiered(item, tier, needed, raw_available, inventory),
        (_, None) => ConvertedRequirement::direct(needed, raw_available),
    }
}

/// [`resolve`] for a raw item name.
pub fn convert(
    item_name: &str,
    needed: u64,
    available: u64,
    inventory: &Inventory,
) -> ConvertedRequirement {
    resolve(&ItemKey::parse(item_name), needed, available, inventory)
}

fn resolve_tiered(
    item: &ItemKey,
    tier: Tier,
    needed: u64,
    raw: u64,
    inventory: &Inventory,
) -> ConvertedRequirement {
    let mut available = raw;
    for other in Tier::ALL {
        let held = inventory.amount(&item.sibling(other));
        if other > tier {
            available = available.saturating_add(held.saturating_mul(STANDARD_RATIO));
        } else if other < tier {
            available = available.saturating_add(held / STANDARD_RATIO);
        }
    }
    ConvertedRequirement::direct(needed, available)
}

fn resolve_xp(
    item: &ItemKey,
    tier: Tier,
    needed: u64,
    raw: u64,
    inventory: &Inventory,
) -> ConvertedRequirement {
    let m = tier.xp_multiplier();
    let needed_eq = needed.saturating_mul(m);
    let mut available_eq = raw.saturating_mul(m);
    for other in Tier::ALL.into_iter().filter(|t| *t != tier) {
        let held = inventory.amount(&item.sibling(other));
        available_eq = available_eq.saturating_add(held.saturating_mul(other.xp_multiplier()));
    }
    let available = available_eq / m;
    ConvertedRequirement {
        needed,
        available,
        fulfilled: available_eq >= needed_eq,
        excess: available.saturating_sub(needed),
        substituted: 0,
    }
}

/// A universal item and the base names it may stand in for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversalFamily {
    pub item: String,
    pub eligible: Vec<String>,
}

impl UniversalFamily {
    pub fn new<I, S>(item: impl Into<String>, eligible: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            item: item.into(),
            eligible: eligible.into_iter().map(Into::into).collect(),
        }
    }

    /// True when the item's base name is one of the prefixes, or extends one
    /// at an underscore boundary. Universal items are never covered, not even
    /// by their own family.
    pub fn covers(&self, item: &ItemKey) -> bool {
        if item.family() == ItemFamily::Universal || item.name() == self.item {
            return false;
        }
        let base = item.base();
        self.eligible.iter().any(|prefix| {
            base == prefix
                || base
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('_'))
        })
    }
}

/// Universal family -> eligible prefixes. Loaded from reference data or
/// taken from [`Default`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniversalTable {
    families: Vec<UniversalFamily>,
}

impl UniversalTable {
    pub fn new(families: Vec<UniversalFamily>) -> Self {
        Self { families }
    }

    pub fn eligible_for<'a>(
        &'a self,
        item: &'a ItemKey,
    ) -> impl Iterator<Item = &'a UniversalFamily> + 'a {
        self.families.iter().filter(move |f| f.covers(item))
    }

    fn balances(&self, inventory: &Inventory) -> BTreeMap<String, u64> {
        self.families
            .iter()
            .map(|f| (f.item.clone(), inventory.amount(&f.item)))
            .collect()
    }
}

impl Default for UniversalTable {
    fn default() -> Self {
        const CLASSES: [&str; 6] = [
            "Striker",
            "Vanguard",
            "Controller",
            "Ranger",
            "Hunter",
            "Psionic",
        ];
        Self::new(vec![
            UniversalFamily::new(
                "Potential_Universal",
                ["Void", "Passion", "Order", "Justice", "Instinct"],
            ),
            UniversalFamily::new(
                "Char_Ascend_Universal",
                CLASSES.iter().map(|c| format!("Char_Ascend_{c}")),
            ),
            UniversalFamily::new(
                "Part_Ascend_Universal",
                CLASSES.iter().map(|c| format!("Part_Ascend_{c}")),
            ),
        ])
    }
}

struct Line {
    key: ItemKey,
    needed: u64,
    converted: ConvertedRequirement,
}

/// Requirement lines resolved against raw stock, short items first, then by name.
fn ordered_lines(requirements: &MaterialTable, inventory: &Inventory) -> Vec<Line> {
    let mut lines: Vec<Line> = requirements
        .iter()
        .map(|(name, &needed)| {
            let key = ItemKey::parse(name);
            let converted = resolve(&key, needed, inventory.amount(name), inventory);
            Line {
                key,
                needed,
                converted,
            }
        })
        .collect();
    // stable: name order survives within each group
    lines.sort_by_key(|l| l.converted.fulfilled);
    lines
}

/// Spend universal balances on a short line. Returns what was drawn per universal item.
fn draw_universals(
    key: &ItemKey,
    converted: &mut ConvertedRequirement,
    universals: &UniversalTable,
    balances: &mut BTreeMap<String, u64>,
) -> Vec<(String, u64)> {
    let mut draws = Vec::new();
    for family in universals.eligible_for(key) {
        if converted.fulfilled {
            break;
        }
        let Some(balance) = balances.get_mut(&family.item) else {
            continue;
        };
        let to_use = (*balance).min(converted.shortage());
        if to_use == 0 {
            continue;
        }
        *balance -= to_use;
        converted.credit(to_use);
        debug!(item = %key, universal = %family.item, to_use, "universal substitution");
        draws.push((family.item.clone(), to_use));
    }
    draws
}

/// Resolve every requirement and spend universal items on the ones still
/// short. A universal unit is never credited to two lines.
pub fn substitute(
    requirements: &MaterialTable,
    inventory: &Inventory,
    universals: &UniversalTable,
) -> BTreeMap<String, ConvertedRequirement> {
    let mut balances = universals.balances(inventory);
    let mut result = BTreeMap::new();
    for mut line in ordered_lines(requirements, inventory) {
        if !line.converted.fulfilled {
            draw_universals(&line.key, &mut line.converted, universals, &mut balances);
        }
        result.insert(line.key.name().to_string(), line.converted);
    }
    result
}

/// Inventory after a successful settlement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settlement {
    pub inventory: Inventory,
    /// Net change per item; negative for consumption, positive for change
    /// returned when a higher tier was broken down.
    pub deltas: BTreeMap<String, i64>,
}

/// Verify that `requirements` can be paid from `inventory` and compute the
/// inventory afterwards.
///
/// Lines are checked in the same order as [`substitute`], each against the
/// stock left by the lines before it, so siblings and universal items are
/// never spent twice. Nothing is applied when any line falls short.
pub fn settle(
    requirements: &MaterialTable,
    inventory: &Inventory,
    universals: &UniversalTable,
) -> Result<Settlement, EconError> {
    let mut working = inventory.clone();
    for line in ordered_lines(requirements, inventory) {
        if line.needed == 0 {
            continue;
        }
        let raw = working.amount(line.key.name());
        let mut converted = resolve(&line.key, line.needed, raw, &working);
        let mut balances = universals.balances(&working);
        let draws = if converted.fulfilled {
            Vec::new()
        } else {
            draw_universals(&line.key, &mut converted, universals, &mut balances)
        };
        if !converted.fulfilled {
            return Err(EconError::Shortfall {
                item: line.key.name().to_string(),
                needed: line.needed,
                available: converted.available,
            });
        }

        let mut rest = deduct(&line.key, line.needed, &mut working);
        for (universal, drawn) in draws {
            let held = working.amount(&universal);
            let used = drawn.min(rest).min(held);
            working.set_amount(&universal, held.saturating_sub(used));
            rest -= used;
        }
        if rest > 0 {
            return Err(EconError::Shortfall {
                item: line.key.name().to_string(),
                needed: line.needed,
                available: line.needed - rest,
            });
        }
        debug!(item = %line.key, needed = line.needed, "settled");
    }

    let deltas = working
        .iter()
        .filter_map(|(name, item)| {
            let delta = signed(item.amount).saturating_sub(signed(inventory.amount(name)));
            (delta != 0).then(|| (name.clone(), delta))
        })
        .collect();
    Ok(Settlement {
        inventory: working,
        deltas,
    })
}

fn signed(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn take(working: &mut Inventory, name: &str, amount: u64) {
    if amount > 0 {
        let held = working.amount(name);
        working.set_amount(name, held.saturating_sub(amount));
    }
}

fn give(working: &mut Inventory, name: &str, amount: u64) {
    if amount > 0 {
        let held = working.amount(name);
        working.set_amount(name, held.saturating_add(amount));
    }
}

/// Deduct `needed` from the item's own stock and its sibling tiers. Returns
/// what is still missing, in the item's own units.
fn deduct(key: &ItemKey, needed: u64, working: &mut Inventory) -> u64 {
    let own = working.amount(key.name()).min(needed);
    take(working, key.name(), own);
    let remaining = needed - own;
    match (key.family(), key.tier()) {
        (_, _) if remaining == 0 => 0,
        (ItemFamily::Xp, Some(tier)) => deduct_xp(key, tier, remaining, working),
        (_, Some(tier)) => deduct_tiered(key, tier, remaining, working),
        (_, None) => remaining,
    }
}

fn deduct_tiered(key: &ItemKey, tier: Tier, mut remaining: u64, working: &mut Inventory) -> u64 {
    for higher in Tier::ALL.into_iter().filter(|t| *t > tier) {
        if remaining == 0 {
            break;
        }
        let name = key.sibling(higher);
        let broken = working
            .amount(&name)
            .min(remaining.div_ceil(STANDARD_RATIO));
        take(working, &name, broken);
        let produced = broken.saturating_mul(STANDARD_RATIO);
        let used = produced.min(remaining);
        remaining -= used;
        give(working, key.name(), produced - used);
    }
    for lower in Tier::ALL.into_iter().rev().filter(|t| *t < tier) {
        if remaining == 0 {
            break;
        }
        let name = key.sibling(lower);
        let crafted = (working.amount(&name) / STANDARD_RATIO).min(remaining);
        take(working, &name, crafted * STANDARD_RATIO);
        remaining -= crafted;
    }
    remaining
}

fn deduct_xp(key: &ItemKey, tier: Tier, remaining: u64, working: &mut Inventory) -> u64 {
    let m = tier.xp_multiplier();
    let mut remaining_eq = remaining.saturating_mul(m);
    // lower multipliers divide higher ones, so these draws are exact
    for lower in Tier::ALL.into_iter().rev().filter(|t| *t < tier) {
        if remaining_eq == 0 {
            break;
        }
        let name = key.sibling(lower);
        let lm = lower.xp_multiplier();
        let used = working.amount(&name).min(remaining_eq / lm);
        take(working, &name, used);
        remaining_eq -= used * lm;
    }
    for higher in Tier::ALL.into_iter().filter(|t| *t > tier) {
        if remaining_eq == 0 {
            break;
        }
        let name = key.sibling(higher);
        let hm = higher.xp_multiplier();
        let broken = working.amount(&name).min(remaining_eq.div_ceil(hm));
        take(working, &name, broken);
        let produced = broken.saturating_mul(hm);
        let used = produced.min(remaining_eq);
        remaining_eq -= used;
        give(working, &key.sibling(Tier::One), produced - used);
    }
    remaining_eq.div_ceil(m)
}

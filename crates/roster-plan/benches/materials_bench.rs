use criterion::{black_box, criterion_group, criterion_main, Criterion};
use roster_core::{Unit, UnitId, UnitKind};
use roster_plan::{compute_total_materials, material_lines, Reference, RegressionPolicy};
use std::path::PathBuf;

fn build_roster(reference: &Reference, copies: usize) -> Vec<Unit> {
    let mut roster = Vec::new();
    for round in 0..copies {
        for def in reference.characters() {
            let mut unit = Unit::new(def.name.clone(), UnitKind::Character);
            unit.id = Some(UnitId(roster.len() as i64 + 1));
            unit.current_level = 1 + (round as u32 % 20);
            roster.push(unit);
        }
        for def in reference.partners() {
            let mut unit = Unit::new(def.name.clone(), UnitKind::Partner);
            unit.id = Some(UnitId(roster.len() as i64 + 1));
            roster.push(unit);
        }
    }
    roster
}

fn bench_materials(c: &mut Criterion) {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../assets/reference.yaml");
    let reference = Reference::load(path).unwrap();
    let roster = build_roster(&reference, 20);
    let mut inventory = roster_core::Inventory::new();
    for item in reference.catalog_items() {
        inventory.insert(item.name.clone(), item.kind.clone(), 250);
    }
    c.bench_function("roster materials + lines", |b| {
        b.iter(|| {
            let report =
                compute_total_materials(&roster, &reference, RegressionPolicy::Clamp).unwrap();
            black_box(material_lines(&report.total, &inventory, &reference))
        })
    });
}

criterion_group!(benches, bench_materials);
criterion_main!(benches);

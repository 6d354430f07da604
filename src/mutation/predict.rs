//! Predicted post-states for each mutation kind.
//!
//! Pure functions over the currently displayed list. The record store's
//! in-memory implementation uses the same rules so predictions and confirmed
//! results agree.

use std::collections::{HashMap, HashSet};

use crate::model::Record;

/// Append `record`, placing it after the last position for ordered kinds.
pub fn create<R: Record>(records: &[R], mut record: R) -> Vec<R> {
  if R::KIND.is_ordered() {
    let next = records
      .iter()
      .filter_map(Record::position)
      .max()
      .map_or(0, |max| max + 1);
    record.set_position(next);
  }

  let mut next = records.to_vec();
  next.push(record);
  next
}

/// Splice the patched record in place. Unknown ids leave the list unchanged.
pub fn update<R: Record>(records: &[R], id: &str, patch: &R::Patch) -> Vec<R> {
  records
    .iter()
    .map(|record| {
      let mut record = record.clone();
      if record.id() == id {
        record.apply_patch(patch);
      }
      record
    })
    .collect()
}

pub fn delete<R: Record>(records: &[R], id: &str) -> Vec<R> {
  records
    .iter()
    .filter(|record| record.id() != id)
    .cloned()
    .collect()
}

/// Drop every record that points at `id`.
pub fn prune_references<R: Record>(records: &[R], id: &str) -> Vec<R> {
  records
    .iter()
    .filter(|record| !record.references(id))
    .cloned()
    .collect()
}

/// Place the named records, in `ids` order, into the slots those records
/// occupied before. Records not named keep their slot and position.
///
/// Duplicate and unknown ids are ignored. Each moved record takes the
/// position value of the slot it lands in.
pub fn reorder<R: Record>(records: &[R], ids: &[String]) -> Vec<R> {
  let index: HashMap<&str, usize> = records
    .iter()
    .enumerate()
    .map(|(i, record)| (record.id(), i))
    .collect();

  let mut seen = HashSet::new();
  let order: Vec<usize> = ids
    .iter()
    .filter(|id| seen.insert(id.as_str()))
    .filter_map(|id| index.get(id.as_str()).copied())
    .collect();

  let mut slots = order.clone();
  slots.sort_unstable();

  let mut next = records.to_vec();
  for (slot, source) in slots.into_iter().zip(order) {
    let mut record = records[source].clone();
    if let Some(position) = records[slot].position() {
      record.set_position(position);
    }
    next[slot] = record;
  }
  next
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{
    DependencyType, Material, MaterialPatch, MaterialStatus, TimelineDependency,
  };

  fn material(id: &str, position: i64) -> Material {
    Material {
      id: id.to_string(),
      project_id: "proj-001".to_string(),
      name: id.to_string(),
      quantity: 1.0,
      unit: "unit".to_string(),
      status: MaterialStatus::Required,
      position,
    }
  }

  fn ids(records: &[Material]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
  }

  fn abcd() -> Vec<Material> {
    vec![
      material("A", 0),
      material("B", 1),
      material("C", 2),
      material("D", 3),
    ]
  }

  #[test]
  fn test_reorder_preserves_untouched_members() {
    let next = reorder(&abcd(), &["D".to_string(), "B".to_string()]);

    assert_eq!(ids(&next), vec!["A", "D", "C", "B"]);
    let positions: Vec<i64> = next.iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);
  }

  #[test]
  fn test_reorder_keeps_sparse_positions_of_untouched() {
    let records = vec![material("A", 10), material("B", 20), material("C", 30)];
    let next = reorder(&records, &["C".to_string(), "A".to_string()]);

    assert_eq!(ids(&next), vec!["C", "B", "A"]);
    let positions: Vec<i64> = next.iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![10, 20, 30]);
  }

  #[test]
  fn test_reorder_ignores_unknown_and_duplicate_ids() {
    let next = reorder(
      &abcd(),
      &[
        "C".to_string(),
        "missing".to_string(),
        "A".to_string(),
        "C".to_string(),
      ],
    );
    assert_eq!(ids(&next), vec!["C", "B", "A", "D"]);
  }

  #[test]
  fn test_create_appends_after_last_position() {
    let next = create(&abcd(), material("temp-1", 0));
    assert_eq!(next.last().unwrap().id, "temp-1");
    assert_eq!(next.last().unwrap().position, 4);
  }

  #[test]
  fn test_create_into_empty_list() {
    let next = create(&[], material("temp-1", 7));
    assert_eq!(next[0].position, 0);
  }

  #[test]
  fn test_update_only_touches_patched_fields() {
    let patch = MaterialPatch {
      status: Some(MaterialStatus::Ordered),
      ..MaterialPatch::default()
    };
    let next = update(&abcd(), "B", &patch);

    assert_eq!(next[1].status, MaterialStatus::Ordered);
    assert_eq!(next[1].name, "B");
    assert_eq!(next[1].quantity, 1.0);
    assert_eq!(next[0], abcd()[0]);
  }

  #[test]
  fn test_update_unknown_id_is_noop() {
    let next = update(&abcd(), "Z", &MaterialPatch::default());
    assert_eq!(next, abcd());
  }

  #[test]
  fn test_delete_filters_id() {
    assert_eq!(ids(&delete(&abcd(), "C")), vec!["A", "B", "D"]);
  }

  #[test]
  fn test_prune_references() {
    let dep = |id: &str, source: &str, target: &str| TimelineDependency {
      id: id.to_string(),
      project_id: "proj-001".to_string(),
      source_id: source.to_string(),
      target_id: target.to_string(),
      dependency_type: DependencyType::FinishToStart,
    };
    let deps = vec![
      dep("d1", "item-001", "item-002"),
      dep("d2", "item-002", "item-003"),
      dep("d3", "item-003", "item-001"),
    ];

    let kept = prune_references(&deps, "item-001");
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].id, "d2");
  }
}

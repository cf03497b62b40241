use super::*;
use serde_json::json;
use std::sync::Arc;
use std::thread;

fn transform(x: f64, y: f64, z: f64) -> serde_json::Value {
    json!({
        "position": { "x": x, "y": y, "z": z },
        "rotation": [0.0, 0.0, 0.0, 1.0],
        "scale": [1.0, 1.0, 1.0]
    })
}

#[test]
fn test_add_entity_and_component() {
    let store = EntityStore::new();

    let entity = store.add_entity();
    store
        .add_component(entity, "health", json!({ "hp": 100 }))
        .unwrap();

    assert!(store.has_component(entity, "health"));
    assert_eq!(
        store.get_component(entity, "health").unwrap(),
        json!({ "hp": 100 })
    );
    assert!(!store.has_component(entity, "name"));
}

#[test]
fn test_entity_ids_are_unique() {
    let store = EntityStore::new();
    let a = store.add_entity();
    let b = store.add_entity();
    assert_ne!(a, b);
    assert_eq!(store.entity_count(), 2);
}

#[test]
fn test_duplicate_add_component_rejected() {
    let store = EntityStore::new();
    let entity = store.add_entity();
    store.add_component(entity, "health", json!(100)).unwrap();

    let err = store.add_component(entity, "health", json!(5)).unwrap_err();
    assert_eq!(
        err,
        StoreError::DuplicateComponent {
            entity: entity.0,
            kind: "health".to_string()
        }
    );

    // Original value untouched
    assert_eq!(store.get_component(entity, "health").unwrap(), json!(100));
}

#[test]
fn test_set_component_overwrites() {
    let store = EntityStore::new();
    let entity = store.add_entity();
    store.add_component(entity, "health", json!(100)).unwrap();

    let old = store.set_component(entity, "health", json!(40)).unwrap();
    assert_eq!(old, Some(json!(100)));
    assert_eq!(store.get_component(entity, "health").unwrap(), json!(40));

    // Also inserts when absent
    let old = store.set_component(entity, "name", json!("crate")).unwrap();
    assert_eq!(old, None);
    assert!(store.has_component(entity, "name"));
}

#[test]
fn test_batch_with_existing_kind_rejected_whole() {
    let store = EntityStore::new();
    let entity = store.add_entity();
    store.add_component(entity, "a", json!(1)).unwrap();

    let result = store.add_components(
        entity,
        vec![("b".to_string(), json!(2)), ("a".to_string(), json!(3))],
    );
    assert!(matches!(result, Err(StoreError::DuplicateComponent { .. })));
    // "b" must not have been applied
    assert!(!store.has_component(entity, "b"));
}

#[test]
fn test_spawn_rejects_repeated_kind() {
    let store = EntityStore::new();
    let result = store.spawn(vec![
        ("a".to_string(), json!(1)),
        ("a".to_string(), json!(2)),
    ]);
    assert!(matches!(result, Err(StoreError::DuplicateComponent { .. })));
    assert_eq!(store.entity_count(), 0);
}

#[test]
fn test_component_on_missing_entity() {
    let store = EntityStore::new();
    let err = store
        .add_component(EntityId(42), "a", json!(1))
        .unwrap_err();
    assert_eq!(err, StoreError::EntityNotFound(42));
    assert!(store.get_component(EntityId(42), "a").is_none());
}

#[test]
fn test_remove_component() {
    let store = EntityStore::new();
    let entity = store.add_entity();
    store.add_component(entity, "a", json!(1)).unwrap();

    assert_eq!(store.remove_component(entity, "a").unwrap(), json!(1));
    assert!(!store.has_component(entity, "a"));
    assert!(matches!(
        store.remove_component(entity, "a"),
        Err(StoreError::ComponentNotFound { .. })
    ));
}

#[test]
fn test_remove_entity_removes_components() {
    let store = EntityStore::new();
    let entity = store
        .spawn(vec![
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!(2)),
        ])
        .unwrap();

    let removed = store.remove_entity(entity).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(!store.contains_entity(entity));
    assert!(!store.has_component(entity, "a"));
    assert_eq!(
        store.remove_entity(entity).unwrap_err(),
        StoreError::EntityNotFound(entity.0)
    );
}

#[test]
fn test_metadata_absent_key() {
    let store = EntityStore::new();
    assert!(store.get_metadata("missing").is_none());
}

#[test]
fn test_metadata_same_author_overwrites() {
    let store = EntityStore::new();
    store
        .set_metadata("spawn", MetadataValue::from("north"), "session-a")
        .unwrap();
    let previous = store
        .set_metadata("spawn", MetadataValue::from("south"), "session-a")
        .unwrap();

    assert_eq!(previous, Some(MetadataValue::from("north")));
    assert_eq!(
        store.get_metadata("spawn"),
        Some(MetadataValue::from("south"))
    );
}

#[test]
fn test_metadata_other_author_conflicts() {
    let store = EntityStore::new();
    store
        .set_metadata("spawn", MetadataValue::from(true), "session-a")
        .unwrap();

    let err = store
        .set_metadata("spawn", MetadataValue::from(false), "session-b")
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::MetadataConflict {
            key: "spawn".to_string(),
            owner: "session-a".to_string()
        }
    );
    assert_eq!(store.get_metadata("spawn"), Some(MetadataValue::Bool(true)));
}

#[test]
fn test_record_position_metadata() {
    let store = EntityStore::new();
    let entity = store
        .spawn(vec![(TRANSFORM.to_string(), transform(1.5, -2.0, 0.25))])
        .unwrap();

    let position = store
        .record_position_metadata(entity, "marker-1", "session-a")
        .unwrap();
    assert_eq!(position, "1.5,-2,0.25");
    assert_eq!(
        store.get_metadata("marker-1"),
        Some(MetadataValue::from("1.5,-2,0.25"))
    );
}

#[test]
fn test_record_position_metadata_array_form() {
    let store = EntityStore::new();
    let entity = store
        .spawn(vec![(
            TRANSFORM.to_string(),
            json!({ "position": [3.0, 4.0, 5.0] }),
        )])
        .unwrap();

    let position = store
        .record_position_metadata(entity, "marker", "system")
        .unwrap();
    assert_eq!(position, "3,4,5");
}

#[test]
fn test_position_metadata_without_transform() {
    let store = EntityStore::new();
    let entity = store.add_entity();
    assert_eq!(
        store
            .record_position_metadata(entity, "marker", "system")
            .unwrap_err(),
        StoreError::PositionUnavailable(entity.0)
    );
    assert!(store.get_metadata("marker").is_none());
}

#[test]
fn test_attach_world_metadata() {
    let store = EntityStore::new();
    let entity = store
        .spawn(vec![(TRANSFORM.to_string(), transform(0.5, 1.0, 2.0))])
        .unwrap();
    let token = uuid::Uuid::new_v4().to_string();

    store
        .attach_world_metadata(entity, &token, "session-a")
        .unwrap();

    assert_eq!(
        store.get_metadata(&token),
        Some(MetadataValue::from("0.5,1,2"))
    );
    let object = store.get_component(entity, OBJECT3D).unwrap();
    assert_eq!(object["_data"], json!(token));
    let interactable = store.get_component(entity, INTERACTABLE).unwrap();
    assert_eq!(interactable["action"], json!(METADATA_ACTION));
    assert_eq!(interactable["interactionUserData"], json!(token));

    // Attaching twice hits the duplicate-component policy
    assert!(matches!(
        store.attach_world_metadata(entity, &token, "session-a"),
        Err(StoreError::DuplicateComponent { .. })
    ));
}

#[test]
fn test_attach_world_metadata_rejects_existing_object3d() {
    let store = EntityStore::new();
    let entity = store
        .spawn(vec![
            (TRANSFORM.to_string(), transform(1.0, 2.0, 3.0)),
            (OBJECT3D.to_string(), json!({ "_data": "other" })),
        ])
        .unwrap();

    assert!(matches!(
        store.attach_world_metadata(entity, "marker", "session-a"),
        Err(StoreError::DuplicateComponent { kind, .. }) if kind == OBJECT3D
    ));
    // Nothing from the failed attach is visible
    assert_eq!(store.get_metadata("marker"), None);
    assert!(!store.has_component(entity, INTERACTABLE));
}

#[test]
fn test_empty_snapshot() {
    let store = EntityStore::new();
    let snapshot = store.snapshot();
    assert!(snapshot.entities.is_empty());
    assert!(snapshot.metadata.is_empty());
    assert!(snapshot.is_empty());
}

#[test]
fn test_snapshot_contents() {
    let store = EntityStore::new();
    let entity = store
        .spawn(vec![("a".to_string(), json!(1))])
        .unwrap();
    store
        .set_metadata("scene", MetadataValue::from(2.0), "system")
        .unwrap();

    let snapshot = store.snapshot();
    assert_eq!(snapshot.entities.len(), 1);
    assert_eq!(snapshot.entity(entity).unwrap().components["a"], json!(1));
    assert_eq!(snapshot.metadata["scene"], MetadataValue::Number(2.0));
}

#[test]
fn test_changes_broadcast_in_order() {
    let store = EntityStore::new();
    let mut rx = store.subscribe();

    let entity = store.add_entity();
    store.add_component(entity, "a", json!(1)).unwrap();
    store.remove_entity(entity).unwrap();

    assert!(matches!(
        rx.try_recv().unwrap(),
        StoreChange::EntitySpawned { .. }
    ));
    assert!(matches!(
        rx.try_recv().unwrap(),
        StoreChange::ComponentAdded { .. }
    ));
    assert_eq!(
        rx.try_recv().unwrap(),
        StoreChange::EntityRemoved { entity }
    );
}

#[test]
fn test_rejected_mutation_not_broadcast() {
    let store = EntityStore::new();
    let entity = store.add_entity();
    store.add_component(entity, "a", json!(1)).unwrap();

    let mut rx = store.subscribe();
    let _ = store.add_component(entity, "a", json!(2));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_snapshot_and_subscribe_has_no_gap() {
    let store = EntityStore::new();
    store.add_entity();

    let (snapshot, mut rx) = store.snapshot_and_subscribe();
    assert_eq!(snapshot.entities.len(), 1);

    let second = store.add_entity();
    match rx.try_recv().unwrap() {
        StoreChange::EntitySpawned { entity, .. } => assert_eq!(entity, second),
        other => panic!("unexpected change {:?}", other),
    }
}

#[test]
fn test_snapshot_never_sees_partial_batch() {
    let store = Arc::new(EntityStore::new());
    let mut writers = vec![];

    for i in 0..4 {
        let store = Arc::clone(&store);
        writers.push(thread::spawn(move || {
            for j in 0..200 {
                let entity = store.add_entity();
                store
                    .add_components(
                        entity,
                        vec![
                            ("a".to_string(), json!(i)),
                            ("b".to_string(), json!(j)),
                            ("c".to_string(), json!(true)),
                        ],
                    )
                    .unwrap();
            }
        }));
    }

    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..200 {
                let snapshot = store.snapshot();
                for entity in &snapshot.entities {
                    let count = entity.components.len();
                    assert!(
                        count == 0 || count == 3,
                        "entity {} observed with {} of 3 components",
                        entity.id,
                        count
                    );
                }
            }
        })
    };

    for handle in writers {
        handle.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(store.entity_count(), 800);
}

#[test]
fn test_metadata_value_serialization() {
    assert_eq!(
        serde_json::to_value(MetadataValue::from("x")).unwrap(),
        json!("x")
    );
    assert_eq!(
        serde_json::to_value(MetadataValue::from(1.5)).unwrap(),
        json!(1.5)
    );
    let parsed: MetadataValue = serde_json::from_value(json!(false)).unwrap();
    assert_eq!(parsed, MetadataValue::Bool(false));
}

//! Target resolution: by id first, by name as an ambiguity-checked fallback

use crate::error::ActuationError;
use crate::types::{Entity, EntityId, EntityRef, Snapshot};

/// Resolve `target` to exactly one entity.
///
/// Duplicate matches are an error for both id and name lookups; nothing is
/// ever resolved to "the first match".
pub fn resolve_target<'a>(
    entities: &'a [Entity],
    target: &EntityRef,
) -> Result<&'a Entity, ActuationError> {
    let matches: Vec<&Entity> = match target {
        EntityRef::Id(id) => entities.iter().filter(|e| &e.id == id).collect(),
        EntityRef::Name(name) => entities.iter().filter(|e| &e.name == name).collect(),
    };

    match matches.as_slice() {
        [] => Err(ActuationError::TargetNotFound {
            target: target.to_string(),
        }),
        [single] => Ok(single),
        many => Err(ActuationError::AmbiguousTarget {
            target: target.to_string(),
            candidates: many.iter().map(|e| e.id.clone()).collect(),
        }),
    }
}

/// Entity with the given id in a snapshot
pub fn locate<'a>(snapshot: &'a Snapshot, id: &EntityId) -> Option<&'a Entity> {
    snapshot.entities().iter().find(|e| &e.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Vec<Entity> {
        vec![
            Entity::new("7", "Factor_X", true),
            Entity::new("8", "Factor_Y", false),
            Entity::new("9", "Factor_X", false),
        ]
    }

    #[test]
    fn test_resolve_by_id_ignores_duplicate_names() {
        let entities = listing();
        let found = resolve_target(&entities, &EntityRef::Id("9".into())).unwrap();
        assert_eq!(found.name, "Factor_X");
        assert!(!found.enabled);
    }

    #[test]
    fn test_resolve_by_unique_name() {
        let entities = listing();
        let found = resolve_target(&entities, &EntityRef::Name("Factor_Y".into())).unwrap();
        assert_eq!(found.id, EntityId::from("8"));
    }

    #[test]
    fn test_duplicate_name_is_ambiguous() {
        let entities = listing();
        let err = resolve_target(&entities, &EntityRef::Name("Factor_X".into())).unwrap_err();

        assert_eq!(
            err,
            ActuationError::AmbiguousTarget {
                target: "name:Factor_X".to_string(),
                candidates: vec!["7".into(), "9".into()],
            }
        );
        assert_eq!(err.to_string(), "ambiguous target name:Factor_X: matches ids 7, 9");
    }

    #[test]
    fn test_missing_target() {
        let entities = listing();
        let err = resolve_target(&entities, &EntityRef::Id("100".into())).unwrap_err();
        assert!(matches!(err, ActuationError::TargetNotFound { .. }));
    }

    #[test]
    fn test_locate_in_snapshot() {
        let snapshot = Snapshot::capture("factors", listing(), None);
        assert_eq!(locate(&snapshot, &"8".into()).map(|e| e.name.as_str()), Some("Factor_Y"));
        assert!(locate(&snapshot, &"1".into()).is_none());
    }
}

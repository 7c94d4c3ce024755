/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use sindri_models::models::{
    ActionStatus, ActionType, AutoAssignBinding, NewDistributionSet, NewDistributionSetType,
    NewSoftwareModule, NewSoftwareModuleType, NewTargetFilterQuery, TargetUpdateStatus,
};
use sindri_repository::management::{AssignmentOptions, CancelMode};
use sindri_repository::RepositoryError;
use std::collections::BTreeSet;

use crate::fixtures::TestFixture;

#[test]
fn test_set_completeness_follows_mandatory_modules() {
    let fixture = TestFixture::new();
    let system = &fixture.system;
    let os_type = fixture
        .dal
        .software_module_types(system)
        .create(NewSoftwareModuleType::new("os".to_string(), "OS".to_string(), None).unwrap())
        .expect("Failed to create module type");
    let app_type = fixture
        .dal
        .software_module_types(system)
        .create(NewSoftwareModuleType::new("app".to_string(), "App".to_string(), None).unwrap())
        .expect("Failed to create module type");
    let ds_type = fixture
        .dal
        .distribution_set_types(system)
        .create(
            NewDistributionSetType::new(
                "os_app".to_string(),
                "OS with app".to_string(),
                BTreeSet::from([os_type.id]),
                BTreeSet::from([app_type.id]),
            )
            .unwrap(),
        )
        .expect("Failed to create set type");
    let os = fixture
        .dal
        .software_modules(system)
        .create(NewSoftwareModule::new("linux".to_string(), "6.1".to_string(), os_type.id).unwrap())
        .expect("Failed to create module");
    let app = fixture
        .dal
        .software_modules(system)
        .create(NewSoftwareModule::new("agent".to_string(), "2.0".to_string(), app_type.id).unwrap())
        .expect("Failed to create module");

    let sets = fixture.dal.distribution_sets(system);
    let partial = sets
        .create(
            NewDistributionSet::new("image".to_string(), "1.0".to_string(), ds_type.id)
                .unwrap()
                .with_modules([app.id]),
        )
        .expect("Failed to create set");
    assert!(!partial.complete);
    assert!(!partial.is_assignable());

    let complete = sets
        .assign_modules(partial.id, &[os.id])
        .expect("Failed to assign module");
    assert!(complete.complete);
    assert!(complete.is_assignable());

    let duplicate = sets.create(NewDistributionSet::new("image".to_string(), "1.0".to_string(), ds_type.id).unwrap());
    assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));
}

#[test]
fn test_set_rejects_foreign_module_type() {
    let fixture = TestFixture::new();
    let system = &fixture.system;
    let firmware_type = fixture
        .dal
        .software_module_types(system)
        .create(NewSoftwareModuleType::new("fw".to_string(), "Firmware".to_string(), None).unwrap())
        .unwrap();
    let module = fixture
        .dal
        .software_modules(system)
        .create(NewSoftwareModule::new("blob".to_string(), "1".to_string(), firmware_type.id).unwrap())
        .unwrap();
    let ds_type = fixture.insert_ds_type("empty");

    let result = fixture.dal.distribution_sets(system).create(
        NewDistributionSet::new("mixed".to_string(), "1.0".to_string(), ds_type.id)
            .unwrap()
            .with_modules([module.id]),
    );
    assert!(matches!(result, Err(RepositoryError::Conflict(_))));
}

#[test]
fn test_locked_set_rejects_module_changes() {
    let fixture = TestFixture::new();
    let system = &fixture.system;
    let sm_type = fixture
        .dal
        .software_module_types(system)
        .create(NewSoftwareModuleType::new("app".to_string(), "App".to_string(), Some(2)).unwrap())
        .unwrap();
    let ds_type = fixture
        .dal
        .distribution_set_types(system)
        .create(
            NewDistributionSetType::new(
                "apps".to_string(),
                "Apps".to_string(),
                BTreeSet::new(),
                BTreeSet::from([sm_type.id]),
            )
            .unwrap(),
        )
        .unwrap();
    let module = fixture
        .dal
        .software_modules(system)
        .create(NewSoftwareModule::new("agent".to_string(), "1".to_string(), sm_type.id).unwrap())
        .unwrap();
    let set = fixture.insert_distribution_set("bundle", ds_type.id);

    let sets = fixture.dal.distribution_sets(system);
    sets.lock(set.id).expect("Failed to lock set");
    assert!(matches!(
        sets.assign_modules(set.id, &[module.id]),
        Err(RepositoryError::Conflict(_))
    ));

    let unlocked = sets.unlock(set.id).expect("Failed to unlock set");
    assert!(!unlocked.locked);
    let updated = sets
        .assign_modules(set.id, &[module.id])
        .expect("Failed to assign module");
    assert!(updated.modules.contains(&module.id));
}

#[test]
fn test_assignment_locks_modules() {
    let fixture = TestFixture::new();
    let system = &fixture.system;
    let sm_type = fixture
        .dal
        .software_module_types(system)
        .create(NewSoftwareModuleType::new("os".to_string(), "OS".to_string(), None).unwrap())
        .unwrap();
    let ds_type = fixture
        .dal
        .distribution_set_types(system)
        .create(
            NewDistributionSetType::new(
                "os".to_string(),
                "OS".to_string(),
                BTreeSet::from([sm_type.id]),
                BTreeSet::new(),
            )
            .unwrap(),
        )
        .unwrap();
    let module = fixture
        .dal
        .software_modules(system)
        .create(NewSoftwareModule::new("linux".to_string(), "6.1".to_string(), sm_type.id).unwrap())
        .unwrap();
    let set = fixture
        .dal
        .distribution_sets(system)
        .create(
            NewDistributionSet::new("image".to_string(), "1.0".to_string(), ds_type.id)
                .unwrap()
                .with_modules([module.id]),
        )
        .unwrap();
    assert!(!module.locked);

    let target = fixture.insert_target("t1", None);
    fixture
        .dal
        .deployment(system)
        .assign_target(target.id, set.id, &AssignmentOptions::default())
        .expect("Failed to assign");

    let module = fixture.dal.software_modules(system).get(module.id).unwrap();
    assert!(module.locked);
    let set = fixture.dal.distribution_sets(system).get(set.id).unwrap();
    assert!(!set.locked);
}

#[test]
fn test_invalidate_clears_bindings_and_cancels_actions() {
    let fixture = TestFixture::new();
    let ds_type = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", ds_type.id);
    let target = fixture.insert_target("t1", None);

    let binding = AutoAssignBinding::new(set.id, ActionType::Forced, None, false).unwrap();
    let query = fixture
        .dal
        .target_filter_queries(&fixture.system)
        .create(
            NewTargetFilterQuery::new("all".to_string(), "controllerid==*".to_string())
                .unwrap()
                .with_auto_assign(binding),
        )
        .expect("Failed to create filter query");
    let action = fixture
        .dal
        .deployment(&fixture.system)
        .assign_target(target.id, set.id, &AssignmentOptions::default())
        .unwrap();

    let invalidation = fixture
        .dal
        .distribution_sets(&fixture.system)
        .invalidate(set.id, Some(CancelMode::Force))
        .expect("Failed to invalidate set");
    assert!(invalidation.distribution_set.invalid);
    assert_eq!(invalidation.cleared_queries, 1);
    assert_eq!(invalidation.canceled_actions, 1);

    let query = fixture
        .dal
        .target_filter_queries(&fixture.system)
        .get(query.id)
        .unwrap();
    assert!(query.auto_assign.is_none());

    let action = fixture.dal.deployment(&fixture.system).find_action(action.id).unwrap();
    assert_eq!(action.status, ActionStatus::Canceled);
    assert!(!action.active);
    let target = fixture.dal.targets(&fixture.system).get(target.id).unwrap();
    assert_eq!(target.assigned_distribution_set_id, None);
    assert_eq!(target.update_status, TargetUpdateStatus::Unknown);

    let other = fixture.insert_target("t2", None);
    let result = fixture.dal.deployment(&fixture.system).assign_target(
        other.id,
        set.id,
        &AssignmentOptions::default(),
    );
    assert!(matches!(result, Err(RepositoryError::Conflict(_))));
}

#[test]
fn test_delete_is_soft_while_actions_exist() {
    let fixture = TestFixture::new();
    let ds_type = fixture.insert_ds_type("os");
    let used = fixture.insert_distribution_set("used", ds_type.id);
    let unused = fixture.insert_distribution_set("unused", ds_type.id);
    let target = fixture.insert_target("t1", None);
    fixture
        .dal
        .deployment(&fixture.system)
        .assign_target(target.id, used.id, &AssignmentOptions::default())
        .unwrap();

    let sets = fixture.dal.distribution_sets(&fixture.system);
    sets.delete(used.id).expect("Failed to delete used set");
    sets.delete(unused.id).expect("Failed to delete unused set");

    let used = sets.get(used.id).expect("Soft deleted set should remain");
    assert!(used.deleted);
    assert!(!used.is_assignable());
    assert!(matches!(
        sets.get(unused.id),
        Err(RepositoryError::NotFound { .. })
    ));
}

#[test]
fn test_scoped_set_visibility() {
    let fixture = TestFixture::new();
    let ds_type = fixture.insert_ds_type("os");
    let first = fixture.insert_distribution_set("first", ds_type.id);
    let second = fixture.insert_distribution_set("second", ds_type.id);

    let scope = format!("READ_DISTRIBUTION_SET/id=={}", second.id);
    let user = fixture.user("erin", &[&scope]);
    let sets = fixture.dal.distribution_sets(&user);
    assert_eq!(sets.count(None).unwrap(), 1);
    assert_eq!(sets.get(second.id).unwrap().name, "second");
    assert!(matches!(
        sets.get(first.id),
        Err(RepositoryError::NotFound { .. })
    ));
    assert!(matches!(
        sets.lock(second.id),
        Err(RepositoryError::InsufficientPermission(_))
    ));
}

/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use chrono::Duration;
use sindri_models::models::{ActionStatus, ActionType, MaintenanceWindow, TargetUpdateStatus};
use sindri_repository::management::{AssignmentOptions, CancelMode};
use sindri_repository::{Pageable, RepositoryError};
use sindri_utils::config::Repository;

use crate::fixtures::TestFixture;

#[test]
fn test_bulk_assignment_counts_outcomes() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let app = fixture.insert_ds_type("app");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let gateway = fixture.insert_target_type("gateway", &[os.id]);
    let sensor = fixture.insert_target_type("sensor", &[app.id]);

    let compatible = fixture.insert_target("gw-1", Some(gateway.id));
    let incompatible = fixture.insert_target("sensor-1", Some(sensor.id));
    let untyped = fixture.insert_target("plain-1", None);

    let deployment = fixture.dal.deployment(&fixture.system);
    let result = deployment
        .assign(
            &[compatible.id, incompatible.id, untyped.id, untyped.id, 9999],
            set.id,
            &AssignmentOptions::default(),
        )
        .expect("Failed to assign");
    assert_eq!(result.assigned, 2);
    assert_eq!(result.already_assigned, 0);
    assert_eq!(result.skipped, 2);
    assert_eq!(result.actions.len(), 2);
    assert!(result.actions.iter().all(|a| a.status == ActionStatus::Running));

    let again = deployment
        .assign(&[compatible.id, untyped.id], set.id, &AssignmentOptions::default())
        .unwrap();
    assert_eq!(again.assigned, 0);
    assert_eq!(again.already_assigned, 2);

    let target = fixture.dal.targets(&fixture.system).get(compatible.id).unwrap();
    assert_eq!(target.assigned_distribution_set_id, Some(set.id));
    assert_eq!(target.update_status, TargetUpdateStatus::Pending);
    assert!(fixture.actions_of(incompatible.id).is_empty());
}

#[test]
fn test_bulk_assignment_skips_targets_outside_update_scope() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let mine = fixture.insert_target_type("mine", &[os.id]);
    let theirs = fixture.insert_target_type("theirs", &[os.id]);
    let t1 = fixture.insert_target("t1", Some(mine.id));
    let t2 = fixture.insert_target("t2", Some(theirs.id));

    let scope = format!("UPDATE_TARGET/type.id=={}", mine.id);
    let user = fixture.user("henry", &["READ_TARGET", &scope, "READ_DISTRIBUTION_SET"]);
    let result = fixture
        .dal
        .deployment(&user)
        .assign(&[t1.id, t2.id], set.id, &AssignmentOptions::default())
        .unwrap();
    assert_eq!(result.assigned, 1);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.actions[0].target_id, t1.id);
    assert_eq!(result.actions[0].initiated_by, "henry");

    let single = fixture
        .dal
        .deployment(&user)
        .assign_target(t2.id, set.id, &AssignmentOptions::default());
    assert!(matches!(single, Err(RepositoryError::InsufficientPermission(_))));
}

#[test]
fn test_assign_target_conflicts() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let app = fixture.insert_ds_type("app");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let sensor = fixture.insert_target_type("sensor", &[app.id]);
    let incompatible = fixture.insert_target("sensor-1", Some(sensor.id));
    let target = fixture.insert_target("plain-1", None);

    let deployment = fixture.dal.deployment(&fixture.system);
    let result = deployment.assign_target(incompatible.id, set.id, &AssignmentOptions::default());
    assert!(matches!(result, Err(RepositoryError::Conflict(_))));

    deployment
        .assign_target(target.id, set.id, &AssignmentOptions::default())
        .expect("Failed to assign");
    let result = deployment.assign_target(target.id, set.id, &AssignmentOptions::default());
    assert!(matches!(result, Err(RepositoryError::Conflict(_))));

    let result = deployment.assign_target(target.id, 4242, &AssignmentOptions::default());
    assert!(matches!(result, Err(RepositoryError::NotFound { .. })));
}

#[test]
fn test_new_assignment_overrides_previous_one() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let v1 = fixture.insert_distribution_set("v1", os.id);
    let v2 = fixture.insert_distribution_set("v2", os.id);
    let target = fixture.insert_target("t1", None);

    let deployment = fixture.dal.deployment(&fixture.system);
    let first = deployment
        .assign_target(target.id, v1.id, &AssignmentOptions::default())
        .unwrap();
    let second = deployment
        .assign_target(target.id, v2.id, &AssignmentOptions::default())
        .unwrap();

    let first = deployment.find_action(first.id).unwrap();
    assert_eq!(first.status, ActionStatus::Canceling);
    assert!(first.active);
    assert_eq!(second.status, ActionStatus::Running);

    fixture.report(first.id, ActionStatus::Canceled);
    let target = fixture.dal.targets(&fixture.system).get(target.id).unwrap();
    assert_eq!(target.assigned_distribution_set_id, Some(v2.id));
    assert_eq!(target.update_status, TargetUpdateStatus::Pending);
}

#[test]
fn test_multi_assignment_keeps_actions_side_by_side() {
    let fixture = TestFixture::with_settings(Repository {
        multi_assignments_enabled: true,
        ..Repository::default()
    });
    let os = fixture.insert_ds_type("os");
    let v1 = fixture.insert_distribution_set("v1", os.id);
    let v2 = fixture.insert_distribution_set("v2", os.id);
    let target = fixture.insert_target("t1", None);

    let deployment = fixture.dal.deployment(&fixture.system);
    deployment
        .assign_target(target.id, v1.id, &AssignmentOptions::default().with_weight(100))
        .unwrap();
    deployment
        .assign_target(target.id, v2.id, &AssignmentOptions::default().with_weight(500))
        .unwrap();
    deployment
        .assign_target(target.id, v1.id, &AssignmentOptions::default().with_weight(10))
        .unwrap();

    let active = deployment.find_active_actions_by_target(target.id).unwrap();
    assert_eq!(active.len(), 3);
    assert!(active.iter().all(|a| a.status == ActionStatus::Running));

    let ordered = deployment
        .find_active_actions_with_highest_weight(target.id, 2)
        .unwrap();
    let weights: Vec<Option<u16>> = ordered.iter().map(|a| a.weight).collect();
    assert_eq!(weights, vec![Some(500), Some(100)]);
    assert_eq!(deployment.count_actions_by_target(target.id).unwrap(), 3);
}

#[test]
fn test_cancel_is_idempotent() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let target = fixture.insert_target("t1", None);
    let deployment = fixture.dal.deployment(&fixture.system);
    let action = deployment
        .assign_target(target.id, set.id, &AssignmentOptions::default())
        .unwrap();

    let canceling = deployment.cancel(action.id, CancelMode::Soft).unwrap();
    assert_eq!(canceling.status, ActionStatus::Canceling);
    let history_len = canceling.history.len();
    let again = deployment.cancel(action.id, CancelMode::Soft).unwrap();
    assert_eq!(again.status, ActionStatus::Canceling);
    assert_eq!(again.history.len(), history_len);

    let canceled = deployment.cancel(action.id, CancelMode::Force).unwrap();
    assert_eq!(canceled.status, ActionStatus::Canceled);
    assert!(!canceled.active);
    let again = deployment.cancel(action.id, CancelMode::Force).unwrap();
    assert_eq!(again.history.len(), canceled.history.len());
}

#[test]
fn test_closed_actions_cannot_be_canceled() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let target = fixture.insert_target("t1", None);
    let action = fixture
        .dal
        .deployment(&fixture.system)
        .assign_target(target.id, set.id, &AssignmentOptions::default())
        .unwrap();
    fixture.report(action.id, ActionStatus::Finished);

    let result = fixture
        .dal
        .deployment(&fixture.system)
        .cancel(action.id, CancelMode::Soft);
    assert!(matches!(result, Err(RepositoryError::InvalidState(_))));
}

#[test]
fn test_force_cancel_reverts_target() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let v1 = fixture.insert_distribution_set("v1", os.id);
    let v2 = fixture.insert_distribution_set("v2", os.id);
    let target = fixture.insert_target("t1", None);
    let deployment = fixture.dal.deployment(&fixture.system);

    let first = deployment
        .assign_target(target.id, v1.id, &AssignmentOptions::default())
        .unwrap();
    fixture.report(first.id, ActionStatus::Finished);
    let second = deployment
        .assign_target(target.id, v2.id, &AssignmentOptions::default())
        .unwrap();
    deployment.cancel(second.id, CancelMode::Force).unwrap();

    let target = fixture.dal.targets(&fixture.system).get(target.id).unwrap();
    assert_eq!(target.assigned_distribution_set_id, Some(v1.id));
    assert_eq!(target.installed_distribution_set_id, Some(v1.id));
    assert_eq!(target.update_status, TargetUpdateStatus::InSync);
}

#[test]
fn test_add_status_lifecycle() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let target = fixture.insert_target("t1", None);
    let deployment = fixture.dal.deployment(&fixture.system);
    let action = deployment
        .assign_target(target.id, set.id, &AssignmentOptions::default())
        .unwrap();

    let result = deployment.add_status(action.id, ActionStatus::WaitForConfirmation, vec![]);
    assert!(matches!(result, Err(RepositoryError::Validation(_))));
    let result = deployment.add_status(action.id, ActionStatus::Canceled, vec![]);
    assert!(matches!(result, Err(RepositoryError::InvalidState(_))));

    let running = deployment
        .add_status(action.id, ActionStatus::Running, vec!["downloading".to_string()])
        .unwrap();
    assert!(running.active);

    fixture.clock.advance(Duration::minutes(10));
    let finished = fixture.report(action.id, ActionStatus::Finished);
    assert!(!finished.active);
    assert_eq!(finished.history.last().map(|e| e.status), Some(ActionStatus::Finished));

    let target = fixture.dal.targets(&fixture.system).get(target.id).unwrap();
    assert_eq!(target.update_status, TargetUpdateStatus::InSync);
    assert_eq!(target.installed_distribution_set_id, Some(set.id));
    assert_eq!(target.installed_at, Some(fixture.dal.now()));

    let repeated = deployment
        .add_status(action.id, ActionStatus::Finished, vec![])
        .expect("Repeated final status should be accepted");
    assert_eq!(repeated.history.len(), finished.history.len());
    let result = deployment.add_status(action.id, ActionStatus::Error, vec![]);
    assert!(matches!(result, Err(RepositoryError::InvalidState(_))));
}

#[test]
fn test_error_status_marks_target() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let target = fixture.insert_target("t1", None);
    let action = fixture
        .dal
        .deployment(&fixture.system)
        .assign_target(target.id, set.id, &AssignmentOptions::default())
        .unwrap();

    fixture.report(action.id, ActionStatus::Error);
    let target = fixture.dal.targets(&fixture.system).get(target.id).unwrap();
    assert_eq!(target.update_status, TargetUpdateStatus::Error);
}

#[test]
fn test_canceling_action_keeps_status_on_running_feedback() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let target = fixture.insert_target("t1", None);
    let deployment = fixture.dal.deployment(&fixture.system);
    let action = deployment
        .assign_target(target.id, set.id, &AssignmentOptions::default())
        .unwrap();
    deployment.cancel(action.id, CancelMode::Soft).unwrap();

    let noted = deployment
        .add_status(action.id, ActionStatus::Running, vec!["still busy".to_string()])
        .unwrap();
    assert_eq!(noted.status, ActionStatus::Canceling);
    assert_eq!(noted.history.last().map(|e| e.status), Some(ActionStatus::Running));

    let rejected = deployment
        .add_status(action.id, ActionStatus::CancelRejected, vec![])
        .unwrap();
    assert_eq!(rejected.status, ActionStatus::CancelRejected);
}

#[test]
fn test_confirmation_flow() {
    let fixture = TestFixture::with_settings(Repository {
        confirmation_flow_enabled: true,
        ..Repository::default()
    });
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let target = fixture.insert_target("t1", None);
    let deployment = fixture.dal.deployment(&fixture.system);

    let options = AssignmentOptions::new(ActionType::Soft).with_confirmation_required(true);
    let action = deployment.assign_target(target.id, set.id, &options).unwrap();
    assert_eq!(action.status, ActionStatus::WaitForConfirmation);

    let result = deployment.add_status(action.id, ActionStatus::Running, vec![]);
    assert!(matches!(result, Err(RepositoryError::InvalidState(_))));

    let denied = deployment
        .deny_action(action.id, vec!["not now".to_string()])
        .unwrap();
    assert_eq!(denied.status, ActionStatus::WaitForConfirmation);

    let confirmed = deployment.confirm_action(action.id, vec![]).unwrap();
    assert_eq!(confirmed.status, ActionStatus::Running);
    let result = deployment.confirm_action(action.id, vec![]);
    assert!(matches!(result, Err(RepositoryError::InvalidState(_))));
}

#[test]
fn test_confirmation_ignored_when_flow_disabled() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let target = fixture.insert_target("t1", None);

    let options = AssignmentOptions::default().with_confirmation_required(true);
    let action = fixture
        .dal
        .deployment(&fixture.system)
        .assign_target(target.id, set.id, &options)
        .unwrap();
    assert_eq!(action.status, ActionStatus::Running);
}

#[test]
fn test_force_action() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let target = fixture.insert_target("t1", None);
    let deployment = fixture.dal.deployment(&fixture.system);
    let action = deployment
        .assign_target(target.id, set.id, &AssignmentOptions::new(ActionType::Soft))
        .unwrap();
    assert!(!action.is_forced());

    let forced = deployment.force_action(action.id).unwrap();
    assert_eq!(forced.action_type, ActionType::Forced);

    fixture.report(action.id, ActionStatus::Finished);
    assert!(matches!(
        deployment.force_action(action.id),
        Err(RepositoryError::InvalidState(_))
    ));
}

#[test]
fn test_maintenance_window() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let target = fixture.insert_target("t1", None);
    let other = fixture.insert_target("t2", None);
    let deployment = fixture.dal.deployment(&fixture.system);

    let window = MaintenanceWindow::new(fixture.dal.now() + Duration::hours(1), 1800, Some(86400))
        .expect("Failed to create window");
    let action = deployment
        .assign_target(
            target.id,
            set.id,
            &AssignmentOptions::default().with_maintenance_window(window),
        )
        .unwrap();
    let unrestricted = deployment
        .assign_target(other.id, set.id, &AssignmentOptions::default())
        .unwrap();

    assert!(!deployment.is_in_maintenance_window(action.id).unwrap());
    assert!(deployment.is_in_maintenance_window(unrestricted.id).unwrap());
    fixture.clock.advance(Duration::minutes(70));
    assert!(deployment.is_in_maintenance_window(action.id).unwrap());
    fixture.clock.advance(Duration::minutes(30));
    assert!(!deployment.is_in_maintenance_window(action.id).unwrap());
    fixture.clock.advance(Duration::days(1) - Duration::minutes(30));
    assert!(deployment.is_in_maintenance_window(action.id).unwrap());
}

#[test]
fn test_actions_follow_target_visibility() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let visible_type = fixture.insert_target_type("visible", &[os.id]);
    let hidden_type = fixture.insert_target_type("hidden", &[os.id]);
    let visible = fixture.insert_target("t1", Some(visible_type.id));
    let hidden = fixture.insert_target("t2", Some(hidden_type.id));
    let result = fixture
        .dal
        .deployment(&fixture.system)
        .assign(&[visible.id, hidden.id], set.id, &AssignmentOptions::default())
        .unwrap();
    assert_eq!(result.assigned, 2);

    let scope = format!("READ_TARGET/type.id=={}", visible_type.id);
    let user = fixture.user("ivy", &[&scope]);
    let deployment = fixture.dal.deployment(&user);
    let page = deployment.find_actions(None, &Pageable::default()).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.content[0].target_id, visible.id);

    let hidden_action = result.actions.iter().find(|a| a.target_id == hidden.id).unwrap();
    assert!(matches!(
        deployment.find_action(hidden_action.id),
        Err(RepositoryError::NotFound { .. })
    ));
    assert!(matches!(
        deployment.find_actions_by_target(hidden.id, &Pageable::default()),
        Err(RepositoryError::NotFound { .. })
    ));
    let visible_action = result.actions.iter().find(|a| a.target_id == visible.id).unwrap();
    assert!(matches!(
        deployment.cancel(visible_action.id, CancelMode::Soft),
        Err(RepositoryError::InsufficientPermission(_))
    ));
}

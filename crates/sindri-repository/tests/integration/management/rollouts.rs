/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use chrono::Duration;
use sindri_models::models::{
    ActionStatus, GroupDefinition, NewRollout, NewRolloutGroup, RolloutGroupConditions,
    RolloutGroupStatus, RolloutStatus,
};
use sindri_repository::{CallerContext, Pageable, RepositoryError};
use sindri_utils::config::Repository;

use crate::fixtures::TestFixture;

fn new_rollout(name: &str, query: &str, ds_id: i64) -> NewRollout {
    NewRollout::new(name.to_string(), query.to_string(), ds_id).expect("Failed to create NewRollout")
}

fn group(name: &str, percentage: f64) -> NewRolloutGroup {
    NewRolloutGroup::new(name.to_string(), percentage).expect("Failed to create NewRolloutGroup")
}

fn group_statuses(fixture: &TestFixture, rollout_id: i64) -> Vec<RolloutGroupStatus> {
    fixture
        .dal
        .rollouts(&fixture.system)
        .get_groups(rollout_id)
        .expect("Failed to get groups")
        .iter()
        .map(|g| g.status)
        .collect()
}

fn rollout_status(fixture: &TestFixture, rollout_id: i64) -> RolloutStatus {
    fixture
        .dal
        .rollouts(&fixture.system)
        .get(rollout_id)
        .expect("Failed to get rollout")
        .status
}

fn finish_group(fixture: &TestFixture, group_id: i64) {
    let actions = fixture
        .dal
        .deployment(&fixture.system)
        .find_actions_by_rollout_group(group_id, &Pageable::unpaged())
        .expect("Failed to find group actions");
    for action in actions.content {
        fixture.report(action.id, ActionStatus::Finished);
    }
}

#[test]
fn test_rollout_reaches_only_updatable_targets() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let t1 = fixture.insert_target_type("t1", &[os.id]);
    let t2 = fixture.insert_target_type("t2", &[os.id]);
    let outside = fixture.insert_target("device-1", Some(t1.id));
    let first = fixture.insert_target("device-2", Some(t2.id));
    let second = fixture.insert_target("device-3", Some(t2.id));

    let update_scope = format!("UPDATE_TARGET/type.id=={}", t2.id);
    let operator = fixture.user(
        "olivia",
        &[
            "READ_TARGET",
            &update_scope,
            "READ_DISTRIBUTION_SET",
            "CREATE_ROLLOUT",
            "HANDLE_ROLLOUT",
            "READ_ROLLOUT",
        ],
    );
    let rollouts = fixture.dal.rollouts(&operator);
    let rollout = rollouts
        .create(
            new_rollout("fleet", "controllerid==device-*", set.id),
            GroupDefinition::Amount(1),
        )
        .expect("Failed to create rollout");
    assert_eq!(rollout.status, RolloutStatus::Ready);
    assert_eq!(rollout.total_targets, 2);
    assert_eq!(rollout.created_by, "olivia");

    rollouts.start(rollout.id).expect("Failed to start rollout");
    let report = fixture.rollout_tick();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);

    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Running);
    assert!(fixture.actions_of(outside.id).is_empty());
    for target in [&first, &second] {
        let actions = fixture.actions_of(target.id);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].rollout_id, Some(rollout.id));
        assert_eq!(actions[0].initiated_by, "olivia");
    }
    let groups = rollouts.get_groups(rollout.id).unwrap();
    assert_eq!(groups[0].total_targets, 2);
    let targets = rollouts
        .find_group_targets(groups[0].id, &Pageable::default())
        .unwrap();
    assert_eq!(targets.total, 2);
}

#[test]
fn test_groups_run_one_after_another() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    for i in 1..=4 {
        fixture.insert_target(&format!("node-{}", i), None);
    }

    let rollouts = fixture.dal.rollouts(&fixture.system);
    let rollout = rollouts
        .create(
            new_rollout("waves", "controllerid==node-*", set.id),
            GroupDefinition::Amount(2),
        )
        .unwrap();
    assert_eq!(
        group_statuses(&fixture, rollout.id),
        vec![RolloutGroupStatus::Ready, RolloutGroupStatus::Ready]
    );
    rollouts.start(rollout.id).unwrap();

    fixture.rollout_tick();
    assert_eq!(
        group_statuses(&fixture, rollout.id),
        vec![RolloutGroupStatus::Running, RolloutGroupStatus::Scheduled]
    );
    let groups = rollouts.get_groups(rollout.id).unwrap();
    assert_eq!(groups[0].total_targets, 2);

    fixture.rollout_tick();
    assert_eq!(
        group_statuses(&fixture, rollout.id),
        vec![RolloutGroupStatus::Running, RolloutGroupStatus::Scheduled]
    );
    let stats = rollouts.group_stats(groups[0].id).unwrap();
    assert_eq!(stats.running, 2);
    assert_eq!(stats.finished, 0);

    finish_group(&fixture, groups[0].id);
    fixture.rollout_tick();
    assert_eq!(
        group_statuses(&fixture, rollout.id),
        vec![RolloutGroupStatus::Finished, RolloutGroupStatus::Running]
    );
    let groups = rollouts.get_groups(rollout.id).unwrap();
    assert_eq!(groups[1].total_targets, 2);

    let first_wave: Vec<i64> = rollouts
        .find_group_targets(groups[0].id, &Pageable::default())
        .unwrap()
        .content
        .iter()
        .map(|t| t.id)
        .collect();
    let second_wave: Vec<i64> = rollouts
        .find_group_targets(groups[1].id, &Pageable::default())
        .unwrap()
        .content
        .iter()
        .map(|t| t.id)
        .collect();
    assert!(first_wave.iter().all(|id| !second_wave.contains(id)));

    finish_group(&fixture, groups[1].id);
    fixture.rollout_tick();
    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Finished);
    assert_eq!(
        group_statuses(&fixture, rollout.id),
        vec![RolloutGroupStatus::Finished, RolloutGroupStatus::Finished]
    );
}

#[test]
fn test_error_threshold_pauses_rollout() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    fixture.insert_target("node-1", None);
    fixture.insert_target("node-2", None);

    let conditions = RolloutGroupConditions::default()
        .with_error_threshold(50.0)
        .unwrap();
    let rollouts = fixture.dal.rollouts(&fixture.system);
    let rollout = rollouts
        .create(
            new_rollout("fragile", "controllerid==node-*", set.id).with_group_conditions(conditions),
            GroupDefinition::Amount(1),
        )
        .unwrap();
    rollouts.start(rollout.id).unwrap();
    fixture.rollout_tick();

    let group = rollouts.get_groups(rollout.id).unwrap().remove(0);
    let actions = fixture
        .dal
        .deployment(&fixture.system)
        .find_actions_by_rollout_group(group.id, &Pageable::unpaged())
        .unwrap();
    fixture.report(actions.content[0].id, ActionStatus::Error);
    fixture.rollout_tick();

    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Paused);
    assert_eq!(group_statuses(&fixture, rollout.id), vec![RolloutGroupStatus::Error]);

    let report = fixture.rollout_tick();
    assert_eq!(report.processed, 0);
    let resumed = rollouts.resume(rollout.id).unwrap();
    assert_eq!(resumed.status, RolloutStatus::Running);
}

#[test]
fn test_pause_and_resume_require_matching_status() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    fixture.insert_target("node-1", None);

    let rollouts = fixture.dal.rollouts(&fixture.system);
    let rollout = rollouts
        .create(new_rollout("r", "controllerid==*", set.id), GroupDefinition::Amount(1))
        .unwrap();
    assert!(matches!(
        rollouts.pause(rollout.id),
        Err(RepositoryError::InvalidState(_))
    ));
    rollouts.start(rollout.id).unwrap();
    assert!(matches!(
        rollouts.start(rollout.id),
        Err(RepositoryError::InvalidState(_))
    ));
    fixture.rollout_tick();

    let paused = rollouts.pause(rollout.id).unwrap();
    assert_eq!(paused.status, RolloutStatus::Paused);
    fixture.rollout_tick();
    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Paused);
    rollouts.resume(rollout.id).unwrap();
    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Running);
}

#[test]
fn test_rollout_creation_validation() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    for i in 1..=4 {
        fixture.insert_target(&format!("node-{}", i), None);
    }
    let rollouts = fixture.dal.rollouts(&fixture.system);

    let result = rollouts.create(
        new_rollout("empty", "controllerid==nothing-*", set.id),
        GroupDefinition::Amount(1),
    );
    assert!(matches!(result, Err(RepositoryError::Validation(_))));

    let result = rollouts.create(
        new_rollout("partial", "controllerid==node-*", set.id),
        GroupDefinition::Explicit(vec![group("half", 50.0)]),
    );
    assert!(matches!(result, Err(RepositoryError::Validation(_))));

    let result = rollouts.create(
        new_rollout("bad filter", "controllerid==node-*", set.id),
        GroupDefinition::Explicit(vec![group("g", 100.0).with_filter("colour==red")]),
    );
    assert!(matches!(result, Err(RepositoryError::InvalidQuery { .. })));

    let result = rollouts.create(
        new_rollout("too many", "controllerid==node-*", set.id),
        GroupDefinition::Explicit(Vec::new()),
    );
    assert!(matches!(result, Err(RepositoryError::Validation(_))));

    rollouts
        .create(
            new_rollout("unique", "controllerid==node-*", set.id),
            GroupDefinition::Explicit(vec![group("half", 50.0), group("rest", 100.0)]),
        )
        .expect("Failed to create rollout");
    let result = rollouts.create(
        new_rollout("unique", "controllerid==node-*", set.id),
        GroupDefinition::Amount(1),
    );
    assert!(matches!(result, Err(RepositoryError::Conflict(_))));

    let viewer = fixture.user("victor", &["READ_ROLLOUT", "READ_TARGET"]);
    let result = fixture.dal.rollouts(&viewer).create(
        new_rollout("not allowed", "controllerid==node-*", set.id),
        GroupDefinition::Amount(1),
    );
    assert!(matches!(result, Err(RepositoryError::InsufficientPermission(_))));
}

#[test]
fn test_group_filters_pick_their_targets() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let canary = fixture.insert_target("node-1", None);
    fixture
        .dal
        .targets(&fixture.system)
        .assign_tag(&[canary.id], "canary")
        .unwrap();
    fixture.insert_target("node-2", None);
    fixture.insert_target("node-3", None);

    let rollouts = fixture.dal.rollouts(&fixture.system);
    let rollout = rollouts
        .create(
            new_rollout("canary first", "controllerid==node-*", set.id),
            GroupDefinition::Explicit(vec![
                group("canary", 100.0).with_filter("tag==canary"),
                group("everyone", 100.0),
            ]),
        )
        .unwrap();
    rollouts.start(rollout.id).unwrap();
    fixture.rollout_tick();

    let groups = rollouts.get_groups(rollout.id).unwrap();
    assert_eq!(groups[0].total_targets, 1);
    let reached = rollouts
        .find_group_targets(groups[0].id, &Pageable::default())
        .unwrap();
    assert_eq!(reached.content[0].id, canary.id);

    finish_group(&fixture, groups[0].id);
    fixture.rollout_tick();
    let groups = rollouts.get_groups(rollout.id).unwrap();
    assert_eq!(groups[1].status, RolloutGroupStatus::Running);
    assert_eq!(groups[1].total_targets, 2);
}

#[test]
fn test_approval_workflow() {
    let fixture = TestFixture::with_settings(Repository {
        rollout_approval_enabled: true,
        ..Repository::default()
    });
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    fixture.insert_target("node-1", None);

    let creator = fixture.user(
        "paula",
        &["READ_TARGET", "UPDATE_TARGET", "READ_DISTRIBUTION_SET", "CREATE_ROLLOUT", "HANDLE_ROLLOUT"],
    );
    let rollout = fixture
        .dal
        .rollouts(&creator)
        .create(new_rollout("needs approval", "controllerid==*", set.id), GroupDefinition::Amount(1))
        .unwrap();
    assert_eq!(rollout.status, RolloutStatus::WaitingForApproval);
    assert!(matches!(
        fixture.dal.rollouts(&creator).start(rollout.id),
        Err(RepositoryError::InvalidState(_))
    ));
    assert!(matches!(
        fixture.dal.rollouts(&creator).approve(rollout.id, true, None),
        Err(RepositoryError::InsufficientPermission(_))
    ));

    let approver = fixture.user("quinn", &["APPROVE_ROLLOUT"]);
    let approved = fixture
        .dal
        .rollouts(&approver)
        .approve(rollout.id, true, Some("looks good".to_string()))
        .unwrap();
    assert_eq!(approved.status, RolloutStatus::Ready);
    assert_eq!(approved.approval_decided_by.as_deref(), Some("quinn"));
    assert_eq!(approved.approval_remark.as_deref(), Some("looks good"));

    let self_approved = fixture
        .dal
        .rollouts(&fixture.system)
        .create(new_rollout("system", "controllerid==*", set.id), GroupDefinition::Amount(1))
        .unwrap();
    assert_eq!(self_approved.status, RolloutStatus::Ready);
}

#[test]
fn test_denied_rollout_stays_put() {
    let fixture = TestFixture::with_settings(Repository {
        rollout_approval_enabled: true,
        ..Repository::default()
    });
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    fixture.insert_target("node-1", None);
    let creator = fixture.user(
        "paula",
        &["READ_TARGET", "UPDATE_TARGET", "READ_DISTRIBUTION_SET", "CREATE_ROLLOUT"],
    );
    let rollout = fixture
        .dal
        .rollouts(&creator)
        .create(new_rollout("denied", "controllerid==*", set.id), GroupDefinition::Amount(1))
        .unwrap();

    let denied = fixture
        .dal
        .rollouts(&fixture.user("quinn", &["APPROVE_ROLLOUT"]))
        .approve(rollout.id, false, None)
        .unwrap();
    assert_eq!(denied.status, RolloutStatus::ApprovalDenied);
    let report = fixture.rollout_tick();
    assert_eq!(report.processed, 0);
}

#[test]
fn test_auto_start_at_start_time() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let target = fixture.insert_target("node-1", None);

    let start_at = fixture.dal.now() + Duration::hours(1);
    let rollout = fixture
        .dal
        .rollouts(&fixture.system)
        .create(
            new_rollout("night", "controllerid==*", set.id).with_start_at(start_at),
            GroupDefinition::Amount(1),
        )
        .unwrap();

    fixture.rollout_tick();
    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Ready);
    assert!(fixture.actions_of(target.id).is_empty());

    fixture.clock.advance(Duration::hours(2));
    fixture.rollout_tick();
    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Running);
    assert_eq!(fixture.actions_of(target.id).len(), 1);
}

#[test]
fn test_invalidated_set_fails_rollout() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    fixture.insert_target("node-1", None);

    let rollouts = fixture.dal.rollouts(&fixture.system);
    let rollout = rollouts
        .create(new_rollout("doomed", "controllerid==*", set.id), GroupDefinition::Amount(1))
        .unwrap();
    rollouts.start(rollout.id).unwrap();
    fixture
        .dal
        .distribution_sets(&fixture.system)
        .invalidate(set.id, None)
        .unwrap();

    fixture.rollout_tick();
    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Error);
}

#[test]
fn test_delete_keeps_actions_running() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    let target = fixture.insert_target("node-1", None);

    let rollouts = fixture.dal.rollouts(&fixture.system);
    let rollout = rollouts
        .create(new_rollout("short lived", "controllerid==*", set.id), GroupDefinition::Amount(1))
        .unwrap();
    rollouts.start(rollout.id).unwrap();
    fixture.rollout_tick();

    rollouts.delete(rollout.id).expect("Failed to delete rollout");
    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Deleting);
    rollouts.delete(rollout.id).expect("Repeated delete should succeed");

    fixture.rollout_tick();
    assert!(matches!(
        rollouts.get(rollout.id),
        Err(RepositoryError::NotFound { .. })
    ));
    assert_eq!(rollouts.find_all(None, &Pageable::default()).unwrap().total, 0);

    let actions = fixture.actions_of(target.id);
    assert_eq!(actions.len(), 1);
    assert!(actions[0].active);

    let recreated = rollouts
        .create(new_rollout("short lived", "controllerid==*", set.id), GroupDefinition::Amount(1))
        .expect("Name of a deleted rollout should be free");
    assert_ne!(recreated.id, rollout.id);
}

#[test]
fn test_update_and_find() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    fixture.insert_target("node-1", None);
    let rollouts = fixture.dal.rollouts(&fixture.system);
    let first = rollouts
        .create(new_rollout("alpha", "controllerid==*", set.id), GroupDefinition::Amount(1))
        .unwrap();
    rollouts
        .create(new_rollout("beta", "controllerid==*", set.id), GroupDefinition::Amount(1))
        .unwrap();

    let updated = rollouts
        .update(first.id, Some("gamma".to_string()), Some("renamed".to_string()))
        .unwrap();
    assert_eq!(updated.name, "gamma");
    assert_eq!(updated.description.as_deref(), Some("renamed"));
    assert!(matches!(
        rollouts.update(first.id, Some("beta".to_string()), None),
        Err(RepositoryError::Conflict(_))
    ));

    let page = rollouts.find_all(Some("name==gam*"), &Pageable::default()).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.content[0].id, first.id);

    let outsider = CallerContext::user_with("default", "zoe", &["READ_TARGET"]).unwrap();
    assert!(matches!(
        fixture.dal.rollouts(&outsider).get(first.id),
        Err(RepositoryError::InsufficientPermission(_))
    ));
}

#[test]
fn test_trigger_next_group_starts_it_early() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    for i in 1..=4 {
        fixture.insert_target(&format!("node-{}", i), None);
    }

    let rollouts = fixture.dal.rollouts(&fixture.system);
    let rollout = rollouts
        .create(
            new_rollout("eager", "controllerid==node-*", set.id),
            GroupDefinition::Amount(2),
        )
        .unwrap();
    assert!(matches!(
        rollouts.trigger_next_group(rollout.id),
        Err(RepositoryError::InvalidState(_))
    ));

    rollouts.start(rollout.id).unwrap();
    fixture.rollout_tick();
    let bystander = fixture.user("bob", &["READ_ROLLOUT"]);
    assert!(matches!(
        fixture.dal.rollouts(&bystander).trigger_next_group(rollout.id),
        Err(RepositoryError::InsufficientPermission(_))
    ));

    let triggered = rollouts.trigger_next_group(rollout.id).unwrap();
    assert_eq!(triggered.status, RolloutStatus::Running);
    assert_eq!(
        group_statuses(&fixture, rollout.id),
        vec![RolloutGroupStatus::Running, RolloutGroupStatus::Running]
    );
    let groups = rollouts.get_groups(rollout.id).unwrap();
    assert_eq!(groups[1].total_targets, 2);

    assert!(matches!(
        rollouts.trigger_next_group(rollout.id),
        Err(RepositoryError::InvalidState(_))
    ));

    finish_group(&fixture, groups[0].id);
    finish_group(&fixture, groups[1].id);
    fixture.rollout_tick();
    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Finished);
}

#[test]
fn test_retry_covers_failed_targets_only() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    for i in 1..=3 {
        fixture.insert_target(&format!("node-{}", i), None);
    }

    let conditions = RolloutGroupConditions::default()
        .with_success_threshold(50.0)
        .unwrap();
    let rollouts = fixture.dal.rollouts(&fixture.system);
    let rollout = rollouts
        .create(
            new_rollout("patch", "controllerid==node-*", set.id).with_group_conditions(conditions),
            GroupDefinition::Amount(1),
        )
        .unwrap();
    assert!(matches!(
        rollouts.retry(rollout.id),
        Err(RepositoryError::Validation(_))
    ));

    rollouts.start(rollout.id).unwrap();
    fixture.rollout_tick();
    let group = rollouts.get_groups(rollout.id).unwrap().remove(0);
    let actions = fixture
        .dal
        .deployment(&fixture.system)
        .find_actions_by_rollout_group(group.id, &Pageable::unpaged())
        .unwrap()
        .content;
    let failed_target = actions[0].target_id;
    fixture.report(actions[0].id, ActionStatus::Error);
    fixture.report(actions[1].id, ActionStatus::Finished);
    fixture.report(actions[2].id, ActionStatus::Finished);
    fixture.rollout_tick();
    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Finished);

    let retry = rollouts.retry(rollout.id).unwrap();
    assert_eq!(retry.name, "patch_retry");
    assert_eq!(retry.status, RolloutStatus::Ready);
    assert_eq!(retry.total_targets, 1);
    assert_eq!(retry.distribution_set_id, set.id);
    assert!(matches!(
        rollouts.retry(rollout.id),
        Err(RepositoryError::Conflict(_))
    ));

    rollouts.start(retry.id).unwrap();
    fixture.rollout_tick();
    let retried = fixture.actions_of(failed_target);
    assert_eq!(retried.len(), 2);
    assert!(retried.iter().any(|a| a.rollout_id == Some(retry.id) && a.active));
    for action in &actions[1..] {
        assert_eq!(fixture.actions_of(action.target_id).len(), 1);
    }
}

#[test]
fn test_dynamic_rollout_picks_up_late_targets() {
    let fixture = TestFixture::new();
    let os = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", os.id);
    fixture.insert_target("dev-1", None);
    fixture.insert_target("dev-2", None);

    let rollouts = fixture.dal.rollouts(&fixture.system);
    let rollout = rollouts
        .create(
            new_rollout("rolling", "controllerid==dev-*", set.id).with_dynamic(true),
            GroupDefinition::Amount(1),
        )
        .unwrap();
    let groups = rollouts.get_groups(rollout.id).unwrap();
    assert_eq!(groups.len(), 2);
    assert!(!groups[0].dynamic);
    assert!(groups[1].dynamic);

    rollouts.start(rollout.id).unwrap();
    fixture.rollout_tick();
    finish_group(&fixture, groups[0].id);
    fixture.rollout_tick();
    assert_eq!(
        group_statuses(&fixture, rollout.id),
        vec![RolloutGroupStatus::Finished, RolloutGroupStatus::Running]
    );

    // nothing new matches yet, the dynamic group stays open
    fixture.rollout_tick();
    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Running);
    assert_eq!(rollouts.get_groups(rollout.id).unwrap()[1].total_targets, 0);

    for i in 3..=5 {
        fixture.insert_target(&format!("dev-{}", i), None);
    }
    fixture.rollout_tick();
    let groups = rollouts.get_groups(rollout.id).unwrap();
    assert_eq!(groups[1].total_targets, 2);
    assert_eq!(rollouts.get(rollout.id).unwrap().total_targets, 4);

    fixture.rollout_tick();
    assert_eq!(
        group_statuses(&fixture, rollout.id),
        vec![
            RolloutGroupStatus::Finished,
            RolloutGroupStatus::Running,
            RolloutGroupStatus::Scheduled
        ]
    );

    finish_group(&fixture, groups[1].id);
    fixture.rollout_tick();
    let groups = rollouts.get_groups(rollout.id).unwrap();
    assert_eq!(groups[1].status, RolloutGroupStatus::Finished);
    assert_eq!(groups[2].status, RolloutGroupStatus::Running);
    assert!(groups[2].dynamic);
    assert_eq!(groups[2].total_targets, 1);
    assert_eq!(rollout_status(&fixture, rollout.id), RolloutStatus::Running);
}

/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use sindri_models::models::{ActionType, AutoAssignBinding, NewTargetFilterQuery};
use sindri_repository::{Pageable, RepositoryError};

use crate::fixtures::TestFixture;

fn new_query(name: &str, query: &str) -> NewTargetFilterQuery {
    NewTargetFilterQuery::new(name.to_string(), query.to_string())
        .expect("Failed to create NewTargetFilterQuery")
}

#[test]
fn test_invalid_query_is_rejected() {
    let fixture = TestFixture::new();
    let queries = fixture.dal.target_filter_queries(&fixture.system);

    let result = queries.create(new_query("broken", "name=="));
    assert!(matches!(result, Err(RepositoryError::InvalidQuery { .. })));

    let result = queries.create(new_query("unknown field", "color==red"));
    assert!(matches!(result, Err(RepositoryError::InvalidQuery { .. })));

    let stored = queries
        .create(new_query("eu", "tag==eu"))
        .expect("Failed to create filter query");
    let result = queries.update(stored.id, None, Some("(tag==eu".to_string()));
    assert!(matches!(result, Err(RepositoryError::InvalidQuery { .. })));
}

#[test]
fn test_duplicate_name_conflicts() {
    let fixture = TestFixture::new();
    let queries = fixture.dal.target_filter_queries(&fixture.system);
    queries.create(new_query("eu", "tag==eu")).unwrap();
    let result = queries.create(new_query("eu", "tag==us"));
    assert!(matches!(result, Err(RepositoryError::Conflict(_))));
}

#[test]
fn test_binding_to_invisible_set_is_not_found() {
    let fixture = TestFixture::new();
    let ds_type = fixture.insert_ds_type("os");
    let visible = fixture.insert_distribution_set("visible", ds_type.id);
    let hidden = fixture.insert_distribution_set("hidden", ds_type.id);

    let scope = format!("READ_DISTRIBUTION_SET/id=={}", visible.id);
    let user = fixture.user("frank", &["READ_TARGET", "CREATE_TARGET", "UPDATE_TARGET", &scope]);
    let queries = fixture.dal.target_filter_queries(&user);

    let binding = AutoAssignBinding::new(hidden.id, ActionType::Forced, None, false).unwrap();
    let result = queries.create(new_query("hidden", "tag==eu").with_auto_assign(binding));
    assert!(matches!(result, Err(RepositoryError::NotFound { .. })));

    let binding = AutoAssignBinding::new(visible.id, ActionType::Soft, Some(100), false).unwrap();
    let stored = queries
        .create(new_query("visible", "tag==eu").with_auto_assign(binding))
        .expect("Failed to create bound filter query");
    assert_eq!(stored.auto_assign.as_ref().map(|b| b.distribution_set_id), Some(visible.id));
    assert!(stored.access_context.is_some());
}

#[test]
fn test_creating_queries_needs_create_target() {
    let fixture = TestFixture::new();
    let reader = fixture.user("gina", &["READ_TARGET"]);
    let result = fixture
        .dal
        .target_filter_queries(&reader)
        .create(new_query("eu", "tag==eu"));
    assert!(matches!(result, Err(RepositoryError::InsufficientPermission(_))));
}

#[test]
fn test_find_with_auto_assign() {
    let fixture = TestFixture::new();
    let ds_type = fixture.insert_ds_type("os");
    let set = fixture.insert_distribution_set("firmware", ds_type.id);
    let queries = fixture.dal.target_filter_queries(&fixture.system);

    let plain = queries.create(new_query("plain", "tag==eu")).unwrap();
    let binding = AutoAssignBinding::new(set.id, ActionType::Forced, None, false).unwrap();
    let bound = queries
        .create(new_query("bound", "tag==us").with_auto_assign(binding.clone()))
        .unwrap();

    let with_binding = queries.find_with_auto_assign().unwrap();
    assert_eq!(with_binding.len(), 1);
    assert_eq!(with_binding[0].id, bound.id);

    queries.update_auto_assign(plain.id, Some(binding)).unwrap();
    queries.update_auto_assign(bound.id, None).unwrap();
    let with_binding = queries.find_with_auto_assign().unwrap();
    assert_eq!(with_binding.len(), 1);
    assert_eq!(with_binding[0].id, plain.id);

    let page = queries.find(None, &Pageable::default()).unwrap();
    assert_eq!(page.total, 2);
    queries.delete(bound.id).unwrap();
    assert!(matches!(
        queries.delete(bound.id),
        Err(RepositoryError::NotFound { .. })
    ));
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::SchedulerError;
use drover_core::{FakeClock, Goal, WorkItem};
use drover_store::Store;

fn seeded(items: &[WorkItem]) -> (Store, Goal) {
    let goal = Goal::builder().build();
    let store = Store::open_in_memory().unwrap();
    store
        .with_tx(|tx| -> Result<(), drover_store::StoreError> {
            tx.create_goal(&goal)?;
            for item in items {
                tx.create_work_item(item)?;
            }
            Ok(())
        })
        .unwrap();
    (store, goal)
}

#[test]
fn transition_enforces_state_machine() {
    let manager = WorkItemManager::new();
    let item = WorkItem::builder().build();
    let (store, _) = seeded(std::slice::from_ref(&item));

    // queued -> in_progress is illegal.
    let err = store
        .with_tx(|tx| manager.transition(tx, &item, WorkItemStatus::InProgress, 2, None))
        .unwrap_err();
    let SchedulerError::InvalidTransition(err) = err else {
        panic!("expected invalid transition, got {err:?}");
    };
    assert_eq!(err.from, WorkItemStatus::Queued);

    store
        .with_tx(|tx| manager.transition(tx, &item, WorkItemStatus::Ready, 3, Some("deps done")))
        .unwrap();
    let back = store.with_tx(|tx| tx.get_work_item(&item.id)).unwrap().unwrap();
    assert_eq!(back.status, WorkItemStatus::Ready);

    let history = manager.history(&item.id);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].to, WorkItemStatus::Ready);
    assert_eq!(history[0].reason.as_deref(), Some("deps done"));
}

#[test]
fn history_is_bounded() {
    let manager = WorkItemManager::new();
    let id = drover_core::WorkItemId::new();
    for i in 0..(TRANSITION_HISTORY_CAP as u64 + 10) {
        manager.record(id, WorkItemStatus::Queued, WorkItemStatus::Ready, i, None);
    }
    assert_eq!(manager.history(&id).len(), TRANSITION_HISTORY_CAP);
}

#[test]
fn ready_items_promotes_and_orders() {
    let manager = WorkItemManager::new();
    let goal = Goal::builder().build();
    let a = WorkItem::builder().goal_id(goal.id).title("a").priority(1).created_at_ms(10).build();
    let b = WorkItem::builder()
        .goal_id(goal.id)
        .title("b")
        .priority(9)
        .created_at_ms(20)
        .deps(vec![a.id])
        .build();
    let store = Store::open_in_memory().unwrap();
    store
        .with_tx(|tx| {
            tx.create_goal(&goal)?;
            tx.create_work_item(&a)?;
            tx.create_work_item(&b)
        })
        .unwrap();

    let clock = FakeClock::new();
    // b's dependency is not done: only a becomes ready.
    let ready = store.with_tx(|tx| manager.ready_items(tx, &goal.id, &clock)).unwrap();
    assert_eq!(ready.iter().map(|i| i.title.as_str()).collect::<Vec<_>>(), vec!["a"]);

    store
        .with_tx(|tx| tx.update_work_item_status(&a.id, WorkItemStatus::Done, 30))
        .unwrap();
    let ready = store.with_tx(|tx| manager.ready_items(tx, &goal.id, &clock)).unwrap();
    assert_eq!(ready.iter().map(|i| i.title.as_str()).collect::<Vec<_>>(), vec!["b"]);
}

#[test]
fn validate_dag_accepts_diamond() {
    let goal = Goal::builder().build();
    let a = WorkItem::builder().goal_id(goal.id).build();
    let b = WorkItem::builder().goal_id(goal.id).deps(vec![a.id]).build();
    let c = WorkItem::builder().goal_id(goal.id).deps(vec![a.id]).build();
    let d = WorkItem::builder().goal_id(goal.id).deps(vec![b.id, c.id]).build();
    assert!(WorkItemManager::validate_dag(&[a, b, c, d]).is_ok());
}

#[test]
fn validate_dag_rejects_unknown_dependency() {
    let goal = Goal::builder().build();
    let a = WorkItem::builder().goal_id(goal.id).deps(vec!["item-ghost".into()]).build();
    let err = WorkItemManager::validate_dag(std::slice::from_ref(&a)).unwrap_err();
    assert!(err.to_string().contains("unknown item"));
}

#[test]
fn validate_dag_rejects_two_cycle_and_names_vertices() {
    let goal = Goal::builder().build();
    let mut a = WorkItem::builder().goal_id(goal.id).build();
    let b = WorkItem::builder().goal_id(goal.id).deps(vec![a.id]).build();
    a.deps = vec![b.id];
    let a_id = a.id;
    let err = WorkItemManager::validate_dag(&[a, b]).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("Cycle detected"), "message was {msg:?}");
    assert!(msg.contains(a_id.as_str()), "cycle names a vertex: {msg:?}");
}

#[test]
fn validate_dag_rejects_self_cycle() {
    let goal = Goal::builder().build();
    let mut a = WorkItem::builder().goal_id(goal.id).build();
    a.deps = vec![a.id];
    let err = WorkItemManager::validate_dag(std::slice::from_ref(&a)).unwrap_err();
    assert!(err.to_string().contains("Cycle detected"));
}

#[test]
fn all_complete_requires_every_item_done() {
    let goal = Goal::builder().build();
    let done = WorkItem::builder().goal_id(goal.id).status(WorkItemStatus::Done).build();
    let open = WorkItem::builder().goal_id(goal.id).build();
    assert!(WorkItemManager::all_complete(std::slice::from_ref(&done)));
    assert!(!WorkItemManager::all_complete(&[done, open]));
    assert!(WorkItemManager::all_complete(&[]));
}

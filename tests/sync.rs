//! Sync scenarios, run against an in-memory calendar and an in-memory Grocy

use std::sync::{Arc, Mutex};

use grocylink::mapper::{EntityKind, SyncMap, DIRECTION_DUPLICATE, SENTINEL_ID};
use grocylink::mock::{chore, task, todo_ical, MockCalendar, MockInventory};
use grocylink::mock_behaviour::MockBehaviour;
use grocylink::sync::sync_progress::{feedback_channel, SyncEvent};
use grocylink::todo::TodoStatus;
use grocylink::Reconciler;

const TASK_1: &str = "grocy-task-1@grocylink";
const CHORE_5: &str = "grocy-chore-5@grocylink";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn reconciler(calendar: MockCalendar, inventory: MockInventory) -> Reconciler<MockCalendar, MockInventory> {
    Reconciler::new(calendar, inventory, SyncMap::in_memory())
}


#[tokio::test]
async fn second_run_writes_nothing() {
    init_logger();

    let inventory = MockInventory::new();
    let mut milk = task(1, "Buy milk");
    milk.due_date = Some("2024-05-03".to_string());
    milk.description = Some("Oat milk if possible".to_string());
    inventory.add_task(milk);
    inventory.add_task(task(2, "Call the plumber"));
    inventory.add_chore(chore(5, "Vacuum", Some("2024-05-04 12:00:00")));
    inventory.add_chore(chore(6, "Descale the kettle", None));

    let mut reconciler = reconciler(MockCalendar::new(), inventory);
    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert_eq!(stats.tasks_synced, 2);
    assert_eq!(stats.chores_synced, 2);
    assert_eq!(reconciler.calendar().n_saves(), 4);
    assert_eq!(reconciler.sync_map().len(), 4);

    let pushed = reconciler.calendar().todo(TASK_1).unwrap();
    assert_eq!(pushed.summary(), "Buy milk");
    assert_eq!(pushed.description(), Some("Oat milk if possible"));
    assert_eq!(grocylink::ical::extract_due_date(&pushed), "2024-05-03");

    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert_eq!(stats.calendar_to_inventory, 0);
    assert_eq!(reconciler.calendar().n_writes(), 4);
    assert_eq!(reconciler.inventory().calls().n_writes(), 0);
}

#[tokio::test]
async fn external_todos_are_not_imported_twice() {
    init_logger();

    let inventory = MockInventory::new();
    inventory.add_task(task(1, "Buy milk"));
    let mut calendar = MockCalendar::new();
    calendar.put_raw("abc", todo_ical("abc", "buy MILK", TodoStatus::NeedsAction, None));

    let mut reconciler = reconciler(calendar, inventory);
    for _ in 0..2 {
        let stats = reconciler.sync().await;
        assert!(stats.is_success(), "{:?}", stats.errors);
    }

    assert!(reconciler.inventory().calls().created.is_empty());
    assert_eq!(reconciler.inventory().tasks().len(), 1);

    let sentinel = reconciler.sync_map().lookup(EntityKind::Task, SENTINEL_ID).unwrap();
    assert_eq!(sentinel.external_uid, "abc");
    assert_eq!(sentinel.sync_direction, DIRECTION_DUPLICATE);
    assert!(sentinel.is_sentinel());

    // Both the external to-do and the one of task 1 are left alone
    assert_eq!(reconciler.calendar().len(), 2);
    assert_eq!(reconciler.calendar().todo("abc").unwrap().summary(), "buy MILK");
}

#[tokio::test]
async fn imported_todos_keep_their_uid() {
    init_logger();

    let inventory = MockInventory::new();
    inventory.set_next_task_id(42);
    let mut calendar = MockCalendar::new();
    calendar.put_raw("abc-123", todo_ical("abc-123", "Water plants", TodoStatus::NeedsAction, Some("20240510")));

    let mut reconciler = reconciler(calendar, inventory);
    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert_eq!(stats.calendar_to_inventory, 1);

    let created = reconciler.inventory().task(42).unwrap();
    assert_eq!(created.name, "Water plants");
    assert_eq!(created.due_date.as_deref(), Some("2024-05-10 00:00:00"));
    let entry = reconciler.sync_map().lookup(EntityKind::Task, 42).unwrap();
    assert_eq!(entry.external_uid, "abc-123");

    // A rename in Grocy is pushed to the very same to-do
    reconciler.inventory().edit_task(42, |task| task.name = "Water plants twice".to_string());
    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);

    assert_eq!(reconciler.calendar().len(), 1);
    assert_eq!(reconciler.calendar().todo("abc-123").unwrap().summary(), "Water plants twice");
    assert!(reconciler.calendar().todo("grocy-task-42@grocylink").is_none());
    assert_eq!(reconciler.inventory().calls().created.len(), 1);
}

#[tokio::test]
async fn completed_imports_are_completed_in_grocy() {
    init_logger();

    let mut calendar = MockCalendar::new();
    calendar.put_raw("done-already", todo_ical("done-already", "Pay the rent", TodoStatus::Completed, None));

    let mut reconciler = reconciler(calendar, MockInventory::new());
    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);

    let tasks = reconciler.inventory().tasks();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].done);
    assert_eq!(reconciler.calendar().n_writes(), 0);
}

#[tokio::test]
async fn completions_go_both_ways() {
    init_logger();

    let inventory = MockInventory::new();
    inventory.add_task(task(1, "Buy milk"));
    let mut reconciler = reconciler(MockCalendar::new(), inventory);
    reconciler.sync().await;

    // Checked in the calendar app
    let (mut calendar, inventory, map) = reconciler.into_parts();
    calendar.put_raw(TASK_1, todo_ical(TASK_1, "Buy milk", TodoStatus::Completed, None));
    let mut reconciler = Reconciler::new(calendar, inventory, map);

    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert_eq!(stats.calendar_to_inventory, 1);
    assert!(reconciler.inventory().task(1).unwrap().done);
    assert_eq!(reconciler.inventory().calls().completed, vec![1]);
    assert_eq!(reconciler.sync_map().lookup(EntityKind::Task, 1).unwrap().last_status, "COMPLETED");

    // Unchecked in the calendar app
    let (mut calendar, inventory, map) = reconciler.into_parts();
    calendar.put_raw(TASK_1, todo_ical(TASK_1, "Buy milk", TodoStatus::NeedsAction, None));
    let mut reconciler = Reconciler::new(calendar, inventory, map);

    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert!(reconciler.inventory().task(1).unwrap().done == false);
    assert_eq!(reconciler.inventory().calls().undone, vec![1]);

    // Done on both sides at once
    reconciler.inventory().edit_task(1, |task| task.done = true);
    let (mut calendar, inventory, map) = reconciler.into_parts();
    calendar.put_raw(TASK_1, todo_ical(TASK_1, "Buy milk", TodoStatus::Completed, None));
    let mut reconciler = Reconciler::new(calendar, inventory, map);
    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert!(reconciler.calendar().todo(TASK_1).unwrap().status().is_completed());
    assert_eq!(reconciler.inventory().calls().undone, vec![1]);
}

#[tokio::test]
async fn cancelled_todos_do_not_reopen_done_tasks() {
    init_logger();

    let inventory = MockInventory::new();
    let mut milk = task(1, "Buy milk");
    milk.done = true;
    inventory.add_task(milk);
    let mut reconciler = reconciler(MockCalendar::new(), inventory);
    reconciler.sync().await;

    let (mut calendar, inventory, map) = reconciler.into_parts();
    calendar.put_raw(TASK_1, todo_ical(TASK_1, "Buy milk", TodoStatus::Cancelled, None));
    let mut reconciler = Reconciler::new(calendar, inventory, map);

    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert_eq!(stats.calendar_to_inventory, 0);
    assert!(reconciler.inventory().task(1).unwrap().done);
    assert!(reconciler.inventory().calls().undone.is_empty());

    // Grocy wins in the next phase: the to-do is completed again
    assert_eq!(reconciler.calendar().n_updates(), 1);
    assert!(reconciler.calendar().todo(TASK_1).unwrap().status().is_completed());
}

#[tokio::test]
async fn in_process_todos_are_overwritten_with_the_grocy_status() {
    init_logger();

    let inventory = MockInventory::new();
    inventory.add_task(task(1, "Buy milk"));
    let mut reconciler = reconciler(MockCalendar::new(), inventory);
    reconciler.sync().await;

    let (mut calendar, inventory, map) = reconciler.into_parts();
    calendar.put_raw(TASK_1, todo_ical(TASK_1, "Buy milk", TodoStatus::InProcess, None));
    let mut reconciler = Reconciler::new(calendar, inventory, map);

    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert_eq!(reconciler.inventory().calls().n_writes(), 0);
    assert_eq!(reconciler.calendar().n_updates(), 1);
    assert_eq!(reconciler.calendar().todo(TASK_1).unwrap().status(), &TodoStatus::NeedsAction);
}

#[tokio::test]
async fn unparseable_items_are_skipped() {
    init_logger();

    let inventory = MockInventory::new();
    inventory.add_task(task(1, "Buy milk"));
    let mut calendar = MockCalendar::new();
    calendar.put_raw("broken", "this is not iCal".to_string());
    calendar.put_raw("abc", todo_ical("abc", "Water plants", TodoStatus::NeedsAction, None));

    let mut reconciler = reconciler(calendar, inventory);
    let stats = reconciler.sync().await;
    assert_eq!(stats.errors.len(), 1);
    assert!(stats.errors[0].contains("broken"), "{}", stats.errors[0]);

    // The other items went through
    assert_eq!(stats.calendar_to_inventory, 1);
    assert_eq!(stats.tasks_synced, 2);
    assert_eq!(reconciler.inventory().tasks().len(), 2);
    assert!(reconciler.calendar().todo(TASK_1).is_some());
}

#[tokio::test]
async fn calendar_edits_are_applied_to_grocy() {
    init_logger();

    let inventory = MockInventory::new();
    inventory.add_task(task(1, "Buy milk"));
    let mut reconciler = reconciler(MockCalendar::new(), inventory);
    reconciler.sync().await;

    let (mut calendar, inventory, map) = reconciler.into_parts();
    calendar.put_raw(TASK_1, todo_ical(TASK_1, "Buy oat milk", TodoStatus::NeedsAction, Some("20240510")));
    let mut reconciler = Reconciler::new(calendar, inventory, map);

    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert_eq!(stats.calendar_to_inventory, 1);

    let edited = reconciler.inventory().task(1).unwrap();
    assert_eq!(edited.name, "Buy oat milk");
    assert_eq!(edited.due_date.as_deref(), Some("2024-05-10 00:00:00"));
    assert_eq!(reconciler.inventory().calls().updated.len(), 2);

    // Both sides agree now
    let n_writes = reconciler.calendar().n_writes();
    let stats = reconciler.sync().await;
    assert_eq!(stats.calendar_to_inventory, 0);
    assert_eq!(reconciler.inventory().calls().updated.len(), 2);
    assert_eq!(reconciler.calendar().n_writes(), n_writes);
}

#[tokio::test]
async fn missing_and_empty_descriptions_are_the_same() {
    init_logger();

    let inventory = MockInventory::new();
    let mut empty = task(1, "Buy milk");
    empty.description = Some(String::new());
    inventory.add_task(empty);
    inventory.add_task(task(2, "Call the plumber"));

    let mut reconciler = reconciler(MockCalendar::new(), inventory);
    reconciler.sync().await;
    assert_eq!(reconciler.calendar().todo(TASK_1).unwrap().description(), None);

    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert_eq!(reconciler.calendar().n_updates(), 0);
    assert_eq!(reconciler.inventory().calls().n_writes(), 0);
}

#[tokio::test]
async fn completed_chores_are_executed_once() {
    init_logger();

    let inventory = MockInventory::new();
    inventory.add_chore(chore(5, "Vacuum", Some("2024-05-04 12:00:00")));
    let mut reconciler = reconciler(MockCalendar::new(), inventory);
    reconciler.sync().await;
    assert_eq!(reconciler.sync_map().lookup(EntityKind::Chore, 5).unwrap().last_status, "NEEDS-ACTION");

    let (mut calendar, inventory, map) = reconciler.into_parts();
    calendar.put_raw(CHORE_5, todo_ical(CHORE_5, "Vacuum", TodoStatus::Completed, Some("20240504T120000")));
    let mut reconciler = Reconciler::new(calendar, inventory, map);

    for _ in 0..3 {
        let stats = reconciler.sync().await;
        assert!(stats.is_success(), "{:?}", stats.errors);
    }
    assert_eq!(reconciler.inventory().calls().executed, vec![5]);
    assert_eq!(reconciler.sync_map().lookup(EntityKind::Chore, 5).unwrap().last_status, "COMPLETED");
}

#[tokio::test]
async fn completed_chores_that_were_never_synced_are_not_executed() {
    init_logger();

    let inventory = MockInventory::new();
    inventory.add_chore(chore(5, "Vacuum", Some("2024-05-04 12:00:00")));
    let mut calendar = MockCalendar::new();
    calendar.put_raw(CHORE_5, todo_ical(CHORE_5, "Vacuum", TodoStatus::Completed, Some("20240504T120000")));

    let mut reconciler = reconciler(calendar, inventory);
    for _ in 0..2 {
        let stats = reconciler.sync().await;
        assert!(stats.is_success(), "{:?}", stats.errors);
        assert_eq!(stats.calendar_to_inventory, 0);
    }
    assert!(reconciler.inventory().calls().executed.is_empty());
    assert!(reconciler.sync_map().lookup(EntityKind::Chore, 5).is_some());
}

#[tokio::test]
async fn rescheduled_chores_are_reopened() {
    init_logger();

    let inventory = MockInventory::new();
    inventory.add_chore(chore(5, "Vacuum", Some("2024-05-04 12:00:00")));
    let mut reconciler = reconciler(MockCalendar::new(), inventory);
    reconciler.sync().await;

    let (mut calendar, inventory, map) = reconciler.into_parts();
    calendar.put_raw(CHORE_5, todo_ical(CHORE_5, "Vacuum", TodoStatus::Completed, Some("20240504T120000")));
    // Grocy computes the next execution once the chore has been executed
    inventory.add_chore(chore(5, "Vacuum", Some("2024-05-11 12:00:00")));
    let mut reconciler = Reconciler::new(calendar, inventory, map);

    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    let reopened = reconciler.calendar().todo(CHORE_5).unwrap();
    assert_eq!(reopened.status(), &TodoStatus::NeedsAction);
    assert_eq!(grocylink::ical::extract_due_date(&reopened), "2024-05-11");
    assert_eq!(reconciler.sync_map().lookup(EntityKind::Chore, 5).unwrap().last_status, "NEEDS-ACTION");
    assert_eq!(reconciler.inventory().calls().executed, vec![5]);
}

#[tokio::test]
async fn never_due_chores_have_no_due_date() {
    init_logger();

    let inventory = MockInventory::new();
    inventory.add_chore(chore(9, "Clean the gutter", Some("2999-12-31 23:59:59")));
    let mut reconciler = reconciler(MockCalendar::new(), inventory);
    reconciler.sync().await;

    let pushed = reconciler.calendar().todo("grocy-chore-9@grocylink").unwrap();
    assert!(pushed.due().is_none());
    assert_eq!(grocylink::ical::extract_due_date(&pushed), "");

    reconciler.sync().await;
    assert_eq!(reconciler.calendar().n_writes(), 1);
}

#[tokio::test]
async fn a_failing_item_does_not_stop_the_others() {
    init_logger();

    let behaviour = Arc::new(Mutex::new(MockBehaviour {
        save_new_behaviour: (0, 1),
        ..MockBehaviour::default()
    }));
    let inventory = MockInventory::new();
    inventory.add_task(task(7, "Buy milk"));
    inventory.add_task(task(8, "Call the plumber"));

    let mut reconciler = reconciler(MockCalendar::with_behaviour(behaviour), inventory);
    let stats = reconciler.sync().await;
    assert_eq!(stats.errors.len(), 1);
    assert!(stats.errors[0].contains("Task 7"), "{}", stats.errors[0]);
    assert_eq!(stats.tasks_synced, 1);
    assert!(reconciler.calendar().todo("grocy-task-7@grocylink").is_none());
    assert!(reconciler.calendar().todo("grocy-task-8@grocylink").is_some());
    assert!(reconciler.sync_map().lookup(EntityKind::Task, 7).is_none());

    // The next run catches up
    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert!(reconciler.calendar().todo("grocy-task-7@grocylink").is_some());
}

#[tokio::test]
async fn a_failing_phase_does_not_stop_the_others() {
    init_logger();

    let behaviour = Arc::new(Mutex::new(MockBehaviour {
        list_todos_behaviour: (0, 1),
        ..MockBehaviour::default()
    }));
    let inventory = MockInventory::new();
    inventory.add_task(task(1, "Buy milk"));
    inventory.add_chore(chore(5, "Vacuum", None));

    let mut reconciler = reconciler(MockCalendar::with_behaviour(behaviour), inventory);
    let stats = reconciler.sync().await;
    assert_eq!(stats.errors.len(), 1);
    assert!(stats.errors[0].starts_with("Calendar → inventory"), "{}", stats.errors[0]);
    assert_eq!(stats.tasks_synced, 1);
    assert_eq!(stats.chores_synced, 1);
    assert_eq!(reconciler.calendar().len(), 2);
}

#[tokio::test]
async fn grocy_outages_are_reported() {
    init_logger();

    let behaviour = Arc::new(Mutex::new(MockBehaviour::fail_now(10)));
    let inventory = MockInventory::with_behaviour(Arc::clone(&behaviour));
    inventory.add_task(task(1, "Buy milk"));
    let mut calendar = MockCalendar::new();
    calendar.put_raw("abc", todo_ical("abc", "Water plants", TodoStatus::NeedsAction, None));

    let mut reconciler = reconciler(calendar, inventory);
    let stats = reconciler.sync().await;
    assert_eq!(stats.errors.len(), 3);
    assert_eq!(reconciler.calendar().n_writes(), 0);

    behaviour.lock().unwrap().suspend();
    let stats = reconciler.sync().await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert_eq!(reconciler.inventory().calls().created.len(), 1);
    assert_eq!(reconciler.calendar().len(), 2);
}

#[tokio::test]
async fn feedback_is_sent() {
    init_logger();

    let inventory = MockInventory::new();
    inventory.add_task(task(1, "Buy milk"));
    let mut reconciler = reconciler(MockCalendar::new(), inventory);

    let (sender, receiver) = feedback_channel();
    assert!(matches!(*receiver.borrow(), SyncEvent::NotStarted));
    let stats = reconciler.sync_with_feedback(sender).await;
    assert!(stats.is_success());
    assert!(matches!(*receiver.borrow(), SyncEvent::Finished{ success: true }));
}

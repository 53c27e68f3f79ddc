mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{FlakyStore, Harness, CHANNEL, GUILD, MANAGER};
use raffle_bot::raffle::{Keys, Monitor, MonitorExit, Status, NO_RAFFLE, TRY_AGAIN};

const NOT_ENOUGH: &str = "There are not enough entries to draw the specified configuration.";

async fn flaky_with_entries(users: impl IntoIterator<Item = u64>) -> (Harness, Arc<FlakyStore>) {
    let (h, store) = Harness::flaky(false);
    h.raffle.start(GUILD, Harness::origin(), None).await;
    for user in users {
        h.raffle.enter(GUILD, user).await;
    }
    (h, store)
}

#[tokio::test]
async fn concurrent_draws_never_overdraw() {
    let (h, _store) = flaky_with_entries(1..=4).await;

    let (a, b) = tokio::join!(h.raffle.draw(GUILD, &[3]), h.raffle.draw(GUILD, &[3]));
    let mut replies = vec![a, b];
    replies.sort();
    assert_eq!(replies, vec!["Drew 3 winner(s).".to_string(), NOT_ENOUGH.to_string()]);

    let snap = h.raffle.snapshot(GUILD).await.unwrap();
    assert_eq!(snap.pending.len(), 3);
    assert_eq!(snap.entries.len(), 1);
    assert_eq!(snap.status, Some(Status::Closed));
}

#[tokio::test]
async fn finish_racing_an_entry_leaves_nothing_behind() {
    let (h, _store) = flaky_with_entries([]).await;

    let (finished, entered) = tokio::join!(h.raffle.finish(GUILD), h.raffle.enter(GUILD, 9));
    assert_eq!(finished, "The raffle has finished.");
    assert!(
        entered == NO_RAFFLE || entered == "You have entered the raffle. Good luck!",
        "unexpected reply {entered:?}"
    );
    let snap = h.raffle.snapshot(GUILD).await.unwrap();
    assert_eq!(snap.status, None);
    assert!(snap.entries.is_empty());

    h.raffle.start(GUILD, Harness::origin(), None).await;
    assert!(h.raffle.snapshot(GUILD).await.unwrap().entries.is_empty(), "no entries carried into the next raffle");
}

#[tokio::test]
async fn finish_racing_a_confirmation_leaves_nothing_behind() {
    let (h, _store) = flaky_with_entries([7]).await;
    h.raffle.draw(GUILD, &[1]).await;

    let (finished, _) = tokio::join!(h.raffle.finish(GUILD), h.raffle.confirm(GUILD, 7, "Zen#1234"));
    assert_eq!(finished, "The raffle has finished.");

    let snap = h.raffle.snapshot(GUILD).await.unwrap();
    assert!(snap.confirmed.is_empty());
    assert!(snap.pending.is_empty());
    let prefix = format!("Raffle:{GUILD}:");
    let leftovers: Vec<String> = h.kv.keys().into_iter().filter(|k| k.starts_with(&prefix)).collect();
    assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
}

#[tokio::test]
async fn store_outage_applies_nothing_and_asks_to_retry() {
    let (h, store) = flaky_with_entries([1, 2]).await;
    h.messenger.clear();

    store.fail_on("SAdd(");
    assert_eq!(h.raffle.enter(GUILD, 3).await, TRY_AGAIN);
    assert!(!h.raffle.snapshot(GUILD).await.unwrap().entries.contains(&3));
    assert!(h.messenger.channel_posts(CHANNEL).is_empty());

    store.fail_on("SPopInto");
    let before = h.raffle.snapshot(GUILD).await.unwrap();
    assert_eq!(h.raffle.draw(GUILD, &[2]).await, TRY_AGAIN);
    assert_eq!(h.raffle.snapshot(GUILD).await.unwrap(), before, "the close rides with the pop");

    store.heal();
    assert_eq!(h.raffle.enter(GUILD, 3).await, "You have entered the raffle. Good luck!");
}

#[tokio::test]
async fn untracked_manager_card_does_not_fail_a_committed_draw() {
    let (h, store) = flaky_with_entries([5]).await;
    h.messenger.set_online(MANAGER);

    store.fail_on("manager_messages");
    assert_eq!(h.raffle.draw(GUILD, &[1]).await, "Drew 1 winner(s).");
    store.heal();

    let snap = h.raffle.snapshot(GUILD).await.unwrap();
    assert_eq!(snap.pending, HashSet::from([5]));
    assert_eq!(snap.status, Some(Status::Closed));
    assert!(h.messenger.dms_to(MANAGER).iter().any(|m| m.starts_with("**Entry Results**")));
}

#[tokio::test(start_paused = true)]
async fn racing_monitors_share_one_lock() {
    let (h, _store) = flaky_with_entries([]).await;

    let a = tokio::spawn(Monitor::new(h.raffle.clone(), GUILD).run());
    let b = tokio::spawn(Monitor::new(h.raffle.clone(), GUILD).run());
    tokio::time::sleep(Duration::from_secs(12)).await;
    h.raffle.finish(GUILD).await;

    let exits = [a.await.unwrap(), b.await.unwrap()];
    assert!(exits.contains(&MonitorExit::NotAcquired), "{exits:?}");
    assert!(exits.contains(&MonitorExit::Inactive), "{exits:?}");
    assert!(!h.kv.keys().contains(&Keys::new(GUILD).lock()));
}

#[tokio::test(start_paused = true)]
async fn restart_while_the_monitor_winds_down_keeps_a_monitor() {
    // Each spin count lands the restart at a different point of the old
    // monitor's last tick.
    for spins in 0..8 {
        let (h, _store) = Harness::flaky(true);
        h.raffle.start(GUILD, Harness::origin(), None).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.raffle.finish(GUILD).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        for _ in 0..spins {
            tokio::task::yield_now().await;
        }
        h.raffle.start(GUILD, Harness::origin(), Some(1)).await;

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(
            h.raffle.snapshot(GUILD).await.unwrap().status,
            Some(Status::Closed),
            "timed close missed with {spins} spins"
        );
        h.raffle.finish(GUILD).await;
    }
}

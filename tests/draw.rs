mod common;

use std::collections::HashSet;

use common::{Harness, CHANNEL, GUILD, MANAGER};
use raffle_bot::kv::Transaction;
use raffle_bot::raffle::{Keys, Snapshot, Status};

fn assert_disjoint(snap: &Snapshot) {
    let mut seen = HashSet::new();
    let drawn = snap
        .entries
        .iter()
        .chain(&snap.pending)
        .chain(snap.confirmed.keys())
        .chain(snap.issues.keys());
    for user in drawn {
        assert!(seen.insert(*user), "user {user} is in more than one group");
    }
}

#[tokio::test]
async fn single_entry_single_winner() {
    let h = Harness::with_entries([42]).await;
    assert_eq!(h.raffle.draw(GUILD, &[1]).await, "Drew 1 winner(s).");

    let snap = h.raffle.snapshot(GUILD).await.unwrap();
    assert_eq!(snap.pending, HashSet::from([42]));
    assert!(snap.entries.is_empty());
    assert_eq!(snap.status, Some(Status::Closed), "drawing closes an open raffle");
    assert!(h.messenger.dms_to(42)[0].starts_with("Congratulations!"));
}

#[tokio::test]
async fn not_enough_entries_changes_nothing() {
    let h = Harness::with_entries(1..=3).await;
    let before = h.raffle.snapshot(GUILD).await.unwrap();

    let reply = h.raffle.draw(GUILD, &[2, 2]).await;
    assert_eq!(reply, "There are not enough entries to draw the specified configuration.");
    assert_eq!(h.raffle.snapshot(GUILD).await.unwrap(), before);
}

#[tokio::test]
async fn draw_needs_a_running_raffle() {
    let h = Harness::new();
    assert!(h.raffle.draw(GUILD, &[1]).await.starts_with("There is no raffle running."));
}

#[tokio::test]
async fn winners_get_deadlines_and_teams_are_announced() {
    let h = Harness::with_entries(1..=10).await;
    h.raffle.close(GUILD).await;
    h.messenger.clear();

    h.raffle.draw(GUILD, &[3, 3]).await;
    let snap = h.raffle.snapshot(GUILD).await.unwrap();
    assert_eq!(snap.pending.len(), 6);
    assert_eq!(snap.entries.len(), 4);
    assert_disjoint(&snap);

    let k = Keys::new(GUILD);
    let mut tx = Transaction::new();
    for user in &snap.pending {
        tx = tx.ttl(k.deadline(*user));
    }
    let r = tx.exec(h.kv.as_ref()).await.unwrap();
    for i in 0..snap.pending.len() {
        assert_eq!(r.int(i).unwrap(), 600);
    }

    let posts = h.messenger.channel_posts(CHANNEL);
    assert_eq!(posts.len(), 1, "already closed, so only the results are posted");
    assert!(posts[0].contains("Team 1") && posts[0].contains("Team 2"));
}

#[tokio::test]
async fn online_managers_get_a_tracked_card() {
    let h = Harness::with_entries(1..=2).await;
    h.raffle.add_managers(GUILD, &[MANAGER + 1]).await;
    h.messenger.set_online(MANAGER);
    h.messenger.clear();

    h.raffle.draw(GUILD, &[2]).await;

    let cards: Vec<String> = h
        .messenger
        .dms_to(MANAGER)
        .into_iter()
        .filter(|m| m.starts_with("**Entry Results**"))
        .collect();
    assert_eq!(cards.len(), 1);
    assert!(cards[0].contains("Pending: 2"));
    assert!(h.messenger.dms_to(MANAGER + 1).iter().all(|m| !m.starts_with("**Entry Results**")));

    let r = Transaction::new()
        .hgetall(Keys::new(GUILD).manager_messages())
        .exec(h.kv.as_ref())
        .await
        .unwrap();
    let tracked = r.map(0).unwrap();
    assert_eq!(tracked.len(), 1);
    assert!(tracked.contains_key(&MANAGER.to_string()));
}

#[tokio::test]
async fn repeated_draws_keep_groups_disjoint() {
    let h = Harness::with_entries(1..=8).await;
    h.raffle.draw(GUILD, &[2]).await;
    let first = h.raffle.snapshot(GUILD).await.unwrap();
    let some_winner = *first.pending.iter().next().unwrap();
    h.raffle.withdraw(GUILD, some_winner).await;

    h.raffle.draw(GUILD, &[3]).await;
    let snap = h.raffle.snapshot(GUILD).await.unwrap();
    assert_eq!(snap.pending.len(), 4);
    assert_eq!(snap.entries.len(), 3);
    assert_disjoint(&snap);
}

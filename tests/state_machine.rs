mod common;

use common::{Harness, CHANNEL, GUILD, MANAGER};
use raffle_bot::kv::Transaction;
use raffle_bot::raffle::{Keys, Status};

#[tokio::test]
async fn first_start_creates_default_settings() {
    let h = Harness::new();
    let reply = h.raffle.start(GUILD, Harness::origin(), None).await;
    assert_eq!(reply, "The raffle has started.");

    let settings = h.settings().await.unwrap();
    assert_eq!(settings.channels, vec![CHANNEL]);
    assert_eq!(settings.managers, vec![MANAGER]);

    let snap = h.raffle.snapshot(GUILD).await.unwrap();
    assert_eq!(snap.status, Some(Status::InProgress));
    assert_eq!(snap.timeout_ttl, -1, "no duration means no expiry");
    assert!(h.messenger.channel_posts(CHANNEL)[0].contains("has started"));
    assert_eq!(h.messenger.dms_to(MANAGER), vec!["A raffle you manage has started!".to_string()]);
}

#[tokio::test]
async fn start_with_duration_arms_the_close_timer() {
    let h = Harness::new();
    h.raffle.start(GUILD, Harness::origin(), Some(5)).await;

    let k = Keys::new(GUILD);
    let r = Transaction::new().ttl(k.timeout()).get(k.next()).exec(h.kv.as_ref()).await.unwrap();
    assert_eq!(r.int(0).unwrap(), 300);
    assert_eq!(r.text(1).unwrap().as_deref(), Some("Closed"));
}

#[tokio::test]
async fn start_rejects_settings_without_managers() {
    let h = Harness::new();
    h.raffle.add_channel(GUILD, Some(CHANNEL)).await;

    let reply = h.raffle.start(GUILD, Harness::origin(), None).await;
    assert!(reply.contains("at least one manager"), "{reply}");
    assert_eq!(h.raffle.snapshot(GUILD).await.unwrap().status, None);
}

#[tokio::test]
async fn transition_rejections() {
    let h = Harness::new();
    assert_eq!(h.raffle.close(GUILD).await, "A raffle that has not started, cannot be closed.");
    assert_eq!(h.raffle.finish(GUILD).await, "The raffle is already finished.");
    assert_eq!(h.raffle.open(GUILD, None).await, "Only closed raffles can be opened.");

    h.raffle.start(GUILD, Harness::origin(), None).await;
    assert_eq!(h.raffle.start(GUILD, Harness::origin(), None).await, "The raffle is already in progress.");
    assert_eq!(h.raffle.open(GUILD, None).await, "The raffle is already open.");

    h.raffle.close(GUILD).await;
    assert_eq!(h.raffle.close(GUILD).await, "The raffle is already closed.");
    assert!(h.raffle.start(GUILD, Harness::origin(), None).await.contains("`/raffle_open`"));

    Transaction::new()
        .set(Keys::new(GUILD).state(), "Finished")
        .exec(h.kv.as_ref())
        .await
        .unwrap();
    assert!(h.raffle.open(GUILD, None).await.starts_with("The raffle has finished."));
    assert_eq!(h.raffle.close(GUILD).await, "A raffle that is not running, cannot be closed.");
}

#[tokio::test]
async fn close_then_open_round_trip() {
    let h = Harness::started().await;
    Transaction::new()
        .set_ex(Keys::new(GUILD).timeout(), "True", 60)
        .exec(h.kv.as_ref())
        .await
        .unwrap();

    assert_eq!(h.raffle.close(GUILD).await, "The raffle has been closed.");
    let snap = h.raffle.snapshot(GUILD).await.unwrap();
    assert_eq!(snap.status, Some(Status::Closed));
    assert_eq!(snap.timeout_ttl, -2, "closing clears the timer");

    assert_eq!(h.raffle.open(GUILD, Some(2)).await, "The raffle is open again.");
    let snap = h.raffle.snapshot(GUILD).await.unwrap();
    assert_eq!(snap.status, Some(Status::InProgress));
    assert_eq!(snap.timeout_ttl, 120);
}

#[tokio::test]
async fn enter_depends_on_status() {
    let h = Harness::new();
    assert_eq!(h.raffle.enter(GUILD, 1).await, "There is no raffle running right now.");

    h.raffle.start(GUILD, Harness::origin(), None).await;
    assert_eq!(h.raffle.enter(GUILD, 1).await, "You have entered the raffle. Good luck!");
    assert_eq!(h.raffle.enter(GUILD, 1).await, "You have already entered the raffle <@1>");
    assert!(h.messenger.channel_posts(CHANNEL).contains(&"<@1> has entered".to_string()));

    h.raffle.close(GUILD).await;
    assert_eq!(h.raffle.enter(GUILD, 2).await, "The raffle is not accepting entries at this time <@2>");
    let snap = h.raffle.snapshot(GUILD).await.unwrap();
    assert_eq!(snap.entries.len(), 1);
}

#[tokio::test]
async fn finish_clears_every_run_time_key() {
    let h = Harness::with_entries(1..=4).await;
    h.messenger.set_online(MANAGER);
    h.raffle.draw(GUILD, &[2]).await;
    let winner = *h.raffle.snapshot(GUILD).await.unwrap().pending.iter().next().unwrap();
    h.raffle.confirm(GUILD, winner, "Zen#1234").await;
    h.raffle.info(GUILD, CHANNEL).await;
    assert!(!h.kv.keys().is_empty());

    assert_eq!(h.raffle.finish(GUILD).await, "The raffle has finished.");
    assert_eq!(h.kv.keys(), Vec::<String>::new());
    assert_eq!(h.raffle.info(GUILD, CHANNEL).await, "There's no raffle running at this moment.");
    assert_eq!(h.raffle.finish(GUILD).await, "The raffle is already finished.");

    // A finished raffle can start over with the stored settings.
    assert_eq!(h.raffle.start(GUILD, Harness::origin(), None).await, "The raffle has started.");
}

#[tokio::test]
async fn missing_settings_gives_the_generic_error() {
    let h = Harness::new();
    Transaction::new()
        .set(Keys::new(GUILD).state(), "In progress")
        .exec(h.kv.as_ref())
        .await
        .unwrap();

    assert_eq!(h.raffle.close(GUILD).await, "Something went wrong, please try again.");
    assert_eq!(h.raffle.enter(GUILD, 1).await, "Something went wrong, please try again.");
    assert!(h.raffle.snapshot(GUILD).await.unwrap().entries.is_empty());
}

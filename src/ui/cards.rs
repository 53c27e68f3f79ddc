//! Plain-text bodies for the messages the raffle posts and keeps editing.

use crate::raffle::Status;
use crate::utils::{format_seconds, mention_user};

fn list_or_none(lines: &[String]) -> String {
    if lines.is_empty() {
        "None".to_string()
    } else {
        lines.join("\n")
    }
}

/// Card posted by the status command and refreshed by the monitor.
pub fn channel_card(status: Status, entries: i64, timeout_ttl: i64) -> String {
    let mut out = format!("**Raffle**\n❯ Status: {status}\n❯ Entries: {entries}");
    if status == Status::InProgress {
        out.push_str(&format!("\n❯ Time remaining: {}", format_seconds(timeout_ttl)));
    }
    out
}

/// Private card for managers. `confirmed` pairs a name with a battle tag,
/// `issues` a name with the reported problem.
pub fn manager_card(pending: &[String], confirmed: &[(String, String)], issues: &[(String, String)]) -> String {
    let confirmed_lines: Vec<String> = confirmed.iter().map(|(name, tag)| format!("{name}: {tag}")).collect();
    let issue_lines: Vec<String> = issues.iter().map(|(name, text)| format!("{name}: {text}")).collect();
    format!(
        "**Entry Results**\n❯ Pending: {}\n{}\n\n❯ Issues: {}\n{}\n\n❯ Confirmed: {}\n{}",
        pending.len(),
        list_or_none(pending),
        issues.len(),
        list_or_none(&issue_lines),
        confirmed.len(),
        list_or_none(&confirmed_lines),
    )
}

/// Winners split into consecutive teams of the requested sizes.
pub fn draw_results(winners: &[u64], groups: &[u32]) -> String {
    let mut out = String::from("Winners have been drawn from the raffle!\n");
    let mut rest = winners;
    for (i, size) in groups.iter().enumerate() {
        let take = (*size as usize).min(rest.len());
        if take == 0 {
            break;
        }
        let (team, tail) = rest.split_at(take);
        rest = tail;
        let names: Vec<String> = team.iter().map(|id| mention_user(*id)).collect();
        if groups.len() > 1 {
            out.push_str(&format!("\n❯ Team {}\n", i + 1));
        } else {
            out.push_str("\n❯ Winners\n");
        }
        out.push_str(&names.join("\n"));
        out.push('\n');
    }
    out.push_str("\nIf you are a winner please check your direct messages for further instructions.");
    out
}

pub fn winner_instructions(confirm_window_secs: u64) -> String {
    let minutes = (confirm_window_secs / 60).max(1);
    format!(
        "Congratulations!\nYou've been chosen as a winner for the raffle.\n\
         Please reply with one of the following commands:\n\n\
         `/confirm NickName#1234` - I want to play!\n\n\
         `/issue <message>` - Something is wrong, I need help.\n\n\
         `/withdraw` - I changed my mind, maybe next time.\n\n\
         Please reply in the next {minutes} minutes or you will withdraw automatically."
    )
}

pub fn entry_notice(user_id: u64) -> String {
    format!("{} has entered", mention_user(user_id))
}

pub fn issue_notice(name: &str, message: &str) -> String {
    format!("**Issue by {name}**\n{message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_card_has_no_timer() {
        let card = channel_card(Status::Closed, 4, 120);
        assert!(card.contains("Entries: 4"));
        assert!(!card.contains("Time remaining"));
        let card = channel_card(Status::InProgress, 4, -1);
        assert!(card.contains("Time remaining: Indefinite"));
    }

    #[test]
    fn draw_results_split_teams() {
        let text = draw_results(&[1, 2, 3, 4], &[2, 2]);
        let team_one = text.find("Team 1").unwrap();
        let team_two = text.find("Team 2").unwrap();
        assert!(team_one < text.find("<@2>").unwrap());
        assert!(text.find("<@3>").unwrap() > team_two);
    }

    #[test]
    fn empty_manager_card_says_none() {
        let card = manager_card(&[], &[], &[]);
        assert_eq!(card.matches("None").count(), 3);
    }
}

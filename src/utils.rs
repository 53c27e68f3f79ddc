use once_cell::sync::Lazy;
use regex::Regex;

// Positive integers only: no zero, no leading zeros, no decimals, no hex.
static GROUP_SIZE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[1-9]\d*$").expect("valid regex"));
static BATTLE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\D\w{2,11}#\d{4,5}$").expect("valid regex"));

pub const DEFAULT_GROUPS: [u32; 2] = [6, 6];

pub fn mention_user(id: u64) -> String {
    format!("<@{id}>")
}

/// Parses a team layout such as `3v3` or `12` into group sizes.
/// An empty argument means the default 6v6.
pub fn parse_groups(arg: Option<&str>) -> Option<Vec<u32>> {
    let Some(arg) = arg.map(str::trim).filter(|s| !s.is_empty()) else {
        return Some(DEFAULT_GROUPS.to_vec());
    };
    arg.split('v')
        .map(|part| {
            if !GROUP_SIZE.is_match(part) {
                return None;
            }
            part.trim_start_matches('+').parse::<u32>().ok()
        })
        .collect()
}

pub fn is_battle_tag(s: &str) -> bool {
    BATTLE_TAG.is_match(s)
}

/// `HH:MM:SS` for a positive number of seconds, `Indefinite` otherwise.
pub fn format_seconds(seconds: i64) -> String {
    if seconds <= 0 {
        return "Indefinite".to_string();
    }
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_parse_team_layouts() {
        assert_eq!(parse_groups(None), Some(vec![6, 6]));
        assert_eq!(parse_groups(Some("3v3")), Some(vec![3, 3]));
        assert_eq!(parse_groups(Some("12")), Some(vec![12]));
        assert_eq!(parse_groups(Some("+2v1")), Some(vec![2, 1]));
    }

    #[test]
    fn groups_reject_bad_sizes() {
        for bad in ["0", "3v0", "1.5", "0x10", "abc", "3vv3", "-2", "05"] {
            assert_eq!(parse_groups(Some(bad)), None, "{bad}");
        }
    }

    #[test]
    fn battle_tags() {
        assert!(is_battle_tag("NickName#12345"));
        assert!(is_battle_tag("Zen#1234"));
        assert!(!is_battle_tag("1Zen#1234"));
        assert!(!is_battle_tag("Zen1234"));
        assert!(!is_battle_tag("Zen#12"));
    }

    #[test]
    fn seconds_format_as_clock() {
        assert_eq!(format_seconds(-2), "Indefinite");
        assert_eq!(format_seconds(0), "Indefinite");
        assert_eq!(format_seconds(59), "00:00:59");
        assert_eq!(format_seconds(3 * 3600 + 25 * 60 + 7), "03:25:07");
    }
}

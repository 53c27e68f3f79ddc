use std::fmt;

/// Lifecycle of a guild's raffle. The string forms are what gets written to
/// the store and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Created,
    InProgress,
    Closed,
    Finished,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Created => "Created",
            Status::InProgress => "In progress",
            Status::Closed => "Closed",
            Status::Finished => "Finished",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "Created" => Some(Status::Created),
            "In progress" => Some(Status::InProgress),
            "Closed" => Some(Status::Closed),
            "Finished" => Some(Status::Finished),
            _ => None,
        }
    }

    /// A missing key means no raffle, which behaves like `Created`.
    pub fn from_store(value: Option<&str>) -> Status {
        match value {
            None => Status::Created,
            Some(s) => Status::parse(s).unwrap_or_else(|| {
                tracing::warn!(value = s, "unknown raffle status in store, treating as created");
                Status::Created
            }),
        }
    }

    /// Entries, draws and winner replies are only handled in these states.
    pub fn is_active(self) -> bool {
        matches!(self, Status::InProgress | Status::Closed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_strings_round_trip() {
        for s in [Status::Created, Status::InProgress, Status::Closed, Status::Finished] {
            assert_eq!(Status::parse(s.as_str()), Some(s));
        }
        assert_eq!(Status::from_store(None), Status::Created);
        assert_eq!(Status::from_store(Some("bogus")), Status::Created);
    }
}

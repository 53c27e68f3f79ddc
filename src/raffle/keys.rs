//! Store key layout, `Raffle:{guild}:{field}`. Shared with other tooling, so
//! the names are fixed.

#[derive(Debug, Clone, Copy)]
pub struct Keys {
    guild: u64,
}

impl Keys {
    pub fn new(guild: u64) -> Self {
        Self { guild }
    }

    fn field(&self, name: &str) -> String {
        format!("Raffle:{}:{}", self.guild, name)
    }

    pub fn state(&self) -> String {
        self.field("state")
    }

    pub fn entries(&self) -> String {
        self.field("entries")
    }

    pub fn pending(&self) -> String {
        self.field("pending")
    }

    pub fn confirmed(&self) -> String {
        self.field("confirmed")
    }

    pub fn issues(&self) -> String {
        self.field("issues")
    }

    pub fn timeout(&self) -> String {
        self.field("timeout")
    }

    pub fn next(&self) -> String {
        self.field("next")
    }

    pub fn channel_messages(&self) -> String {
        self.field("channel_messages")
    }

    pub fn manager_messages(&self) -> String {
        self.field("manager_messages")
    }

    pub fn lock(&self) -> String {
        self.field("lock")
    }

    pub fn deadline_prefix(&self) -> String {
        self.field("deadline:")
    }

    pub fn deadline(&self, user: u64) -> String {
        format!("{}{}", self.deadline_prefix(), user)
    }

    /// Everything `finish` wipes, apart from per-user deadlines.
    pub fn run_time(&self) -> [String; 9] {
        [
            self.state(),
            self.entries(),
            self.pending(),
            self.confirmed(),
            self.issues(),
            self.timeout(),
            self.next(),
            self.channel_messages(),
            self.manager_messages(),
        ]
    }
}

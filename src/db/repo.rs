use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::models::{ChannelAdd, ChannelRemoval, Guild, GuildRow, ManagerAdd, ManagerRemoval, RaffleSettings, SettingsRow};
use crate::db::SettingsStore;

#[derive(Clone)]
pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn settings_row(&self, guild_id: i64) -> anyhow::Result<Option<SettingsRow>> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT guild_id, channels, managers, updated_at
            FROM raffle_settings
            WHERE guild_id = $1
            "#,
        )
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await
        .context("select raffle_settings")?;
        Ok(row)
    }

    /// Guild row plus an empty settings row, both only if missing.
    async fn ensure_settings(&self, guild_id: i64) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO guilds (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(guild_id)
            .execute(&mut *tx)
            .await
            .context("insert guild")?;
        sqlx::query("INSERT INTO raffle_settings (guild_id) VALUES ($1) ON CONFLICT (guild_id) DO NOTHING")
            .bind(guild_id)
            .execute(&mut *tx)
            .await
            .context("insert raffle_settings")?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn fetch(&self, guild_id: u64) -> anyhow::Result<Option<Guild>> {
        let gid = guild_id as i64;
        let row = sqlx::query_as::<_, GuildRow>("SELECT id, created_at FROM guilds WHERE id = $1")
            .bind(gid)
            .fetch_optional(&self.pool)
            .await
            .context("select guild")?;
        let Some(row) = row else { return Ok(None) };
        let raffle = self.settings_row(gid).await?.map(RaffleSettings::from);
        Ok(Some(Guild { id: row.id as u64, created_at: row.created_at, raffle }))
    }

    async fn fetch_or_create(&self, guild_id: u64) -> anyhow::Result<Guild> {
        let gid = guild_id as i64;
        let row = sqlx::query_as::<_, GuildRow>(
            r#"
            INSERT INTO guilds (id) VALUES ($1)
            ON CONFLICT (id) DO UPDATE SET id = EXCLUDED.id
            RETURNING id, created_at
            "#,
        )
        .bind(gid)
        .fetch_one(&self.pool)
        .await
        .context("upsert guild")?;
        let raffle = self.settings_row(gid).await?.map(RaffleSettings::from);
        Ok(Guild { id: row.id as u64, created_at: row.created_at, raffle })
    }

    async fn set_raffle_settings(&self, guild_id: u64, settings: &RaffleSettings) -> anyhow::Result<()> {
        let gid = guild_id as i64;
        let channels: Vec<i64> = settings.channels.iter().map(|c| *c as i64).collect();
        let managers: Vec<i64> = settings.managers.iter().map(|m| *m as i64).collect();
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO guilds (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(gid)
            .execute(&mut *tx)
            .await
            .context("insert guild")?;
        sqlx::query(
            r#"
            INSERT INTO raffle_settings (guild_id, channels, managers)
            VALUES ($1, $2, $3)
            ON CONFLICT (guild_id)
            DO UPDATE SET channels = EXCLUDED.channels, managers = EXCLUDED.managers, updated_at = now()
            "#,
        )
        .bind(gid)
        .bind(&channels)
        .bind(&managers)
        .execute(&mut *tx)
        .await
        .context("upsert raffle_settings")?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_channel(&self, guild_id: u64, channel_id: u64) -> anyhow::Result<ChannelAdd> {
        let gid = guild_id as i64;
        self.ensure_settings(gid).await?;
        let updated = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE raffle_settings
            SET channels = array_append(channels, $2), updated_at = now()
            WHERE guild_id = $1 AND NOT ($2 = ANY(channels))
            RETURNING guild_id
            "#,
        )
        .bind(gid)
        .bind(channel_id as i64)
        .fetch_optional(&self.pool)
        .await
        .context("add raffle channel")?;
        Ok(if updated.is_some() { ChannelAdd::Added } else { ChannelAdd::AlreadyPresent })
    }

    async fn remove_channel(&self, guild_id: u64, channel_id: u64) -> anyhow::Result<ChannelRemoval> {
        let gid = guild_id as i64;
        let cid = channel_id as i64;
        // The size check lives in the WHERE clause so two concurrent removals
        // cannot both pass it.
        let updated = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE raffle_settings
            SET channels = array_remove(channels, $2), updated_at = now()
            WHERE guild_id = $1 AND $2 = ANY(channels) AND cardinality(channels) > 1
            RETURNING guild_id
            "#,
        )
        .bind(gid)
        .bind(cid)
        .fetch_optional(&self.pool)
        .await
        .context("remove raffle channel")?;
        if updated.is_some() {
            return Ok(ChannelRemoval::Removed);
        }
        let present = self
            .settings_row(gid)
            .await?
            .map_or(false, |row| row.channels.contains(&cid));
        Ok(if present { ChannelRemoval::LastChannel } else { ChannelRemoval::NotPresent })
    }

    async fn add_managers(&self, guild_id: u64, users: &[u64]) -> anyhow::Result<Vec<ManagerAdd>> {
        let gid = guild_id as i64;
        self.ensure_settings(gid).await?;
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(users.len());
        for &user in users {
            let updated = sqlx::query_scalar::<_, i64>(
                r#"
                UPDATE raffle_settings
                SET managers = array_append(managers, $2), updated_at = now()
                WHERE guild_id = $1 AND NOT ($2 = ANY(managers))
                RETURNING guild_id
                "#,
            )
            .bind(gid)
            .bind(user as i64)
            .fetch_optional(&mut *tx)
            .await
            .context("add raffle manager")?;
            out.push(if updated.is_some() {
                ManagerAdd::Added(user)
            } else {
                ManagerAdd::AlreadyManaging(user)
            });
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn remove_managers(&self, guild_id: u64, users: &[u64]) -> anyhow::Result<Vec<ManagerRemoval>> {
        let gid = guild_id as i64;
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(users.len());
        for &user in users {
            let updated = sqlx::query_scalar::<_, i64>(
                r#"
                UPDATE raffle_settings
                SET managers = array_remove(managers, $2), updated_at = now()
                WHERE guild_id = $1 AND $2 = ANY(managers)
                RETURNING guild_id
                "#,
            )
            .bind(gid)
            .bind(user as i64)
            .fetch_optional(&mut *tx)
            .await
            .context("remove raffle manager")?;
            out.push(if updated.is_some() {
                ManagerRemoval::Removed(user)
            } else {
                ManagerRemoval::NotManaging(user)
            });
        }
        tx.commit().await?;
        Ok(out)
    }
}

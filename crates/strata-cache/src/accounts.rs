//! User account upkeep that spans both stores.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::future::try_join_all;
use serde_json::{Map, Value};
use strata_types::EntityType;

use crate::adapter::DurableStore;
use crate::entity_cache::EntityCache;
use crate::error::CacheResult;

/// Field holding the password expiry date of a user record.
pub const PASSWORD_EXPIRY_FIELD: &str = "PWD_EXP_FIELD";

/// Password lifetime when none of the user's profiles sets `EXPIRATION`.
const DEFAULT_PASSWORD_LIFETIME_DAYS: i64 = 30;

/// Account operations.
#[derive(Clone)]
pub struct Accounts {
    entities: EntityCache,
    store: Arc<dyn DurableStore>,
}

impl Accounts {
    /// Create account operations over the entity cache and durable store.
    pub const fn new(entities: EntityCache, store: Arc<dyn DurableStore>) -> Self {
        Self { entities, store }
    }

    /// Recompute and store a user's password expiry date.
    ///
    /// The expiry is the earliest `EXPIRATION` of the user's profiles,
    /// capped at 30 days from now. The user record is read from the durable
    /// store directly; profiles go through the entity cache.
    ///
    /// Returns `false` if the user does not exist or the update matched no
    /// record.
    ///
    /// # Errors
    ///
    /// Propagates durable store and cache failures.
    pub async fn update_password_expiry(
        &self,
        customer: &str,
        user_id: &str,
        entity_type: EntityType,
    ) -> CacheResult<bool> {
        let user = self
            .store
            .entity(customer, user_id, entity_type)
            .await
            .inspect_err(|e| {
                tracing::error!(customer, user_id, error = %e, "User lookup failed");
            })?;
        let Some(user) = user else {
            tracing::warn!(customer, user_id, "Password expiry update for unknown user");
            return Ok(false);
        };

        let profile_ids = user.profile_ids();
        let profiles = try_join_all(
            profile_ids
                .iter()
                .map(|id| self.entities.get(customer, id, EntityType::PROFILE)),
        )
        .await?;

        let default_expiry = Utc::now()
            .checked_add_signed(Duration::days(DEFAULT_PASSWORD_LIFETIME_DAYS))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let expiry = profiles
            .iter()
            .flatten()
            .filter_map(|p| p.field("EXPIRATION").and_then(Value::as_str))
            .filter_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .fold(default_expiry, Ord::min);

        let mut fields = Map::new();
        fields.insert(
            PASSWORD_EXPIRY_FIELD.to_owned(),
            Value::String(expiry.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        let updated = self
            .store
            .update_entity(customer, user_id, entity_type, fields)
            .await
            .inspect_err(|e| tracing::error!(customer, user_id, error = %e, "Password expiry update failed"))?;
        Ok(updated.is_some())
    }
}

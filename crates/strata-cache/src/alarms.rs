//! Alarm clocks and last alarm conditions.
//!
//! Evaluation, execution and last-alarm times are bare epoch integers kept
//! with the same monotonic write path as other ordered values, so an agent
//! that reports late can never move a clock backwards. The last condition
//! result is a full `{t, r, v}` record and is monotonic on `t`.

use std::time::Duration;

use chrono::Utc;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_types::{AlarmCondition, EntityType, WriteOutcome};

use crate::adapter::ensure_ready;
use crate::error::{CacheError, CacheResult};
use crate::keys::{self, AlarmClock};
use crate::ordered::OrderedStore;

/// Window for [`OrderedStore::alarms_info`] callers without one of their own.
pub const DEFAULT_ALARM_WINDOW: Duration = Duration::from_secs(3600);

/// A recent alarm condition joined with the entity it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmInfo {
    /// Entity location, if any.
    #[serde(rename = "GEO_LOCATION", default, skip_serializing_if = "Option::is_none")]
    pub geo_location: Option<Value>,
    /// Entity id.
    #[serde(rename = "ID")]
    pub id: String,
    /// Entity type.
    #[serde(rename = "TYPE", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    /// Whether the condition triggered.
    #[serde(rename = "TRIGGERED")]
    pub triggered: bool,
    /// Observed value.
    #[serde(rename = "VALUE")]
    pub value: Value,
}

impl OrderedStore {
    /// Monotonically record the last evaluation of an alarm on an entity.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::set_value`].
    pub async fn set_alarm_eval_time(
        &self,
        customer: &str,
        be_id: &str,
        agent_id: &str,
        alarm_id: &str,
        time: i64,
    ) -> CacheResult<WriteOutcome<i64>> {
        let key = keys::alarm_time(AlarmClock::Evaluation, customer, Some(be_id), agent_id, alarm_id);
        self.set_value(&key, &time).await
    }

    /// Last evaluation time of an alarm on an entity.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::get_value`].
    pub async fn get_alarm_eval_time(
        &self,
        customer: &str,
        be_id: &str,
        agent_id: &str,
        alarm_id: &str,
    ) -> CacheResult<Option<i64>> {
        let key = keys::alarm_time(AlarmClock::Evaluation, customer, Some(be_id), agent_id, alarm_id);
        self.get_value(&key).await
    }

    /// Monotonically record the last execution of an alarm on an entity.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::set_value`].
    pub async fn set_alarm_exec_time(
        &self,
        customer: &str,
        be_id: &str,
        agent_id: &str,
        alarm_id: &str,
        time: i64,
    ) -> CacheResult<WriteOutcome<i64>> {
        let key = keys::alarm_time(AlarmClock::Execution, customer, Some(be_id), agent_id, alarm_id);
        self.set_value(&key, &time).await
    }

    /// Last execution time of an alarm on an entity.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::get_value`].
    pub async fn get_alarm_exec_time(
        &self,
        customer: &str,
        be_id: &str,
        agent_id: &str,
        alarm_id: &str,
    ) -> CacheResult<Option<i64>> {
        let key = keys::alarm_time(AlarmClock::Execution, customer, Some(be_id), agent_id, alarm_id);
        self.get_value(&key).await
    }

    /// Record the last time an alarm fired. Not scoped to an entity.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::set_value`].
    pub async fn set_last_alarm_time(
        &self,
        customer: &str,
        agent_id: &str,
        alarm_id: &str,
        time: i64,
    ) -> CacheResult<WriteOutcome<i64>> {
        let key = keys::alarm_time(AlarmClock::LastAlarm, customer, None, agent_id, alarm_id);
        self.set_value(&key, &time).await
    }

    /// Last time an alarm fired.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::get_value`].
    pub async fn get_last_alarm_time(
        &self,
        customer: &str,
        agent_id: &str,
        alarm_id: &str,
    ) -> CacheResult<Option<i64>> {
        let key = keys::alarm_time(AlarmClock::LastAlarm, customer, None, agent_id, alarm_id);
        self.get_value(&key).await
    }

    /// Store the result of the last executed alarm condition.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::set_value`].
    pub async fn set_last_condition(
        &self,
        customer: &str,
        be_id: &str,
        agent_id: &str,
        alarm_id: &str,
        condition: &AlarmCondition,
    ) -> CacheResult<WriteOutcome<AlarmCondition>> {
        let key = keys::alarm_condition(customer, be_id, agent_id, alarm_id);
        self.set_value(&key, condition).await
    }

    /// Result of the last executed alarm condition.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::get_value`].
    pub async fn get_last_condition(
        &self,
        customer: &str,
        be_id: &str,
        agent_id: &str,
        alarm_id: &str,
    ) -> CacheResult<Option<AlarmCondition>> {
        let key = keys::alarm_condition(customer, be_id, agent_id, alarm_id);
        self.get_value(&key).await
    }

    /// Alarm conditions of a customer evaluated within `window` of now.
    ///
    /// Conditions whose entity no longer exists, or whose stored value is
    /// unreadable, are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn alarms_info(&self, customer: &str, window: Duration) -> CacheResult<Vec<AlarmInfo>> {
        let pattern = keys::alarm_condition_pattern(customer);
        ensure_ready(self.cache.as_ref(), "scan", &pattern)?;
        let found = self
            .cache
            .keys_matching(&pattern)
            .await
            .inspect_err(|e| tracing::error!(pattern, error = %e, "Key scan failed"))?;

        let now = Utc::now().timestamp_millis();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);

        let alarms = try_join_all(found.iter().map(|key| async move {
            let Some(be_id) = keys::second_segment(key) else {
                return Ok(None);
            };
            let condition = match self.get_value::<AlarmCondition>(key).await {
                Ok(Some(condition)) => condition,
                Ok(None) | Err(CacheError::Serialization(_)) => return Ok(None),
                Err(e) => return Err(e),
            };
            if now.saturating_sub(condition.t) > window_ms {
                return Ok(None);
            }
            let Some(entity) = self.entities.get_by_be_id(be_id).await? else {
                tracing::debug!(key, be_id, "Alarm condition without entity");
                return Ok(None);
            };
            Ok::<_, CacheError>(Some(AlarmInfo {
                geo_location: entity.geo_location().cloned(),
                id: entity.id,
                entity_type: entity.entity_type,
                triggered: condition.r,
                value: condition.v,
            }))
        }))
        .await?;
        Ok(alarms.into_iter().flatten().collect())
    }
}

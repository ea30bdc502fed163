//! Relationship resolution over adjacency-list records.
//!
//! Relations are stored as ordinary entities of type
//! [`EntityType::RELATIONSHIP`] whose `CHILD` attribute lists `{ID, TYPE}`
//! references. Their ids are derived from a beID and a [`RelationKind`]
//! (`AGENT.{beID}`), or from an email, tag or solution code. Every record is
//! read through the [`EntityCache`], so relations benefit from the same
//! reload protocol and tombstones as any other entity.
//!
//! A missing relationship record means "no relations" and yields an empty
//! list.

use std::collections::{BTreeMap, HashSet};

use futures::future::try_join_all;
use strata_types::{Entity, EntityRef, EntityType};

use crate::catalog::KeyCatalog;
use crate::entity_cache::EntityCache;
use crate::error::CacheResult;
use crate::keys::{self, NON_RELATION_MARKERS, RelationKind};

/// Relation counts: relation name -> entity type -> number of entities.
pub type RelationSummary = BTreeMap<String, BTreeMap<EntityType, usize>>;

/// Resolves relationship records into entity references and entities.
#[derive(Clone)]
pub struct RelationResolver {
    entities: EntityCache,
    catalog: KeyCatalog,
}

impl RelationResolver {
    /// Create a resolver reading relationship records through `entities`.
    pub const fn new(entities: EntityCache, catalog: KeyCatalog) -> Self {
        Self { entities, catalog }
    }

    /// The relationship record `relation_id`, if it exists.
    async fn record(&self, customer: &str, relation_id: &str) -> CacheResult<Option<Entity>> {
        self.entities
            .get(customer, relation_id, EntityType::RELATIONSHIP)
            .await
            .inspect_err(|e| {
                tracing::error!(customer, relation_id, error = %e, "Relationship lookup failed");
            })
    }

    /// Child references of the relationship record `relation_id`.
    async fn children(&self, customer: &str, relation_id: &str) -> CacheResult<Vec<EntityRef>> {
        Ok(self
            .record(customer, relation_id)
            .await?
            .map(|record| record.children())
            .unwrap_or_default())
    }

    /// Children of a relationship record resolved to full entities.
    ///
    /// References to entities that no longer exist are dropped.
    async fn child_entities(&self, customer: &str, relation_id: &str) -> CacheResult<Vec<Entity>> {
        let refs = self.children(customer, relation_id).await?;
        let resolved = try_join_all(
            refs.iter()
                .map(|r| self.entities.get(customer, &r.id, r.entity_type)),
        )
        .await
        .inspect_err(|e| {
            tracing::error!(customer, relation_id, error = %e, "Related entity lookup failed");
        })?;
        Ok(resolved.into_iter().flatten().collect())
    }

    /// Agents monitoring the entity behind a beID.
    ///
    /// # Errors
    ///
    /// Propagates entity lookup failures.
    pub async fn agents_by_be_id(&self, customer: &str, be_id: &str) -> CacheResult<Vec<Entity>> {
        self.child_entities(customer, &keys::relation_id(RelationKind::Agent, be_id))
            .await
    }

    /// Value-association children of the entity behind a beID.
    ///
    /// # Errors
    ///
    /// Propagates entity lookup failures.
    pub async fn value_association_children_by_be_id(
        &self,
        customer: &str,
        be_id: &str,
    ) -> CacheResult<Vec<Entity>> {
        self.child_entities(customer, &keys::relation_id(RelationKind::Child, be_id))
            .await
    }

    /// Agents monitoring an entity; empty if the entity does not exist.
    ///
    /// # Errors
    ///
    /// Propagates entity lookup failures.
    pub async fn all_agents_for_entity(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<Vec<Entity>> {
        match self.entities.be_id_of(customer, id, entity_type).await? {
            Some(be_id) => self.agents_by_be_id(customer, &be_id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Union of every relation kind of a beID, deduplicated by `(ID, TYPE)`.
    ///
    /// # Errors
    ///
    /// Propagates entity lookup failures.
    pub async fn immediate_related_by_be_id(
        &self,
        customer: &str,
        be_id: &str,
    ) -> CacheResult<Vec<EntityRef>> {
        let ids = keys::all_relation_ids(be_id);
        let lists = try_join_all(ids.iter().map(|id| self.children(customer, id))).await?;
        Ok(dedup(lists.into_iter().flatten(), None))
    }

    /// Immediate relations of an entity; `None` if the entity does not exist.
    ///
    /// # Errors
    ///
    /// Propagates entity lookup failures.
    pub async fn immediate_related(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<Option<Vec<EntityRef>>> {
        match self.entities.be_id_of(customer, id, entity_type).await? {
            Some(be_id) => self
                .immediate_related_by_be_id(customer, &be_id)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Immediate relations plus the immediate relations of each of them,
    /// deduplicated, without the entity itself. `None` if the entity does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Propagates entity lookup failures.
    pub async fn all_related(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<Option<Vec<EntityRef>>> {
        let Some(first_hop) = self.immediate_related(customer, id, entity_type).await? else {
            return Ok(None);
        };

        let second_hop = try_join_all(first_hop.iter().map(|r| async move {
            match self.entities.be_id_of(customer, &r.id, r.entity_type).await? {
                Some(be_id) => self.immediate_related_by_be_id(customer, &be_id).await,
                None => Ok(Vec::new()),
            }
        }))
        .await?;

        let origin = EntityRef::new(id, entity_type);
        Ok(Some(dedup(
            first_hop.into_iter().chain(second_hop.into_iter().flatten()),
            Some(&origin),
        )))
    }

    /// Entities carrying an ISA tag.
    ///
    /// # Errors
    ///
    /// Propagates entity lookup failures.
    pub async fn all_for_isa_tag(&self, customer: &str, tag: &str) -> CacheResult<Vec<EntityRef>> {
        self.children(customer, &keys::isa_tag_id(tag)).await
    }

    /// Entities carrying a custom tag.
    ///
    /// # Errors
    ///
    /// Propagates entity lookup failures.
    pub async fn all_for_custom_tag(&self, customer: &str, tag: &str) -> CacheResult<Vec<EntityRef>> {
        self.children(customer, &keys::custom_tag_id(tag)).await
    }

    /// Whether `email` is registered and linked to `user_id`.
    ///
    /// # Errors
    ///
    /// Propagates entity lookup failures.
    pub async fn exist_email(&self, user_id: &str, customer: &str, email: &str) -> CacheResult<bool> {
        Ok(self
            .children(customer, &keys::email_id(email))
            .await?
            .iter()
            .any(|r| r.id == user_id))
    }

    /// Whether `email` is registered for any user.
    ///
    /// # Errors
    ///
    /// Propagates entity lookup failures.
    pub async fn exist_email_key(&self, customer: &str, email: &str) -> CacheResult<bool> {
        Ok(self
            .record(customer, &keys::email_id(email))
            .await?
            .is_some())
    }

    /// Codes of every solution of a customer.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`](crate::CacheError::Unavailable) if
    /// the cache is not ready.
    pub async fn solutions_codes(&self, customer: &str) -> CacheResult<Vec<String>> {
        let ids = self
            .catalog
            .keys_with_prefix(customer, &keys::solution_code_id(""), EntityType::RELATIONSHIP)
            .await?;
        Ok(ids
            .iter()
            .filter_map(|id| id.rsplit('.').next())
            .map(str::to_owned)
            .collect())
    }

    /// Number of entities per relation kind and entity type.
    ///
    /// Email, tag, solution, value and profile records are not entity
    /// relations and are left out. Relations whose record is absent, or whose
    /// entity no longer exists, are not counted.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`](crate::CacheError::Unavailable) if
    /// the cache is not ready.
    pub async fn relation_summary(&self, customer: &str) -> CacheResult<RelationSummary> {
        let ids = self
            .catalog
            .keys_with_prefix(customer, "", EntityType::RELATIONSHIP)
            .await?;
        let relations: Vec<(&str, &str, &str)> = ids
            .iter()
            .filter(|id| {
                let dotted = format!(".{id}.");
                !NON_RELATION_MARKERS.iter().any(|m| dotted.contains(m))
            })
            .filter_map(|id| {
                let mut parts = id.rsplit('.');
                let be_id = parts.next()?;
                let kind = parts.next()?;
                Some((id.as_str(), kind, be_id))
            })
            .collect();

        let typed = try_join_all(relations.iter().map(|&(id, kind, be_id)| async move {
            if self.record(customer, id).await?.is_none() {
                return Ok(None);
            }
            let entity = self.entities.get_by_be_id(be_id).await.inspect_err(|e| {
                tracing::error!(customer, be_id, error = %e, "Related entity lookup failed");
            })?;
            let name = RelationKind::parse(kind)
                .map_or_else(|| kind.to_owned(), |k| k.summary_name().to_owned());
            Ok::<_, crate::CacheError>(entity.and_then(|e| e.entity_type).map(|t| (name, t)))
        }))
        .await?;

        let mut summary = RelationSummary::new();
        for (name, entity_type) in typed.into_iter().flatten() {
            let count = summary
                .entry(name)
                .or_default()
                .entry(entity_type)
                .or_default();
            *count = count.saturating_add(1);
        }
        Ok(summary)
    }
}

/// Keep the first occurrence of each reference, dropping `exclude`.
fn dedup(refs: impl Iterator<Item = EntityRef>, exclude: Option<&EntityRef>) -> Vec<EntityRef> {
    let mut seen = HashSet::new();
    refs.filter(|r| exclude != Some(r) && seen.insert(r.clone()))
        .collect()
}

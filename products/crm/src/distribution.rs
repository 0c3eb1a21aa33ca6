//! Owner selection for new and re-converted leads.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use entity::user::{self, CnpjRule};
use platform_api::{ApiError, ApiResult};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter,
};
use tracing::instrument;
use uuid::Uuid;

/// Lives band and legal-entity requirement an owner accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DistributionRule {
    pub min_lives: i32,
    pub max_lives: i32,
    pub cnpj_rule: CnpjRule,
}

impl DistributionRule {
    /// Present only when the user has every rule column filled in.
    pub fn from_user(user: &user::Model) -> Option<Self> {
        Some(Self {
            min_lives: user.min_lives?,
            max_lives: user.max_lives?,
            cnpj_rule: user.cnpj_rule?,
        })
    }

    pub fn accepts(&self, lives_count: i32, has_legal_entity: bool) -> bool {
        (self.min_lives..=self.max_lives).contains(&lives_count)
            && cnpj_matches(self.cnpj_rule, has_legal_entity)
    }
}

pub fn cnpj_matches(rule: CnpjRule, has_legal_entity: bool) -> bool {
    match rule {
        CnpjRule::Required => has_legal_entity,
        CnpjRule::Forbidden => !has_legal_entity,
        CnpjRule::Both => true,
    }
}

pub fn is_eligible(user: &user::Model, lives_count: i32, has_legal_entity: bool) -> bool {
    user.is_active
        && user.distribution_active
        && DistributionRule::from_user(user)
            .is_some_and(|rule| rule.accepts(lives_count, has_legal_entity))
}

/// Picks the next owner for a lead profile, or `None` when nobody qualifies.
///
/// Picking has no side effects. The caller records the assignment with
/// [`mark_assigned`] in the same transaction that stores the lead.
#[async_trait]
pub trait CandidateFinder: Send + Sync {
    async fn find_next_responsible(
        &self,
        lives_count: i32,
        has_legal_entity: bool,
    ) -> ApiResult<Option<Uuid>>;
}

/// Rotates through eligible owners: never-assigned first, then the one
/// assigned longest ago, ties broken by id.
#[derive(Clone)]
pub struct LeastRecentlyAssigned {
    db: Arc<DatabaseConnection>,
}

impl LeastRecentlyAssigned {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CandidateFinder for LeastRecentlyAssigned {
    #[instrument(name = "crm.distribution.find_next", skip(self))]
    async fn find_next_responsible(
        &self,
        lives_count: i32,
        has_legal_entity: bool,
    ) -> ApiResult<Option<Uuid>> {
        let candidates = user::Entity::find()
            .filter(
                Condition::all()
                    .add(user::Column::IsActive.eq(true))
                    .add(user::Column::DistributionActive.eq(true))
                    .add(user::Column::MinLives.lte(lives_count))
                    .add(user::Column::MaxLives.gte(lives_count)),
            )
            .all(self.db.as_ref())
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|u| is_eligible(u, lives_count, has_legal_entity))
            .min_by(|a, b| {
                a.last_assigned_at
                    .cmp(&b.last_assigned_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|chosen| chosen.id))
    }
}

/// Moves `owner_id` to the back of the rotation.
pub async fn mark_assigned<C: ConnectionTrait>(conn: &C, owner_id: Uuid) -> ApiResult<()> {
    let now: DateTimeWithTimeZone = Utc::now().into();
    user::Entity::update_many()
        .set(user::ActiveModel {
            last_assigned_at: Set(Some(now)),
            ..Default::default()
        })
        .filter(user::Column::Id.eq(owner_id))
        .exec(conn)
        .await?;
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerResolution {
    /// The existing primary owner still qualifies.
    Retained(Uuid),
    /// A fresh search picked this owner.
    Assigned(Uuid),
    Unassigned,
}

impl OwnerResolution {
    pub fn owner_id(&self) -> Option<Uuid> {
        match self {
            OwnerResolution::Retained(id) | OwnerResolution::Assigned(id) => Some(*id),
            OwnerResolution::Unassigned => None,
        }
    }

    pub fn is_reassignment(&self) -> bool {
        matches!(self, OwnerResolution::Assigned(_))
    }
}

#[derive(Clone)]
pub struct Distributor {
    db: Arc<DatabaseConnection>,
    finder: Arc<dyn CandidateFinder>,
}

impl Distributor {
    pub fn new(db: Arc<DatabaseConnection>, finder: Arc<dyn CandidateFinder>) -> Self {
        Self { db, finder }
    }

    /// Keeps `existing_owner_id` while it stays eligible for the lead profile,
    /// otherwise runs a fresh candidate search.
    #[instrument(name = "crm.distribution.resolve", skip(self))]
    pub async fn resolve_responsible_owner(
        &self,
        lives_count: i32,
        has_legal_entity: bool,
        existing_owner_id: Option<Uuid>,
    ) -> ApiResult<OwnerResolution> {
        if lives_count < 0 {
            return Err(ApiError::invalid("livesCount must be >= 0"));
        }
        if let Some(owner_id) = existing_owner_id {
            let owner = user::Entity::find_by_id(owner_id)
                .one(self.db.as_ref())
                .await?;
            if owner.is_some_and(|u| is_eligible(&u, lives_count, has_legal_entity)) {
                return Ok(OwnerResolution::Retained(owner_id));
            }
            tracing::debug!(owner = %owner_id, "existing owner no longer eligible");
        }
        Ok(
            match self
                .finder
                .find_next_responsible(lives_count, has_legal_entity)
                .await?
            {
                Some(id) => OwnerResolution::Assigned(id),
                None => OwnerResolution::Unassigned,
            },
        )
    }
}

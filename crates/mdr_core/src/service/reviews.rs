//! Review requests: a submitter asks an authority to register items.
//!
//! An open request lets the authority's registrars see and register its
//! items. Accepting registers every item (cascading when the request asks
//! for it) in a single unit of work.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{RegistryService, Result};
use crate::error::RegistryError;
use crate::events::RegistryEvent;
use crate::perms::PermissionKind;
use crate::principal::Principal;
use crate::store::UnitOfWork;
use crate::types::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReviewRequest {
    pub authority: AuthorityId,
    pub items: Vec<ItemId>,
    pub state: State,
    pub registration_date: Option<NaiveDate>,
    #[serde(default)]
    pub cascade: bool,
    pub message: Option<String>,
}

impl RegistryService {
    pub async fn submit_review(
        &self,
        principal: &Principal,
        request: NewReviewRequest,
    ) -> Result<ReviewRequest> {
        let requester = principal.require_user()?;
        if request.items.is_empty() {
            return Err(RegistryError::InvalidInput(
                "a review request needs at least one item".into(),
            ));
        }
        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        self.load_authority(uow.as_mut(), request.authority).await?;
        for id in &request.items {
            let item = uow
                .load_item(*id)
                .await?
                .ok_or_else(|| RegistryError::not_found("item", id))?;
            self.require(uow.as_mut(), &actor, &item, PermissionKind::View)
                .await?;
        }

        let review = ReviewRequest {
            id: ReviewRequestId::new(),
            authority: request.authority,
            requester,
            items: request.items,
            state: request.state,
            registration_date: request.registration_date.unwrap_or_else(|| self.clock.today()),
            cascade: request.cascade,
            status: ReviewStatus::Submitted,
            message: request.message,
            reviewer: None,
            response: None,
            created: self.clock.now(),
        };
        uow.save_review(&review).await?;
        self.review_changed(uow.as_mut(), &review).await?;
        self.commit(uow).await?;
        for id in &review.items {
            self.permissions.invalidate_item(*id).await;
        }
        tracing::info!(review = %review.id, authority = %review.authority, items = review.items.len(), "review request submitted");
        Ok(review)
    }

    /// Only the requester (or a superuser) cancels.
    pub async fn cancel_review(
        &self,
        principal: &Principal,
        review: ReviewRequestId,
    ) -> Result<ReviewRequest> {
        let mut uow = self.store.begin().await?;
        let mut request = self.open_review(uow.as_mut(), review).await?;
        let is_requester = principal.active_user() == Some(request.requester);
        if !is_requester && !principal.is_effective_superuser() {
            return Err(RegistryError::PermissionDenied(format!(
                "{principal} did not submit review request {review}"
            )));
        }
        request.status = ReviewStatus::Cancelled;
        self.close_review(uow, request).await
    }

    pub async fn reject_review(
        &self,
        principal: &Principal,
        review: ReviewRequestId,
        response: Option<String>,
    ) -> Result<ReviewRequest> {
        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        let mut request = self.open_review(uow.as_mut(), review).await?;
        if !actor.is_registrar_of(request.authority) {
            return Err(RegistryError::PermissionDenied(format!(
                "{principal} is not a registrar of {}",
                request.authority
            )));
        }
        request.status = ReviewStatus::Rejected;
        request.reviewer = principal.user_id;
        request.response = response;
        self.close_review(uow, request).await
    }

    /// Register the request's items and close it. Items the reviewer may
    /// not register are reported in `failed`.
    pub async fn accept_review(
        &self,
        principal: &Principal,
        review: ReviewRequestId,
        response: Option<String>,
    ) -> Result<(ReviewRequest, CascadeOutcome)> {
        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        let mut request = self.open_review(uow.as_mut(), review).await?;
        if !actor.is_registrar_of(request.authority) {
            return Err(RegistryError::PermissionDenied(format!(
                "{principal} is not a registrar of {}",
                request.authority
            )));
        }
        let authority = self.load_authority(uow.as_mut(), request.authority).await?;
        let registration = RegistrationRequest {
            registration_date: Some(request.registration_date),
            until_date: None,
            change_details: response.clone().unwrap_or_default(),
        };

        // Registered while the request is still open so it can grant
        // change-status permission. Items shared between roots are
        // registered once.
        let members = self
            .registration_set(uow.as_mut(), &request.items, request.cascade)
            .await?;
        let outcome = self
            .register_members(
                uow.as_mut(),
                &actor,
                &authority,
                &members,
                &request.items,
                request.state,
                request.registration_date,
                &registration,
            )
            .await?;
        tracing::info!(
            review = %review,
            total = outcome.total(),
            failed = outcome.failed.len(),
            "review accepted"
        );

        self.audit(
            uow.as_mut(),
            principal,
            "accept_review",
            &registration.change_details,
            outcome.success.clone(),
        )
        .await?;
        request.status = ReviewStatus::Accepted;
        request.reviewer = principal.user_id;
        request.response = response;
        let request = self.close_review(uow, request).await?;
        for id in &outcome.success {
            self.permissions.invalidate_item(*id).await;
        }
        Ok((request, outcome))
    }

    async fn open_review(
        &self,
        uow: &mut dyn UnitOfWork,
        id: ReviewRequestId,
    ) -> Result<ReviewRequest> {
        let review = uow
            .load_review(id)
            .await?
            .ok_or_else(|| RegistryError::not_found("review request", id))?;
        if !review.is_open() {
            return Err(RegistryError::Conflict(format!(
                "review request {id} is already {}",
                review.status.as_str()
            )));
        }
        Ok(review)
    }

    async fn close_review(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        review: ReviewRequest,
    ) -> Result<ReviewRequest> {
        uow.save_review(&review).await?;
        self.review_changed(uow.as_mut(), &review).await?;
        self.commit(uow).await?;
        for id in &review.items {
            self.permissions.invalidate_item(*id).await;
        }
        tracing::info!(review = %review.id, status = review.status.as_str(), "review request closed");
        Ok(review)
    }

    async fn review_changed(&self, uow: &mut dyn UnitOfWork, review: &ReviewRequest) -> Result<()> {
        self.emit(
            uow,
            RegistryEvent::ReviewRequestChanged {
                review: review.id,
                status: review.status,
            },
        )
        .await
    }
}
